//! API error type and [`axum::response::IntoResponse`] implementation.

use arxiu_engine::Error as EngineError;
use axum::{
  Json,
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("invalid {field}: {message}")]
  Validation { field: String, message: String },

  #[error("unauthorized")]
  Unauthorized,

  #[error("insufficient credits: balance {balance}, cost {cost}")]
  PaymentRequired { balance: i64, cost: i64 },

  #[error("forbidden: {0}")]
  Forbidden(String),

  #[error("{0} not found")]
  NotFound(String),

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("payload exceeds {limit_mb} MB")]
  PayloadTooLarge { limit_mb: u64 },

  /// Logged, never shown to the caller.
  #[error("internal error: {0}")]
  Internal(String),
}

impl From<EngineError> for ApiError {
  fn from(e: EngineError) -> Self {
    match e {
      EngineError::Validation { field, message } => Self::Validation { field, message },
      EngineError::Conflict(m) => Self::Conflict(m),
      EngineError::NotFound(what) => Self::NotFound(what.to_owned()),
      EngineError::Forbidden(m) => Self::Forbidden(m),
      EngineError::InsufficientCredits { balance, cost } => {
        Self::PaymentRequired { balance, cost }
      }
      EngineError::TooLarge { limit_mb } => Self::PayloadTooLarge { limit_mb },
      EngineError::SyncFailed(m) => Self::Conflict(format!("sync failed: {m}")),
      other => Self::Internal(other.to_string()),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, body) = match &self {
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, json!({ "error": m })),
      ApiError::Validation { field, message } => (
        StatusCode::BAD_REQUEST,
        json!({ "error": format!("invalid {field}: {message}"), "field": field }),
      ),
      ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, json!({ "error": "unauthorized" })),
      ApiError::PaymentRequired { balance, cost } => (
        StatusCode::PAYMENT_REQUIRED,
        json!({ "error": "insufficient credits", "balance": balance, "cost": cost }),
      ),
      ApiError::Forbidden(m) => (StatusCode::FORBIDDEN, json!({ "error": m })),
      ApiError::NotFound(what) => {
        (StatusCode::NOT_FOUND, json!({ "error": format!("{what} not found") }))
      }
      ApiError::Conflict(m) => (StatusCode::CONFLICT, json!({ "error": m })),
      ApiError::PayloadTooLarge { limit_mb } => (
        StatusCode::PAYLOAD_TOO_LARGE,
        json!({ "error": format!("payload exceeds {limit_mb} MB") }),
      ),
      ApiError::Internal(detail) => {
        tracing::error!(%detail, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "internal error" }))
      }
    };

    let mut res = (status, Json(body)).into_response();
    if matches!(self, ApiError::Unauthorized) {
      res
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Basic realm=\"arxiu\""));
    }
    res
  }
}

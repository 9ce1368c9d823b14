//! Media originals, viewing grants and the credit balance.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `PUT`  | `/media/{item_id}/original?filename=…` | Raw body; `Content-Type` is checked |
//! | `POST` | `/media/{item_id}/view` | Spends credits unless a grant is live; 402 when short |
//! | `GET`  | `/media/{item_id}/grant` | `null` when no grant is live |
//! | `GET`  | `/credits` | `{"credits":n,"points":n}` |
//! | `GET`  | `/credits/ledger` | |
//! | `POST` | `/credits/convert` | Points to credits |

use arxiu_core::{
  credit::{Conversion, LedgerEntry, MediaGrant, MediaItemId},
  store::Store,
};
use arxiu_engine::{credits::Balances, media::StoredMedia};
use axum::{
  Json,
  extract::{Path, Query, State},
  http::{HeaderMap, StatusCode, header},
  response::IntoResponse,
};
use bytes::Bytes;
use serde::Deserialize;

use crate::{AppState, auth::CurrentUser, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct UploadParams {
  pub filename: Option<String>,
}

/// `PUT /media/{item_id}/original`
pub async fn upload<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(item_id): Path<MediaItemId>,
  Query(params): Query<UploadParams>,
  headers: HeaderMap,
  body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
  let mime = headers
    .get(header::CONTENT_TYPE)
    .and_then(|v| v.to_str().ok())
    .ok_or_else(|| ApiError::BadRequest("missing Content-Type".into()))?;
  let filename = params.filename.as_deref().unwrap_or_default();
  let stored: StoredMedia =
    state.engine.upload_media(user.id, item_id, filename, mime, &body).await?;
  Ok((StatusCode::CREATED, Json(stored)))
}

/// `POST /media/{item_id}/view`
pub async fn view<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(item_id): Path<MediaItemId>,
) -> Result<Json<MediaGrant>, ApiError> {
  Ok(Json(state.engine.view_media(user.id, item_id).await?))
}

/// `GET /media/{item_id}/grant`
pub async fn grant<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(item_id): Path<MediaItemId>,
) -> Result<Json<Option<MediaGrant>>, ApiError> {
  Ok(Json(state.engine.media_grant(user.id, item_id).await?))
}

// ─── Credits ─────────────────────────────────────────────────────────────────

/// `GET /credits`
pub async fn balances<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
) -> Result<Json<Balances>, ApiError> {
  Ok(Json(state.engine.balances(user.id).await?))
}

/// `GET /credits/ledger`
pub async fn ledger<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<LedgerEntry>>, ApiError> {
  Ok(Json(state.engine.ledger(user.id).await?))
}

/// `POST /credits/convert`
pub async fn convert<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
) -> Result<Json<Conversion>, ApiError> {
  Ok(Json(state.engine.convert_points(user.id).await?))
}

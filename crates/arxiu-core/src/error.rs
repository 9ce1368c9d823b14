//! Error types for `arxiu-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown {kind} discriminant: {value:?}")]
  UnknownVariant { kind: &'static str, value: String },

  #[error("invalid {field}: {message}")]
  Validation { field: String, message: String },

  #[error("illegal draft transition {from} -> {to}")]
  IllegalTransition { from: String, to: String },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Validation { field: field.into(), message: message.into() }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

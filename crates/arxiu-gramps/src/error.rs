//! Error types for the external-server client and the secret box.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("credentials rejected by the remote server")]
  AuthInvalid,

  #[error("remote server unreachable: {0}")]
  Unreachable(String),

  #[error("unexpected response format: {0}")]
  BadFormat(String),

  #[error("request cancelled")]
  Cancelled,

  #[error("invalid base URL: {0}")]
  InvalidUrl(String),

  #[error("missing token")]
  MissingToken,

  #[error("invalid key: {0}")]
  InvalidKey(String),

  #[error("decryption failed")]
  Decrypt,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

//! Error type for `arxiu-engine`.
//!
//! The variants follow the outcome kinds callers act on: the HTTP boundary
//! maps `Validation`, `Conflict`, `NotFound` and `Forbidden` to user-facing
//! responses and keeps everything else internal.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid {field}: {message}")]
  Validation { field: String, message: String },

  #[error("conflict: {0}")]
  Conflict(String),

  /// The addressed entity does not exist for this caller.
  #[error("{0} not found")]
  NotFound(&'static str),

  #[error("forbidden: {0}")]
  Forbidden(String),

  #[error("insufficient credits: balance {balance}, cost {cost}")]
  InsufficientCredits { balance: i64, cost: i64 },

  #[error("payload exceeds {limit_mb} MB")]
  TooLarge { limit_mb: u64 },

  #[error("external server: {0}")]
  Gramps(arxiu_gramps::Error),

  #[error("gedcom: {0}")]
  Gedcom(#[from] arxiu_gedcom::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// A sync attempt ran and failed; the reason is recorded on the
  /// connection.
  #[error("sync failed: {0}")]
  SyncFailed(String),

  #[error("cancelled")]
  Cancelled,

  #[error("background task failed: {0}")]
  Task(String),

  #[error("core error: {0}")]
  Core(arxiu_core::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Box a backend error. Used as `.map_err(Error::store)`.
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }

  pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Validation { field: field.into(), message: message.into() }
  }

  /// True for credential failures that need the user to reconfigure the
  /// connection before another attempt can succeed.
  pub fn needs_user(&self) -> bool {
    matches!(
      self,
      Self::Gramps(
        arxiu_gramps::Error::AuthInvalid
          | arxiu_gramps::Error::Decrypt
          | arxiu_gramps::Error::MissingToken
      )
    )
  }
}

impl From<arxiu_core::Error> for Error {
  fn from(e: arxiu_core::Error) -> Self {
    match e {
      arxiu_core::Error::Validation { field, message } => Self::Validation { field, message },
      arxiu_core::Error::IllegalTransition { .. } => Self::Conflict(e.to_string()),
      other => Self::Core(other),
    }
  }
}

impl From<arxiu_gramps::Error> for Error {
  fn from(e: arxiu_gramps::Error) -> Self {
    match e {
      arxiu_gramps::Error::Cancelled => Self::Cancelled,
      other => Self::Gramps(other),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

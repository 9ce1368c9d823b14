//! Error types for the GEDCOM parser.

use thiserror::Error;

/// A fatal parse condition. Recoverable oddities are reported as warnings on
/// [`crate::ParsedGedcom`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
  #[error("file does not start with `0 HEAD`")]
  MissingHeader,

  #[error("line {line} exceeds {limit} bytes")]
  LineTooLong { line: usize, limit: usize },

  #[error("read failed: {0}")]
  Io(String),
}

impl From<std::io::Error> for Error {
  fn from(e: std::io::Error) -> Self { Error::Io(e.to_string()) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

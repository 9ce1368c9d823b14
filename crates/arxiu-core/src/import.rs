//! Import sources (uploaded files, bound connections) and the jobs that ingest
//! them into a tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{connection::ConnectionId, tree::TreeId, user::UserId};

pub type SourceId = i64;
pub type JobId = i64;

/// Maximum number of warnings carried by a parse result or import summary.
pub const WARNINGS_CAP: usize = 20;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SourceType {
  Gedcom,
  Gramps,
}

/// One uploaded file. `(owner_id, checksum)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSource {
  pub id:                SourceId,
  pub owner_id:          UserId,
  pub source_type:       SourceType,
  pub original_filename: String,
  pub storage_path:      String,
  pub size_bytes:        u64,
  /// Lowercase hex SHA-256 of the file contents.
  pub checksum:          String,
  pub created_at:        DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSource {
  pub owner_id:          UserId,
  pub source_type:       SourceType,
  pub original_filename: String,
  pub storage_path:      String,
  pub size_bytes:        u64,
  pub checksum:          String,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ImportMode {
  Replace,
  Merge,
  Sync,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
  Queued,
  Parsing,
  Normalizing,
  Persisted,
  Done,
  Error,
}

impl JobStatus {
  pub fn is_terminal(self) -> bool { matches!(self, Self::Done | Self::Error) }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
  pub done:  u64,
  pub total: u64,
}

/// Result summary stored on a finished job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
  pub persons:   u64,
  pub families:  u64,
  pub relations: u64,
  pub warnings:  Vec<String>,
  pub errors:    u64,
}

impl ImportSummary {
  /// Append a warning unless the cap has been reached.
  pub fn warn(&mut self, message: impl Into<String>) {
    if self.warnings.len() < WARNINGS_CAP {
      self.warnings.push(message.into());
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJob {
  pub id:            JobId,
  pub owner_id:      UserId,
  pub tree_id:       TreeId,
  pub source_id:     Option<SourceId>,
  pub connection_id: Option<ConnectionId>,
  pub job_type:      SourceType,
  pub mode:          ImportMode,
  pub status:        JobStatus,
  pub progress:      JobProgress,
  pub error_message: Option<String>,
  pub summary:       Option<ImportSummary>,
  pub created_by:    UserId,
  pub created_at:    DateTime<Utc>,
  pub started_at:    Option<DateTime<Utc>>,
  pub finished_at:   Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewImportJob {
  pub owner_id:      UserId,
  pub tree_id:       TreeId,
  pub source_id:     Option<SourceId>,
  pub connection_id: Option<ConnectionId>,
  pub job_type:      SourceType,
  pub mode:          ImportMode,
  pub created_by:    UserId,
}

/// A status change applied by the import worker.
#[derive(Debug, Clone)]
pub struct JobUpdate {
  pub status:        JobStatus,
  pub progress:      Option<JobProgress>,
  pub error_message: Option<String>,
  pub summary:       Option<ImportSummary>,
}

impl JobUpdate {
  pub fn status(status: JobStatus) -> Self {
    Self { status, progress: None, error_message: None, summary: None }
  }

  pub fn failed(message: impl Into<String>) -> Self {
    Self {
      status:        JobStatus::Error,
      progress:      None,
      error_message: Some(message.into()),
      summary:       None,
    }
  }

  pub fn done(summary: ImportSummary) -> Self {
    Self {
      status:        JobStatus::Done,
      progress:      None,
      error_message: None,
      summary:       Some(summary),
    }
  }

  pub fn with_progress(mut self, done: u64, total: u64) -> Self {
    self.progress = Some(JobProgress { done, total });
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn summary_warnings_are_capped() {
    let mut summary = ImportSummary::default();
    for i in 0..50 {
      summary.warn(format!("w{i}"));
    }
    assert_eq!(summary.warnings.len(), WARNINGS_CAP);
    assert_eq!(summary.warnings[0], "w0");
  }

  #[test]
  fn terminal_statuses() {
    assert!(JobStatus::Done.is_terminal());
    assert!(JobStatus::Error.is_terminal());
    assert!(!JobStatus::Persisted.is_terminal());
    assert_eq!("normalizing".parse::<JobStatus>().unwrap(), JobStatus::Normalizing);
  }
}

//! Bindings to external genealogy servers (`integració`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{tree::TreeId, user::UserId};

pub type ConnectionId = i64;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionStatus {
  Connected,
  Error,
  Disabled,
}

/// A stored external connection. The API token only ever lives here in sealed
/// form; it is opened in memory for the duration of one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalConnection {
  pub id:           ConnectionId,
  pub owner_id:     UserId,
  pub tree_id:      TreeId,
  pub base_url:     String,
  pub username:     Option<String>,
  #[serde(skip_serializing)]
  pub token_sealed: String,
  pub status:       ConnectionStatus,
  pub last_sync_at: Option<DateTime<Utc>>,
  pub last_error:   Option<String>,
  /// Consecutive failed syncs; reset on success.
  pub failures:     u32,
  /// Earliest instant an unforced sync may run again.
  pub next_sync_at: Option<DateTime<Utc>>,
  pub created_at:   DateTime<Utc>,
}

impl ExternalConnection {
  /// True while an unforced sync should be skipped.
  pub fn in_backoff(&self, now: DateTime<Utc>) -> bool {
    self.next_sync_at.is_some_and(|next| next > now)
  }
}

#[derive(Debug, Clone)]
pub struct NewConnection {
  pub owner_id:     UserId,
  pub tree_id:      TreeId,
  pub base_url:     String,
  pub username:     Option<String>,
  pub token_sealed: String,
}

/// One line of a connection's sync history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLogEntry {
  pub connection_id: ConnectionId,
  pub message:       String,
  pub created_at:    DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use chrono::Duration;

  use super::*;

  #[test]
  fn backoff_window() {
    let now = Utc::now();
    let mut c = ExternalConnection {
      id:           1,
      owner_id:     1,
      tree_id:      1,
      base_url:     "https://gramps.example".into(),
      username:     None,
      token_sealed: String::new(),
      status:       ConnectionStatus::Error,
      last_sync_at: None,
      last_error:   Some("boom".into()),
      failures:     2,
      next_sync_at: Some(now + Duration::minutes(5)),
      created_at:   now,
    };
    assert!(c.in_backoff(now));
    assert!(!c.in_backoff(now + Duration::minutes(6)));
    c.next_sync_at = None;
    assert!(!c.in_backoff(now));
  }
}

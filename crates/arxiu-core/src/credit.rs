//! Credit ledger and media access grants.
//!
//! The ledger is append-only; a balance is the sum of its deltas. Viewing a
//! media item spends credits once and leaves a time-limited grant behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::user::UserId;

pub type MediaItemId = i64;

pub const REASON_MEDIA_VIEW: &str = "media_view";
pub const REASON_REFUND: &str = "refund";
pub const REASON_CONVERSION: &str = "conversion";
pub const REASON_UPLOAD: &str = "media_upload";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
  pub id:         i64,
  pub user_id:    UserId,
  pub delta:      i64,
  pub reason:     String,
  pub ref_type:   Option<String>,
  pub ref_id:     Option<i64>,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
  pub user_id:  UserId,
  pub delta:    i64,
  pub reason:   String,
  pub ref_type: Option<String>,
  pub ref_id:   Option<i64>,
}

/// At most one non-expired grant exists per `(user_id, item_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaGrant {
  pub id:            i64,
  pub user_id:       UserId,
  pub item_id:       MediaItemId,
  pub token:         String,
  pub expires_at:    DateTime<Utc>,
  pub credits_spent: i64,
  pub created_at:    DateTime<Utc>,
}

impl MediaGrant {
  pub fn is_live(&self, now: DateTime<Utc>) -> bool { self.expires_at > now }
}

/// Input to [`crate::store::CreditStore::spend_for_grant`].
#[derive(Debug, Clone)]
pub struct GrantRequest {
  pub user_id:    UserId,
  pub item_id:    MediaItemId,
  pub cost:       i64,
  pub token:      String,
  pub now:        DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum SpendOutcome {
  /// Credits were debited and a fresh grant written.
  Granted(MediaGrant),
  /// A live grant already existed; nothing was spent.
  Reused(MediaGrant),
  Insufficient { balance: i64, cost: i64 },
  /// The grant insert failed after the debit; a refund entry was written.
  Refunded { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversion {
  pub points_spent:   i64,
  pub credits_gained: i64,
}

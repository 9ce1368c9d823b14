//! Site-wide maintenance banner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceBanner {
  pub message:      String,
  pub level:        String,
  pub active_until: Option<DateTime<Utc>>,
}

impl MaintenanceBanner {
  pub fn is_active(&self, now: DateTime<Utc>) -> bool {
    self.active_until.is_none_or(|until| until > now)
  }
}

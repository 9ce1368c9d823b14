//! User notifications, per-user delivery preferences, and the dedupe-key
//! rules that collapse repeated events inside one time window.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::{group::GroupId, tree::TreeId, user::UserId};

pub type NotificationId = i64;

/// Preference-level grouping of notification kinds.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum KindFamily {
  Matches,
  Gramps,
  Groups,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationKind {
  MatchesPending,
  GrampsError,
  GrampsSynced,
  ImportDone,
  ImportError,
  GroupConflicts,
  GroupInvite,
}

impl NotificationKind {
  pub fn family(self) -> KindFamily {
    match self {
      Self::MatchesPending => KindFamily::Matches,
      Self::GrampsError | Self::GrampsSynced | Self::ImportDone | Self::ImportError => {
        KindFamily::Gramps
      }
      Self::GroupConflicts | Self::GroupInvite => KindFamily::Groups,
    }
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationStatus {
  Unread,
  Read,
}

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Frequency {
  #[default]
  Instant,
  Daily,
  Weekly,
  Off,
}

/// Delivery preferences. `enabled_kinds: None` means every family is enabled;
/// `Some(vec![])` means none is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPrefs {
  pub frequency:     Frequency,
  pub enabled_kinds: Option<Vec<KindFamily>>,
}

impl NotificationPrefs {
  pub fn allows(&self, kind: NotificationKind) -> bool {
    if self.frequency == Frequency::Off {
      return false;
    }
    match &self.enabled_kinds {
      None => true,
      Some(families) => families.contains(&kind.family()),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
  pub id:         NotificationId,
  pub user_id:    UserId,
  pub kind:       NotificationKind,
  pub title:      String,
  pub body:       String,
  pub url:        Option<String>,
  pub status:     NotificationStatus,
  pub tree_id:    Option<TreeId>,
  pub group_id:   Option<GroupId>,
  pub object_id:  Option<i64>,
  pub dedupe_key: Option<String>,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
  pub user_id:    UserId,
  pub kind:       NotificationKind,
  pub title:      String,
  pub body:       String,
  pub url:        Option<String>,
  pub tree_id:    Option<TreeId>,
  pub group_id:   Option<GroupId>,
  pub object_id:  Option<i64>,
  pub dedupe_key: Option<String>,
}

/// Time bucket of the dedupe key: the UTC day for instant and daily
/// preferences, the ISO week for weekly ones.
pub fn dedupe_window(frequency: Frequency, at: DateTime<Utc>) -> String {
  match frequency {
    Frequency::Weekly => {
      let week = at.iso_week();
      format!("{}-W{:02}", week.year(), week.week())
    }
    _ => at.format("%Y-%m-%d").to_string(),
  }
}

/// `kind:object_id:window`, or `kind:window` without an object.
pub fn dedupe_key(kind: NotificationKind, object_id: Option<i64>, window: &str) -> String {
  match object_id {
    Some(id) => format!("{kind}:{id}:{window}"),
    None => format!("{kind}:{window}"),
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn windows_by_frequency() {
    let at = Utc.with_ymd_and_hms(2021, 1, 3, 12, 0, 0).unwrap();
    assert_eq!(dedupe_window(Frequency::Instant, at), "2021-01-03");
    assert_eq!(dedupe_window(Frequency::Daily, at), "2021-01-03");
    // 3 Jan 2021 belongs to ISO week 53 of 2020.
    assert_eq!(dedupe_window(Frequency::Weekly, at), "2020-W53");
  }

  #[test]
  fn keys_with_and_without_object() {
    assert_eq!(
      dedupe_key(NotificationKind::MatchesPending, Some(12), "2024-05-01"),
      "matches_pending:12:2024-05-01"
    );
    let weekly = dedupe_key(NotificationKind::GrampsError, None, "2024-W18");
    assert_eq!(weekly, "gramps_error:2024-W18");
  }

  #[test]
  fn preferences_filter_by_family() {
    let all = NotificationPrefs::default();
    assert!(all.allows(NotificationKind::GroupInvite));

    let none = NotificationPrefs { frequency: Frequency::Daily, enabled_kinds: Some(vec![]) };
    assert!(!none.allows(NotificationKind::MatchesPending));

    let gramps_only = NotificationPrefs {
      frequency:     Frequency::Weekly,
      enabled_kinds: Some(vec![KindFamily::Gramps]),
    };
    assert!(gramps_only.allows(NotificationKind::ImportDone));
    assert!(!gramps_only.allows(NotificationKind::GroupConflicts));

    let off = NotificationPrefs { frequency: Frequency::Off, enabled_kinds: None };
    assert!(!off.allows(NotificationKind::GrampsError));
  }
}

//! Candidate associations between tree persons and archival records
//! (`coincidència`), with an explainable score.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  search::{RecordId, TargetType},
  tree::{PersonId, TreeId},
  user::UserId,
};

pub type MatchId = i64;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchStatus {
  Pending,
  Accepted,
  Ignored,
  Rejected,
}

impl MatchStatus {
  /// Pending matches may be decided; any decision may be undone back to
  /// pending.
  pub fn can_transition(self, to: MatchStatus) -> bool {
    match (self, to) {
      (Self::Pending, Self::Pending) => false,
      (Self::Pending, _) => true,
      (_, Self::Pending) => true,
      _ => false,
    }
  }
}

/// One feature's contribution: integer percentage and configured weight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureScore {
  pub percent: u32,
  pub weight:  u32,
}

/// Per-feature breakdown persisted alongside the composite score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchReason {
  pub name:      FeatureScore,
  pub surname:   FeatureScore,
  pub date:      FeatureScore,
  pub place:     FeatureScore,
  pub relations: FeatureScore,
}

/// `(owner_id, person_id, target_type, target_id)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
  pub id:          MatchId,
  pub owner_id:    UserId,
  pub tree_id:     TreeId,
  pub person_id:   PersonId,
  pub target_type: TargetType,
  pub target_id:   RecordId,
  /// Composite score in `[0, 1]`.
  pub score:       f64,
  pub reason:      MatchReason,
  pub status:      MatchStatus,
  pub created_at:  DateTime<Utc>,
  pub updated_at:  DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMatch {
  pub owner_id:    UserId,
  pub tree_id:     TreeId,
  pub person_id:   PersonId,
  pub target_type: TargetType,
  pub target_id:   RecordId,
  pub score:       f64,
  pub reason:      MatchReason,
}

/// Audit row written for every decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchDecision {
  pub id:          i64,
  pub match_id:    MatchId,
  pub user_id:     UserId,
  pub from_status: MatchStatus,
  pub to_status:   MatchStatus,
  pub decided_at:  DateTime<Utc>,
}

/// Parameters for [`crate::store::MatchStore::list_matches`].
#[derive(Debug, Clone, Default)]
pub struct MatchQuery {
  pub owner_id: UserId,
  pub tree_id:  Option<TreeId>,
  pub status:   Option<MatchStatus>,
  pub limit:    Option<usize>,
  pub offset:   Option<usize>,
}

#[cfg(test)]
mod tests {
  use super::MatchStatus::*;

  #[test]
  fn decision_transitions() {
    assert!(Pending.can_transition(Accepted));
    assert!(Pending.can_transition(Ignored));
    assert!(Pending.can_transition(Rejected));
    assert!(Accepted.can_transition(Pending));
    assert!(!Accepted.can_transition(Rejected));
    assert!(!Pending.can_transition(Pending));
  }
}

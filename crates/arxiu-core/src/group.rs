//! Collaboration groups: members and roles, linked trees, duplicate-person
//! conflicts, and the append-only change log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  tree::{PersonId, TreeId},
  user::UserId,
};

pub type GroupId = i64;
pub type MemberId = i64;
pub type ConflictId = i64;

/// Member role. Variants are declared in rank order so the derived `Ord`
/// gives `viewer < member < admin < owner`.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GroupRole {
  Viewer,
  Member,
  Admin,
  Owner,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MemberStatus {
  Invited,
  Active,
  Removed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
  pub id:          GroupId,
  pub owner_id:    UserId,
  pub name:        String,
  pub description: String,
  pub created_at:  DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewGroup {
  pub owner_id:    UserId,
  pub name:        String,
  pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMember {
  pub id:         MemberId,
  pub group_id:   GroupId,
  pub user_id:    UserId,
  pub role:       GroupRole,
  pub status:     MemberStatus,
  pub invited_by: Option<UserId>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl GroupMember {
  /// True when this member may perform an action requiring `min`.
  pub fn may(&self, min: GroupRole) -> bool {
    self.status == MemberStatus::Active && self.role >= min
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LinkStatus {
  Active,
  Removed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupTree {
  pub group_id:   GroupId,
  pub tree_id:    TreeId,
  pub linked_by:  UserId,
  pub status:     LinkStatus,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConflictType {
  Persona,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConflictStatus {
  Pending,
  Resolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictDetail {
  pub persona_ids: Vec<PersonId>,
  pub key:         String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConflict {
  pub id:            ConflictId,
  pub group_id:      GroupId,
  pub tree_id:       TreeId,
  pub conflict_type: ConflictType,
  pub status:        ConflictStatus,
  pub summary:       String,
  pub detail:        ConflictDetail,
  pub created_at:    DateTime<Utc>,
  pub resolved_by:   Option<UserId>,
  pub resolved_at:   Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConflict {
  pub group_id:      GroupId,
  pub tree_id:       TreeId,
  pub conflict_type: ConflictType,
  pub summary:       String,
  pub detail:        ConflictDetail,
}

/// Append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupChange {
  pub id:          i64,
  pub group_id:    GroupId,
  pub actor_id:    UserId,
  pub action:      String,
  pub object_type: String,
  pub object_id:   Option<i64>,
  pub payload:     serde_json::Value,
  pub created_at:  DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewGroupChange {
  pub group_id:    GroupId,
  pub actor_id:    UserId,
  pub action:      &'static str,
  pub object_type: &'static str,
  pub object_id:   Option<i64>,
  pub payload:     serde_json::Value,
}

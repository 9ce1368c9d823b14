//! Registered users of the application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;

/// Site-wide role. Variants are declared in rank order.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
  Serialize, Deserialize, strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UserRole {
  #[default]
  User,
  Moderator,
  Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
  pub id:            UserId,
  pub username:      String,
  pub email:         String,
  /// Argon2 PHC string; never serialised out of the process.
  #[serde(skip_serializing)]
  pub password_hash: String,
  pub role:          UserRole,
  pub created_at:    DateTime<Utc>,
}

impl User {
  pub fn can_moderate(&self) -> bool { self.role >= UserRole::Moderator }

  pub fn is_admin(&self) -> bool { self.role == UserRole::Admin }
}

#[derive(Debug, Clone)]
pub struct NewUser {
  pub username:      String,
  pub email:         String,
  pub password_hash: String,
  pub role:          UserRole,
}

//! Private family trees: the tree envelope, its persons, and the directed
//! relations between them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::user::UserId;

pub type TreeId = i64;
pub type PersonId = i64;
pub type RelationId = i64;

// ─── Tree ────────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TreeVisibility {
  #[default]
  Private,
  Restricted,
  Public,
}

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TreeStatus {
  #[default]
  Active,
  Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
  pub id:         TreeId,
  pub owner_id:   UserId,
  pub name:       String,
  pub visibility: TreeVisibility,
  pub status:     TreeStatus,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTree {
  pub owner_id:   UserId,
  pub name:       String,
  pub visibility: TreeVisibility,
}

// ─── Person ──────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Sex {
  Male,
  Female,
  Unknown,
  #[default]
  Unset,
}

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PersonVisibility {
  #[default]
  Visible,
  Hidden,
}

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PersonStatus {
  #[default]
  Active,
  Deleted,
}

/// A single individual inside one tree.
///
/// `external_id` is the stable key from the source system (a GEDCOM xref or a
/// namespaced remote ID such as `gramps:I0001`); it is unique per tree when
/// non-empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
  pub id:          PersonId,
  pub tree_id:     TreeId,
  pub external_id: Option<String>,
  pub given:       String,
  pub surname1:    String,
  pub surname2:    String,
  /// Fallback used when the structured name parts are empty.
  pub full_name:   String,
  pub sex:         Sex,
  pub birth_date:  Option<String>,
  pub birth_place: Option<String>,
  pub death_date:  Option<String>,
  pub death_place: Option<String>,
  pub visibility:  PersonVisibility,
  pub status:      PersonStatus,
  pub created_at:  DateTime<Utc>,
  pub updated_at:  DateTime<Utc>,
}

impl Person {
  /// Surnames joined by a single space, trimmed.
  pub fn surnames(&self) -> String {
    join_nonempty(&[&self.surname1, &self.surname2])
  }

  /// Name shown to users: structured parts first, then the full-name
  /// fallback, then `-`.
  pub fn display_name(&self) -> String {
    let structured = join_nonempty(&[&self.given, &self.surname1, &self.surname2]);
    if !structured.is_empty() {
      return structured;
    }
    let full = self.full_name.trim();
    if full.is_empty() { "-".to_owned() } else { full.to_owned() }
  }

  /// True when the person carries no name at all.
  pub fn is_empty(&self) -> bool { self.display_name() == "-" }

  /// Year of birth, else year of death.
  pub fn reference_year(&self) -> Option<i32> {
    self
      .birth_date
      .as_deref()
      .and_then(year_of)
      .or_else(|| self.death_date.as_deref().and_then(year_of))
  }

  /// Birth place, else death place.
  pub fn reference_place(&self) -> Option<&str> {
    non_blank(self.birth_place.as_deref())
      .or_else(|| non_blank(self.death_place.as_deref()))
  }
}

/// Input to [`crate::store::TreeStore::create_person`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewPerson {
  pub tree_id:     TreeId,
  pub external_id: Option<String>,
  pub given:       String,
  pub surname1:    String,
  pub surname2:    String,
  pub full_name:   String,
  pub sex:         Sex,
  pub birth_date:  Option<String>,
  pub birth_place: Option<String>,
  pub death_date:  Option<String>,
  pub death_place: Option<String>,
}

impl NewPerson {
  /// Convenience constructor with every optional field empty.
  pub fn new(tree_id: TreeId, external_id: Option<String>) -> Self {
    Self { tree_id, external_id, ..Self::default() }
  }
}

/// Mutable person fields rewritten by a merge import.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersonUpdate {
  pub given:       String,
  pub surname1:    String,
  pub surname2:    String,
  pub full_name:   String,
  pub sex:         Sex,
  pub birth_date:  Option<String>,
  pub birth_place: Option<String>,
  pub death_date:  Option<String>,
  pub death_place: Option<String>,
}

impl From<NewPerson> for PersonUpdate {
  fn from(p: NewPerson) -> Self {
    Self {
      given:       p.given,
      surname1:    p.surname1,
      surname2:    p.surname2,
      full_name:   p.full_name,
      sex:         p.sex,
      birth_date:  p.birth_date,
      birth_place: p.birth_place,
      death_date:  p.death_date,
      death_place: p.death_place,
    }
  }
}

// ─── Relation ────────────────────────────────────────────────────────────────

/// Role label of a directed edge `from → to`: `to` is the `role` of `from`.
/// A `father` edge therefore runs from the child to the father.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RelationRole {
  Father,
  Mother,
  Parent,
  Child,
  Spouse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
  pub id:         RelationId,
  pub tree_id:    TreeId,
  pub from_id:    PersonId,
  pub to_id:      PersonId,
  pub role:       RelationRole,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NewRelation {
  pub tree_id: TreeId,
  pub from_id: PersonId,
  pub to_id:   PersonId,
  pub role:    RelationRole,
}

// ─── Replace imports ─────────────────────────────────────────────────────────

/// The whole content a replace import writes into a tree. Edge endpoints
/// are indices into `persons`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeSnapshot {
  pub persons: Vec<NewPerson>,
  pub edges:   Vec<(usize, usize, RelationRole)>,
}

/// What a replace wrote. Persons whose external ID was already in the tree
/// are rewritten in place and keep their ID, so their matches survive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceOutcome {
  pub created:   u64,
  pub updated:   u64,
  pub removed:   u64,
  pub relations: u64,
}

impl ReplaceOutcome {
  pub fn persons(&self) -> u64 { self.created + self.updated }
}

/// Names of a person's recorded parents, used by the matching engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParentNames {
  pub fathers: Vec<String>,
  pub mothers: Vec<String>,
}

impl ParentNames {
  pub fn len(&self) -> usize { self.fathers.len() + self.mothers.len() }

  pub fn is_empty(&self) -> bool { self.len() == 0 }
}

// ─── Dates ───────────────────────────────────────────────────────────────────

/// Extract a four-digit year from a free-form date string.
///
/// Handles ISO dates (`1900-01-01`) and GEDCOM dates (`ABT 1 JAN 1900`,
/// `BET 1850 AND 1860`). The last four-digit run wins for GEDCOM forms; an
/// ISO prefix wins when present.
pub fn year_of(date: &str) -> Option<i32> {
  let date = date.trim();
  if date.len() >= 4
    && date.as_bytes()[..4].iter().all(u8::is_ascii_digit)
    && date.as_bytes().get(4).is_none_or(|b| *b == b'-')
  {
    return date[..4].parse().ok();
  }
  date
    .split(|c: char| !c.is_ascii_digit())
    .filter(|run| run.len() == 4)
    .next_back()
    .and_then(|run| run.parse().ok())
}

fn join_nonempty(parts: &[&str]) -> String {
  parts
    .iter()
    .map(|p| p.trim())
    .filter(|p| !p.is_empty())
    .collect::<Vec<_>>()
    .join(" ")
}

fn non_blank(s: Option<&str>) -> Option<&str> {
  s.map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn person(given: &str, s1: &str, s2: &str, full: &str) -> Person {
    let now = Utc::now();
    Person {
      id:          1,
      tree_id:     1,
      external_id: None,
      given:       given.into(),
      surname1:    s1.into(),
      surname2:    s2.into(),
      full_name:   full.into(),
      sex:         Sex::Unset,
      birth_date:  None,
      birth_place: None,
      death_date:  Some("1950".into()),
      death_place: Some("  ".into()),
      visibility:  PersonVisibility::Visible,
      status:      PersonStatus::Active,
      created_at:  now,
      updated_at:  now,
    }
  }

  #[test]
  fn year_of_iso_and_gedcom_forms() {
    assert_eq!(year_of("1900-01-01"), Some(1900));
    assert_eq!(year_of("1 JAN 1900"), Some(1900));
    assert_eq!(year_of("ABT 1875"), Some(1875));
    assert_eq!(year_of("BET 1850 AND 1860"), Some(1860));
    assert_eq!(year_of("1902"), Some(1902));
    assert_eq!(year_of("JAN 19"), None);
    assert_eq!(year_of(""), None);
  }

  #[test]
  fn display_name_prefers_structured_parts() {
    assert_eq!(person("Maria", "Soler", "", "ignored").display_name(), "Maria Soler");
    assert_eq!(person("", "", "", " Joan Puig ").display_name(), "Joan Puig");
    assert_eq!(person("", "", "", "").display_name(), "-");
    assert!(person("", "", "", "").is_empty());
  }

  #[test]
  fn reference_year_and_place_fall_back_to_death() {
    let p = person("Joan", "Puig", "Vila", "");
    assert_eq!(p.reference_year(), Some(1950));
    assert_eq!(p.reference_place(), None);
    assert_eq!(p.surnames(), "Puig Vila");
  }
}

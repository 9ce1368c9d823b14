//! Moderated content: entities with a published-version pointer, their draft
//! versions, and the validation rules enforced on submission.
//!
//! A version moves `draft → pendent → publicat | rebutjat`; a pending version
//! may be withdrawn back to `draft`. Published versions are never modified, so
//! the parent's `current_version_id` can be pointed back at any of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result, user::UserId};

pub type EntityId = i64;
pub type VersionId = i64;

pub const TITLE_MAX: usize = 200;
pub const SECTION_BODY_MAX: usize = 20_000;
pub const FACT_BODY_MAX: usize = 5_000;
pub const EVENT_DESCRIPTION_MAX: usize = 10_000;
pub const MAP_DESCRIPTION_MAX: usize = 5_000;
pub const TAGS_MAX: usize = 10;
pub const TAG_LEN_MAX: usize = 40;
pub const YEAR_MIN: i32 = -3000;
pub const YEAR_MAX: i32 = 2100;

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::AsRefStr,
)]
pub enum DraftStatus {
  #[serde(rename = "draft")]
  #[strum(serialize = "draft")]
  Draft,
  #[serde(rename = "pendent")]
  #[strum(serialize = "pendent")]
  Pending,
  #[serde(rename = "publicat")]
  #[strum(serialize = "publicat")]
  Published,
  #[serde(rename = "rebutjat")]
  #[strum(serialize = "rebutjat")]
  Rejected,
}

impl DraftStatus {
  pub fn can_transition(self, to: DraftStatus) -> bool {
    matches!(
      (self, to),
      (Self::Draft, Self::Pending)
        | (Self::Pending, Self::Published)
        | (Self::Pending, Self::Rejected)
        | (Self::Pending, Self::Draft)
    )
  }

  pub fn check_transition(self, to: DraftStatus) -> Result<()> {
    if self.can_transition(to) {
      Ok(())
    } else {
      Err(Error::IllegalTransition { from: self.to_string(), to: to.to_string() })
    }
  }
}

// ─── Entities ────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
  HistorySection,
  HistoryFact,
  Event,
  Map,
}

/// A moderated entity. Its visible content is whichever version
/// `current_version_id` points at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeratedEntity {
  pub id:                 EntityId,
  pub kind:               EntityKind,
  pub current_version_id: Option<VersionId>,
  pub created_by:         UserId,
  pub created_at:         DateTime<Utc>,
}

// ─── Content ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionContent {
  pub title: String,
  pub body:  String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactContent {
  pub title:     String,
  pub body:      String,
  pub year_from: i32,
  pub year_to:   i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContent {
  pub title:       String,
  pub description: String,
  pub year_from:   Option<i32>,
  pub year_to:     Option<i32>,
  #[serde(default)]
  pub tags:        Vec<String>,
  #[serde(default)]
  pub sources:     Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapContent {
  pub title:       String,
  pub description: String,
  pub year:        Option<i32>,
  #[serde(default)]
  pub sources:     Vec<String>,
}

/// Typed content of a version. The variant name is the entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum DraftContent {
  HistorySection(SectionContent),
  HistoryFact(FactContent),
  Event(EventContent),
  Map(MapContent),
}

impl DraftContent {
  pub fn kind(&self) -> EntityKind {
    match self {
      Self::HistorySection(_) => EntityKind::HistorySection,
      Self::HistoryFact(_) => EntityKind::HistoryFact,
      Self::Event(_) => EntityKind::Event,
      Self::Map(_) => EntityKind::Map,
    }
  }

  /// An empty content value of the given kind, used for fresh drafts.
  pub fn empty(kind: EntityKind) -> Self {
    match kind {
      EntityKind::HistorySection => Self::HistorySection(SectionContent::default()),
      EntityKind::HistoryFact => Self::HistoryFact(FactContent::default()),
      EntityKind::Event => Self::Event(EventContent::default()),
      EntityKind::Map => Self::Map(MapContent::default()),
    }
  }

  /// Serialise the inner payload (without the kind tag) for storage.
  pub fn to_json(&self) -> Result<serde_json::Value> {
    let full = serde_json::to_value(self)?;
    Ok(full.get("data").cloned().unwrap_or(serde_json::Value::Null))
  }

  /// Rebuild from the stored kind and payload.
  pub fn from_parts(kind: EntityKind, data: serde_json::Value) -> Result<Self> {
    let wrapped = serde_json::json!({ "kind": kind.as_ref(), "data": data });
    Ok(serde_json::from_value(wrapped)?)
  }

  /// Full validation run on submission.
  pub fn validate(&self) -> Result<()> {
    match self {
      Self::HistorySection(c) => {
        require_text("title", &c.title, TITLE_MAX)?;
        require_text("body", &c.body, SECTION_BODY_MAX)
      }
      Self::HistoryFact(c) => {
        require_text("title", &c.title, TITLE_MAX)?;
        cap("body", &c.body, FACT_BODY_MAX)?;
        year_range("year", Some(c.year_from), Some(c.year_to))
      }
      Self::Event(c) => {
        require_text("title", &c.title, TITLE_MAX)?;
        cap("description", &c.description, EVENT_DESCRIPTION_MAX)?;
        year_range("year", c.year_from, c.year_to)?;
        validate_tags(&c.tags)?;
        validate_sources(&c.sources)
      }
      Self::Map(c) => {
        require_text("title", &c.title, TITLE_MAX)?;
        cap("description", &c.description, MAP_DESCRIPTION_MAX)?;
        year_range("year", c.year, c.year)?;
        validate_sources(&c.sources)
      }
    }
  }
}

// ─── Versions ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftVersion {
  pub id:               VersionId,
  pub entity_id:        EntityId,
  pub status:           DraftStatus,
  pub content:          DraftContent,
  pub created_by:       UserId,
  /// Incremented by exactly one on every successful save.
  pub lock_version:     i64,
  pub moderator_id:     Option<UserId>,
  pub moderated_at:     Option<DateTime<Utc>>,
  pub moderation_notes: Option<String>,
  pub created_at:       DateTime<Utc>,
  pub updated_at:       DateTime<Utc>,
}

/// Input to [`crate::store::DraftStore::update_draft`].
#[derive(Debug, Clone)]
pub struct DraftUpdate {
  pub version_id:   VersionId,
  /// The lock version the caller loaded.
  pub lock_version: i64,
  pub content:      DraftContent,
}

/// Result of an optimistic save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
  Saved { lock_version: i64 },
  Stale { current: i64 },
  Missing,
}

/// Moderation metadata recorded with a status change.
#[derive(Debug, Clone, Default)]
pub struct Moderation {
  pub moderator_id: Option<UserId>,
  pub notes:        Option<String>,
}

/// Parameters shared by the list and count queries of the moderation queue.
#[derive(Debug, Clone, Default)]
pub struct DraftQuery {
  pub status:     Option<DraftStatus>,
  pub kind:       Option<EntityKind>,
  pub created_by: Option<UserId>,
  pub limit:      Option<usize>,
  pub offset:     Option<usize>,
}

// ─── Validators ──────────────────────────────────────────────────────────────

fn cap(field: &str, value: &str, max: usize) -> Result<()> {
  if value.chars().count() > max {
    return Err(Error::validation(field, format!("must be at most {max} characters")));
  }
  Ok(())
}

fn require_text(field: &str, value: &str, max: usize) -> Result<()> {
  if value.trim().is_empty() {
    return Err(Error::validation(field, "must not be empty"));
  }
  cap(field, value, max)
}

fn year_range(field: &str, from: Option<i32>, to: Option<i32>) -> Result<()> {
  for year in [from, to].into_iter().flatten() {
    if !(YEAR_MIN..=YEAR_MAX).contains(&year) {
      return Err(Error::validation(
        field,
        format!("{year} is outside {YEAR_MIN}..={YEAR_MAX}"),
      ));
    }
  }
  if let (Some(from), Some(to)) = (from, to)
    && from > to
  {
    return Err(Error::validation(field, format!("range {from}..{to} is reversed")));
  }
  Ok(())
}

pub fn validate_tags(tags: &[String]) -> Result<()> {
  if tags.len() > TAGS_MAX {
    return Err(Error::validation("tags", format!("at most {TAGS_MAX} tags")));
  }
  for tag in tags {
    let len = tag.trim().chars().count();
    if len == 0 || len > TAG_LEN_MAX {
      return Err(Error::validation(
        "tags",
        format!("tag {tag:?} must be 1..={TAG_LEN_MAX} characters"),
      ));
    }
  }
  Ok(())
}

pub fn validate_sources(sources: &[String]) -> Result<()> {
  for source in sources {
    let ok = Url::parse(source.trim())
      .map(|u| {
        matches!(u.scheme(), "http" | "https")
          && u.host_str().is_some_and(|h| !h.is_empty())
      })
      .unwrap_or(false);
    if !ok {
      return Err(Error::validation(
        "sources",
        format!("{source:?} is not an http(s) URL"),
      ));
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn event() -> EventContent {
    EventContent {
      title:       "Fira de Sant Ermengol".into(),
      description: "Mercat anual.".into(),
      year_from:   Some(1900),
      year_to:     Some(1910),
      tags:        vec!["fira".into()],
      sources:     vec!["https://example.org/fira".into()],
    }
  }

  #[test]
  fn state_machine() {
    use DraftStatus::*;
    assert!(Draft.can_transition(Pending));
    assert!(Pending.can_transition(Published));
    assert!(Pending.can_transition(Rejected));
    assert!(Pending.can_transition(Draft));
    assert!(!Published.can_transition(Draft));
    assert!(!Draft.can_transition(Published));
    assert!(Rejected.check_transition(Pending).is_err());
  }

  #[test]
  fn status_wire_names() {
    assert_eq!(DraftStatus::Pending.to_string(), "pendent");
    assert_eq!("publicat".parse::<DraftStatus>().unwrap(), DraftStatus::Published);
    assert_eq!(serde_json::to_string(&DraftStatus::Rejected).unwrap(), "\"rebutjat\"");
  }

  #[test]
  fn content_parts_round_trip_kind() {
    let content = DraftContent::Event(event());
    let data = content.to_json().unwrap();
    assert!(data.get("kind").is_none());
    let back = DraftContent::from_parts(EntityKind::Event, data).unwrap();
    assert_eq!(back, content);
  }

  #[test]
  fn valid_event_passes() {
    assert!(DraftContent::Event(event()).validate().is_ok());
  }

  #[test]
  fn too_many_or_too_long_tags_fail() {
    let mut e = event();
    e.tags = (0..11).map(|i| format!("t{i}")).collect();
    assert!(DraftContent::Event(e.clone()).validate().is_err());
    e.tags = vec!["x".repeat(41)];
    assert!(DraftContent::Event(e).validate().is_err());
  }

  #[test]
  fn sources_must_be_http_with_host() {
    assert!(validate_sources(&["http://arxiu.cat/a".into()]).is_ok());
    assert!(validate_sources(&["ftp://arxiu.cat/a".into()]).is_err());
    assert!(validate_sources(&["https://".into()]).is_err());
    assert!(validate_sources(&["not a url".into()]).is_err());
  }

  #[test]
  fn fact_year_range_checked() {
    let fact = |from, to| {
      DraftContent::HistoryFact(FactContent {
        title:     "Pesta".into(),
        body:      String::new(),
        year_from: from,
        year_to:   to,
      })
    };
    assert!(fact(1348, 1350).validate().is_ok());
    assert!(fact(1350, 1348).validate().is_err());
    assert!(fact(1348, 2500).validate().is_err());
  }

  #[test]
  fn section_requires_title_and_body() {
    let section = DraftContent::HistorySection(SectionContent {
      title: " ".into(),
      body:  "x".into(),
    });
    let Err(Error::Validation { field, .. }) = section.validate() else {
      panic!("expected validation error");
    };
    assert_eq!(field, "title");
  }
}

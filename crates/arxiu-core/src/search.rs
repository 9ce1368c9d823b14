//! Archival records, their normalised search documents, and the filter shape
//! accepted by [`crate::store::SearchIndex::search`].
//!
//! Normalisation is shared by the index and the matching engine so that both
//! sides compare identical token forms.

use serde::{Deserialize, Serialize};
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

pub type RecordId = i64;
pub type MunicipalityId = i64;

/// Surname particles dropped from the canonical surname form.
const SURNAME_PARTICLES: &[&str] = &["de", "del", "dels", "d", "la", "les", "i", "y"];

// ─── Normalisation ───────────────────────────────────────────────────────────

/// Strip diacritics, lowercase, turn punctuation into spaces and collapse
/// whitespace: `"  Josep-Maria  Puigdomènech "` → `"josep maria puigdomenech"`.
pub fn normalize(input: &str) -> String {
  let folded: String = input
    .nfkd()
    .filter(|c| !is_combining_mark(*c))
    .flat_map(char::to_lowercase)
    .map(|c| if c.is_alphanumeric() { c } else { ' ' })
    .collect();
  folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalised tokens of `input`, deduplicated in first-seen order.
pub fn tokens(input: &str) -> Vec<String> {
  let mut out: Vec<String> = Vec::new();
  for token in normalize(input).split(' ').filter(|t| !t.is_empty()) {
    if !out.iter().any(|t| t == token) {
      out.push(token.to_owned());
    }
  }
  out
}

/// Canonical surname form: normalised, particles removed.
pub fn canonical_surname(input: &str) -> String {
  normalize(input)
    .split(' ')
    .filter(|t| !t.is_empty() && !SURNAME_PARTICLES.contains(t))
    .collect::<Vec<_>>()
    .join(" ")
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// Entity types a match can point at.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TargetType {
  #[default]
  RegistreRaw,
}

/// Role of a person mentioned alongside the subject of a record.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecordRole {
  Father,
  Mother,
  Spouse,
  Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRelation {
  pub role: RecordRole,
  pub name: String,
}

/// One indexed act inside a book (`registre raw`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivalRecord {
  #[serde(default)]
  pub id:                RecordId,
  pub book_id:           Option<i64>,
  pub municipality_id:   Option<MunicipalityId>,
  pub municipality_name: Option<String>,
  pub year:              Option<i32>,
  pub given:             String,
  pub surname1:          String,
  pub surname2:          String,
  #[serde(default)]
  pub relations:         Vec<RecordRelation>,
}

// ─── Search documents ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocRelation {
  pub role:      RecordRole,
  pub name_norm: String,
  pub tokens:    Vec<String>,
}

/// Materialised, normalised view of one archival record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchDoc {
  pub entity_type:       TargetType,
  pub entity_id:         RecordId,
  pub person_norm:       String,
  pub person_tokens:     Vec<String>,
  pub given_norm:        String,
  pub surname_norm:      String,
  pub surname_canon:     String,
  pub year:              Option<i32>,
  pub municipality_id:   Option<MunicipalityId>,
  pub municipality_name: Option<String>,
  pub relations:         Vec<DocRelation>,
}

impl SearchDoc {
  pub fn from_record(record: &ArchivalRecord) -> Self {
    let surnames = format!("{} {}", record.surname1, record.surname2);
    let person = format!("{} {}", record.given, surnames);
    Self {
      entity_type:       TargetType::RegistreRaw,
      entity_id:         record.id,
      person_norm:       normalize(&person),
      person_tokens:     tokens(&person),
      given_norm:        normalize(&record.given),
      surname_norm:      normalize(&surnames),
      surname_canon:     canonical_surname(&surnames),
      year:              record.year,
      municipality_id:   record.municipality_id,
      municipality_name: record.municipality_name.clone(),
      relations:         record
        .relations
        .iter()
        .map(|r| DocRelation {
          role:      r.role,
          name_norm: normalize(&r.name),
          tokens:    tokens(&r.name),
        })
        .collect(),
    }
  }

  /// Surname tokens from both the normalised and the canonical forms.
  pub fn surname_tokens(&self) -> Vec<String> {
    let mut out = tokens(&self.surname_norm);
    for t in tokens(&self.surname_canon) {
      if !out.contains(&t) {
        out.push(t);
      }
    }
    out
  }

  /// Every token the inverted index should point at this document.
  pub fn index_tokens(&self) -> Vec<String> {
    let mut out = self.person_tokens.clone();
    for t in self.surname_tokens() {
      if !out.contains(&t) {
        out.push(t);
      }
    }
    out
  }
}

// ─── Queries ─────────────────────────────────────────────────────────────────

/// Parameters for [`crate::store::SearchIndex::search`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
  pub entity_type:     Option<TargetType>,
  pub query_norm:      String,
  pub given_norm:      String,
  pub surname_norm:    String,
  /// Any-of token filter; relevance is the number of distinct tokens hit.
  pub tokens:          Vec<String>,
  pub given_tokens:    Vec<String>,
  pub surname_tokens:  Vec<String>,
  /// Inclusive year window.
  pub year_range:      Option<(i32, i32)>,
  pub municipality_id: Option<MunicipalityId>,
  pub limit:           usize,
  pub offset:          usize,
}

impl SearchFilter {
  /// A filter over archival records for a given-name / surname pair.
  pub fn for_name(given: &str, surnames: &str, limit: usize) -> Self {
    let full = format!("{given} {surnames}");
    Self {
      entity_type: Some(TargetType::RegistreRaw),
      query_norm: normalize(&full),
      given_norm: normalize(given),
      surname_norm: normalize(surnames),
      tokens: tokens(&full),
      given_tokens: tokens(given),
      surname_tokens: tokens(surnames),
      limit,
      ..Self::default()
    }
  }

  pub fn with_year_window(mut self, year: i32, radius: i32) -> Self {
    self.year_range = Some((year - radius, year + radius));
    self
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
  pub doc:       SearchDoc,
  pub relevance: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetCount<K> {
  pub value: K,
  pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facets {
  pub municipalities: Vec<FacetCount<MunicipalityId>>,
  pub years:          Vec<FacetCount<i32>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPage {
  pub rows:   Vec<SearchHit>,
  pub total:  u64,
  pub facets: Facets,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn normalize_strips_diacritics_and_punctuation() {
    assert_eq!(normalize("  Josep-Maria  Puigdomènech "), "josep maria puigdomenech");
    assert_eq!(normalize("NÚÑEZ"), "nunez");
    assert_eq!(normalize("Çà i Là"), "ca i la");
    assert_eq!(normalize(""), "");
  }

  #[test]
  fn tokens_are_deduplicated_in_order() {
    assert_eq!(tokens("Puig i Puig, Joan"), vec!["puig", "i", "joan"]);
  }

  #[test]
  fn canonical_surname_drops_particles() {
    assert_eq!(canonical_surname("de la Torre i Vila"), "torre vila");
  }

  #[test]
  fn doc_from_record_denormalises_fields() {
    let record = ArchivalRecord {
      id:                7,
      municipality_id:   Some(3),
      municipality_name: Some("Barcelona".into()),
      year:              Some(1902),
      given:             "Joan".into(),
      surname1:          "Puig".into(),
      relations:         vec![RecordRelation {
        role: RecordRole::Father,
        name: "Pere Puig".into(),
      }],
      ..ArchivalRecord::default()
    };
    let doc = SearchDoc::from_record(&record);
    assert_eq!(doc.person_tokens, vec!["joan", "puig"]);
    assert_eq!(doc.surname_canon, "puig");
    assert_eq!(doc.relations[0].tokens, vec!["pere", "puig"]);
    assert_eq!(doc.index_tokens(), vec!["joan", "puig"]);
  }

  #[test]
  fn filter_year_window() {
    let f = SearchFilter::for_name("Joan", "Puig", 25).with_year_window(1900, 5);
    assert_eq!(f.year_range, Some((1895, 1905)));
    assert_eq!(f.tokens, vec!["joan", "puig"]);
  }
}

//! Archival record indexing and free-text search over the index.

use arxiu_core::{
  search::{
    ArchivalRecord, MunicipalityId, RecordId, SearchDoc, SearchFilter, SearchPage, TargetType,
    normalize, tokens,
  },
  store::{SearchIndex, Store},
  user::User,
};
use serde::Deserialize;

use crate::{Engine, Error, Result};

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;

/// Search parameters as a caller supplies them. `given`/`surname` narrow the
/// name match; `q` is free text over the whole name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordQuery {
  pub q:               Option<String>,
  pub given:           Option<String>,
  pub surname:         Option<String>,
  pub year_from:       Option<i32>,
  pub year_to:         Option<i32>,
  pub municipality_id: Option<MunicipalityId>,
  pub limit:           Option<usize>,
  pub offset:          Option<usize>,
}

impl RecordQuery {
  pub fn to_filter(&self) -> Result<SearchFilter> {
    let limit = self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let given = self.given.as_deref().unwrap_or_default();
    let surname = self.surname.as_deref().unwrap_or_default();
    let mut filter = SearchFilter::for_name(given, surname, limit);
    if let Some(q) = self.q.as_deref().filter(|q| !q.trim().is_empty()) {
      filter.query_norm = normalize(q);
      for t in tokens(q) {
        if !filter.tokens.contains(&t) {
          filter.tokens.push(t);
        }
      }
    }
    if filter.tokens.is_empty() && self.municipality_id.is_none() && self.year_from.is_none() {
      return Err(Error::validation("q", "give a name, a year or a municipality"));
    }

    filter.year_range = match (self.year_from, self.year_to) {
      (Some(from), Some(to)) if from > to => {
        return Err(Error::validation("year", format!("range {from}..{to} is reversed")));
      }
      (Some(from), Some(to)) => Some((from, to)),
      (Some(from), None) => Some((from, from)),
      (None, Some(to)) => Some((to, to)),
      (None, None) => None,
    };
    filter.municipality_id = self.municipality_id;
    filter.offset = self.offset.unwrap_or_default();
    Ok(filter)
  }
}

impl<S: Store + 'static> Engine<S> {
  pub async fn search_records(&self, query: &RecordQuery) -> Result<SearchPage> {
    let filter = query.to_filter()?;
    self.store.search(&filter).await.map_err(Error::store)
  }

  /// Add or replace an archival record and its search document. Moderators
  /// and admins only.
  pub async fn index_record(&self, user: &User, record: ArchivalRecord) -> Result<SearchDoc> {
    if !user.can_moderate() {
      return Err(Error::Forbidden("moderator role required".into()));
    }
    if record.id <= 0 {
      return Err(Error::validation("id", "must be positive"));
    }
    let doc = self.store.upsert_record(record).await.map_err(Error::store)?;
    tracing::debug!(record_id = doc.entity_id, "record indexed");
    Ok(doc)
  }

  pub async fn unindex_record(&self, user: &User, id: RecordId) -> Result<()> {
    if !user.can_moderate() {
      return Err(Error::Forbidden("moderator role required".into()));
    }
    if !self.store.delete_search_doc(TargetType::RegistreRaw, id).await.map_err(Error::store)? {
      return Err(Error::NotFound("record"));
    }
    Ok(())
  }
}

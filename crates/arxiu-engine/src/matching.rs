//! Candidate matching between tree persons and archival records.
//!
//! Scoring is synchronous and works on [`Features`] extracted from a person
//! and a [`SearchDoc`] returned by the index. Each feature yields a value in
//! `[0, 1]`; the composite is their weighted mean.
//!
//! | Feature | Rule |
//! |---------|------|
//! | name | share of the person's given-name tokens found in the record's person tokens |
//! | surname | share of the person's surname tokens found in the record's surname tokens |
//! | date | `1.0, 0.8, 0.6, 0.4, 0.2` for a year gap of `0, ≤1, ≤2, ≤5, ≤10`, else 0 |
//! | place | 1 when one normalised place contains the other |
//! | relations | share of recorded parents matched by a record relation of the same role |

use arxiu_core::{
  matching::{
    FeatureScore, Match, MatchDecision, MatchId, MatchQuery, MatchReason, MatchStatus, NewMatch,
  },
  notification::NotificationKind,
  search::{DocRelation, RecordRole, SearchDoc, SearchFilter, normalize, tokens},
  store::{MatchStore, SearchIndex, Store, TreeStore},
  tree::{ParentNames, Person, TreeId},
  user::UserId,
};

use crate::{Engine, Error, Result, config::MatchConfig, notify::Notice};

/// Share of one side's tokens that must appear in the other for two names
/// to count as the same person.
const NAME_OVERLAP: f64 = 0.6;

/// Normalised view of one person.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Features {
  pub name_norm:      String,
  pub given_tokens:   Vec<String>,
  pub surname_tokens: Vec<String>,
  /// Birth year, else death year, else 0.
  pub year:           i32,
  pub place:          Option<String>,
  pub fathers:        Vec<Vec<String>>,
  pub mothers:        Vec<Vec<String>>,
}

impl Features {
  pub fn of(person: &Person, parents: &ParentNames) -> Self {
    Self {
      name_norm:      normalize(&person.display_name()),
      given_tokens:   tokens(&person.given),
      surname_tokens: tokens(&person.surnames()),
      year:           person.reference_year().unwrap_or(0),
      place:          person.reference_place().map(normalize).filter(|p| !p.is_empty()),
      fathers:        parents.fathers.iter().map(|n| tokens(n)).collect(),
      mothers:        parents.mothers.iter().map(|n| tokens(n)).collect(),
    }
  }

  /// Candidate query: name tokens, `max_candidates` rows, and a year window
  /// when the year is known.
  pub fn filter(&self, person: &Person, cfg: &MatchConfig) -> SearchFilter {
    let mut filter = SearchFilter::for_name(&person.given, &person.surnames(), cfg.max_candidates);
    if filter.tokens.is_empty() {
      filter.query_norm = self.name_norm.clone();
      filter.tokens = tokens(&self.name_norm);
    }
    if self.year > 0 {
      filter = filter.with_year_window(self.year, cfg.year_radius);
    }
    filter
  }
}

/// Share of `needles` present in `haystack`; 0 when there are no needles.
pub fn token_ratio(needles: &[String], haystack: &[String]) -> f64 {
  if needles.is_empty() {
    return 0.0;
  }
  let hits = needles.iter().filter(|t| haystack.contains(t)).count();
  hits as f64 / needles.len() as f64
}

/// True when at least 60% of either side's tokens appear in the other.
pub fn names_match(a: &[String], b: &[String]) -> bool {
  if a.is_empty() || b.is_empty() {
    return false;
  }
  token_ratio(a, b) >= NAME_OVERLAP || token_ratio(b, a) >= NAME_OVERLAP
}

pub fn date_score(year: i32, candidate: Option<i32>) -> f64 {
  let Some(other) = candidate.filter(|y| *y > 0) else {
    return 0.0;
  };
  if year <= 0 {
    return 0.0;
  }
  match (year - other).abs() {
    0 => 1.0,
    1 => 0.8,
    2 => 0.6,
    3..=5 => 0.4,
    6..=10 => 0.2,
    _ => 0.0,
  }
}

pub fn place_score(place: Option<&str>, municipality: Option<&str>) -> f64 {
  let (Some(place), Some(municipality)) = (place, municipality.map(normalize)) else {
    return 0.0;
  };
  if place.is_empty() || municipality.is_empty() {
    return 0.0;
  }
  if municipality.contains(place) || place.contains(municipality.as_str()) { 1.0 } else { 0.0 }
}

pub fn relations_score(features: &Features, relations: &[DocRelation]) -> f64 {
  let total = features.fathers.len() + features.mothers.len();
  if total == 0 {
    return 0.0;
  }
  let matched = |names: &[Vec<String>], role: RecordRole| {
    names
      .iter()
      .filter(|name| relations.iter().any(|r| r.role == role && names_match(name, &r.tokens)))
      .count()
  };
  let hits = matched(&features.fathers, RecordRole::Father)
    + matched(&features.mothers, RecordRole::Mother);
  hits as f64 / total as f64
}

fn feature(value: f64, weight: u32) -> FeatureScore {
  FeatureScore { percent: (value * 100.0).round() as u32, weight }
}

/// Composite score in `[0, 1]` and its per-feature breakdown.
pub fn score(features: &Features, doc: &SearchDoc, cfg: &MatchConfig) -> (f64, MatchReason) {
  let parts = [
    (token_ratio(&features.given_tokens, &doc.person_tokens), cfg.weight_name),
    (token_ratio(&features.surname_tokens, &doc.surname_tokens()), cfg.weight_surname),
    (date_score(features.year, doc.year), cfg.weight_date),
    (
      place_score(features.place.as_deref(), doc.municipality_name.as_deref()),
      cfg.weight_place,
    ),
    (relations_score(features, &doc.relations), cfg.weight_relations),
  ];
  let total: u32 = parts.iter().map(|(_, w)| w).sum();
  let composite = if total == 0 {
    0.0
  } else {
    parts.iter().map(|(v, w)| v * f64::from(*w)).sum::<f64>() / f64::from(total)
  };
  let reason = MatchReason {
    name:      feature(parts[0].0, parts[0].1),
    surname:   feature(parts[1].0, parts[1].1),
    date:      feature(parts[2].0, parts[2].1),
    place:     feature(parts[3].0, parts[3].1),
    relations: feature(parts[4].0, parts[4].1),
  };
  (composite, reason)
}

/// Integer percentage compared against `min_score`. Only a perfect composite
/// reaches 100.
pub fn score_percent(score: f64) -> u32 {
  if score >= 1.0 { 100 } else { ((score * 100.0).round() as u32).min(99) }
}

impl<S: Store + 'static> Engine<S> {
  /// Score every non-empty active person of the tree against the index and
  /// store new candidates. Returns how many matches were created.
  pub async fn rebuild_matches(&self, owner_id: UserId, tree_id: TreeId) -> Result<u64> {
    self.owned_tree(owner_id, tree_id).await?;
    let persons = self.store.list_active_persons(tree_id).await.map_err(Error::store)?;
    let mut created = 0;
    for person in persons.iter().filter(|p| !p.is_empty()) {
      match self.match_person(owner_id, person).await {
        Ok(n) => created += n,
        Err(e) => tracing::warn!(person_id = person.id, error = %e, "matching failed"),
      }
    }
    tracing::info!(owner_id, tree_id, created, "match rebuild finished");

    if created > 0 {
      let notice = Notice::new(
        NotificationKind::MatchesPending,
        "New possible matches",
        format!("{created} new candidates to review"),
      )
      .tree(tree_id)
      .object(tree_id);
      self.notify_quietly(owner_id, notice).await;
    }
    Ok(created)
  }

  async fn match_person(&self, owner_id: UserId, person: &Person) -> Result<u64> {
    let cfg = &self.config.matching;
    let parents = self.store.parent_names(person.id).await.map_err(Error::store)?;
    let features = Features::of(person, &parents);
    let filter = features.filter(person, cfg);
    let page = self.store.search(&filter).await.map_err(Error::store)?;

    let mut created = 0;
    for hit in page.rows {
      let (score, reason) = score(&features, &hit.doc, cfg);
      if score_percent(score) < cfg.min_score {
        continue;
      }
      let candidate = NewMatch {
        owner_id,
        tree_id: person.tree_id,
        person_id: person.id,
        target_type: hit.doc.entity_type,
        target_id: hit.doc.entity_id,
        score,
        reason,
      };
      match self.store.insert_match_if_absent(candidate).await {
        Ok(true) => created += 1,
        Ok(false) => {}
        Err(e) => tracing::warn!(
          person_id = person.id,
          target_id = hit.doc.entity_id,
          error = %e,
          "could not store match"
        ),
      }
    }
    Ok(created)
  }

  /// Matches of `owner_id`; the query's owner is always overridden.
  pub async fn matches(&self, owner_id: UserId, query: MatchQuery) -> Result<Vec<Match>> {
    self.store.list_matches(MatchQuery { owner_id, ..query }).await.map_err(Error::store)
  }

  pub async fn count_matches(&self, owner_id: UserId, query: MatchQuery) -> Result<u64> {
    self.store.count_matches(MatchQuery { owner_id, ..query }).await.map_err(Error::store)
  }

  async fn owned_match(&self, owner_id: UserId, id: MatchId) -> Result<Match> {
    self
      .store
      .get_match(id)
      .await
      .map_err(Error::store)?
      .filter(|m| m.owner_id == owner_id)
      .ok_or(Error::NotFound("match"))
  }

  /// Move a match to `to`, recording the decision.
  pub async fn decide_match(&self, user_id: UserId, id: MatchId, to: MatchStatus) -> Result<Match> {
    let current = self.owned_match(user_id, id).await?;
    if !current.status.can_transition(to) {
      return Err(Error::Conflict(format!("cannot move match from {} to {to}", current.status)));
    }
    if !self.store.decide_match(id, current.status, to, user_id).await.map_err(Error::store)? {
      return Err(Error::Conflict("match was decided concurrently".into()));
    }
    tracing::info!(user_id, match_id = id, from = %current.status, %to, "match decided");
    self.owned_match(user_id, id).await
  }

  /// Apply `to` to each listed match, skipping foreign ones and those that
  /// cannot make the transition. Returns how many changed.
  pub async fn decide_matches(
    &self,
    user_id: UserId,
    ids: &[MatchId],
    to: MatchStatus,
  ) -> Result<u64> {
    let mut changed = 0;
    for &id in ids {
      match self.decide_match(user_id, id, to).await {
        Ok(_) => changed += 1,
        Err(Error::NotFound(_) | Error::Conflict(_)) => {
          tracing::debug!(user_id, match_id = id, "bulk decision skipped");
        }
        Err(e) => return Err(e),
      }
    }
    Ok(changed)
  }

  pub async fn match_decisions(&self, user_id: UserId, id: MatchId) -> Result<Vec<MatchDecision>> {
    self.owned_match(user_id, id).await?;
    self.store.list_decisions(id).await.map_err(Error::store)
  }
}

#[cfg(test)]
mod tests {
  use arxiu_core::{
    search::ArchivalRecord,
    tree::{NewPerson, PersonStatus, PersonVisibility, Sex},
    user::UserRole,
  };
  use chrono::Utc;

  use super::*;
  use crate::{EngineConfig, testing};

  fn joan() -> Person {
    let now = Utc::now();
    Person {
      id:          1,
      tree_id:     1,
      external_id: None,
      given:       "Joan".into(),
      surname1:    "Puig".into(),
      surname2:    String::new(),
      full_name:   String::new(),
      sex:         Sex::Male,
      birth_date:  Some("1900-01-01".into()),
      birth_place: Some("Barcelona".into()),
      death_date:  None,
      death_place: None,
      visibility:  PersonVisibility::Visible,
      status:      PersonStatus::Active,
      created_at:  now,
      updated_at:  now,
    }
  }

  fn record(year: i32) -> ArchivalRecord {
    ArchivalRecord {
      id: 1,
      municipality_name: Some("Barcelona".into()),
      year: Some(year),
      given: "Joan".into(),
      surname1: "Puig".into(),
      ..ArchivalRecord::default()
    }
  }

  #[test]
  fn date_bands() {
    let cases = [(0, 1.0), (1, 0.8), (2, 0.6), (5, 0.4), (10, 0.2), (11, 0.0)];
    for (gap, expected) in cases {
      assert_eq!(date_score(1900, Some(1900 + gap)), expected, "gap {gap}");
    }
    assert_eq!(date_score(0, Some(1900)), 0.0);
    assert_eq!(date_score(1900, None), 0.0);
  }

  #[test]
  fn names_overlap_either_way() {
    let a = tokens("Pere Puig");
    assert!(names_match(&a, &tokens("Pere Puig i Vila")));
    assert!(names_match(&tokens("Pere Puig i Vila"), &a));
    assert!(!names_match(&a, &tokens("Josep Soler")));
    assert!(!names_match(&a, &[]));
  }

  #[test]
  fn known_candidate_scores_eighty_nine() {
    let features = Features::of(&joan(), &ParentNames::default());
    let doc = SearchDoc::from_record(&record(1902));
    let (composite, reason) = score(&features, &doc, &MatchConfig::default());
    assert!((composite - 0.89).abs() < 1e-9, "{composite}");
    assert_eq!(score_percent(composite), 89);
    assert_eq!(reason.date, FeatureScore { percent: 60, weight: 15 });
    assert_eq!(reason.relations.percent, 0);
    assert_eq!(reason.place.percent, 100);
  }

  #[test]
  fn parents_count_towards_relations() {
    let parents =
      ParentNames { fathers: vec!["Pere Puig".into()], mothers: vec!["Rosa Vila".into()] };
    let features = Features::of(&joan(), &parents);
    let mut rec = record(1900);
    rec.relations = vec![arxiu_core::search::RecordRelation {
      role: RecordRole::Father,
      name: "Pere Puig i Soler".into(),
    }];
    let doc = SearchDoc::from_record(&rec);
    assert_eq!(relations_score(&features, &doc.relations), 0.5);
  }

  #[test]
  fn only_a_perfect_score_reaches_one_hundred() {
    assert_eq!(score_percent(1.0), 100);
    assert_eq!(score_percent(0.996), 99);
    assert_eq!(score_percent(0.5), 50);
  }

  type TestEngine = std::sync::Arc<Engine<arxiu_store_sqlite::SqliteStore>>;

  async fn seeded(config: EngineConfig) -> (TestEngine, UserId, TreeId) {
    let engine = testing::engine_with(config).await;
    let owner = testing::user(&engine, "anna", UserRole::User).await;
    let tree = testing::tree(&engine, &owner, "Puig").await;
    engine
      .store()
      .create_person(NewPerson {
        given: "Joan".into(),
        surname1: "Puig".into(),
        birth_date: Some("1900-01-01".into()),
        birth_place: Some("Barcelona".into()),
        ..NewPerson::new(tree.id, None)
      })
      .await
      .unwrap();
    engine.store().upsert_record(record(1902)).await.unwrap();
    (engine, owner.id, tree.id)
  }

  #[tokio::test]
  async fn rebuild_is_idempotent() {
    let (engine, owner, tree) = seeded(EngineConfig::default()).await;
    assert_eq!(engine.rebuild_matches(owner, tree).await.unwrap(), 1);
    assert_eq!(engine.rebuild_matches(owner, tree).await.unwrap(), 0);

    let found = engine.matches(owner, MatchQuery::default()).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].status, MatchStatus::Pending);
    assert!((found[0].score - 0.89).abs() < 1e-9);

    let inbox = engine.notifications(owner, true, 10, 0).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, NotificationKind::MatchesPending);
  }

  #[tokio::test]
  async fn min_score_one_hundred_accepts_nothing_imperfect() {
    let mut config = EngineConfig::default();
    config.matching.min_score = 100;
    let (engine, owner, tree) = seeded(config).await;
    assert_eq!(engine.rebuild_matches(owner, tree).await.unwrap(), 0);
  }

  #[tokio::test]
  async fn decisions_are_audited_and_scoped() {
    let (engine, owner, tree) = seeded(EngineConfig::default()).await;
    engine.rebuild_matches(owner, tree).await.unwrap();
    let id = engine.matches(owner, MatchQuery::default()).await.unwrap()[0].id;
    let pau = testing::user(&engine, "pau", UserRole::User).await;

    assert!(matches!(
      engine.decide_match(pau.id, id, MatchStatus::Accepted).await,
      Err(Error::NotFound("match"))
    ));
    let accepted = engine.decide_match(owner, id, MatchStatus::Accepted).await.unwrap();
    assert_eq!(accepted.status, MatchStatus::Accepted);
    assert!(matches!(
      engine.decide_match(owner, id, MatchStatus::Rejected).await,
      Err(Error::Conflict(_))
    ));
    engine.decide_match(owner, id, MatchStatus::Pending).await.unwrap();

    assert_eq!(engine.decide_matches(pau.id, &[id], MatchStatus::Ignored).await.unwrap(), 0);
    assert_eq!(engine.decide_matches(owner, &[id, 999], MatchStatus::Ignored).await.unwrap(), 1);

    let audit = engine.match_decisions(owner, id).await.unwrap();
    let steps: Vec<_> = audit.iter().map(|d| (d.from_status, d.to_status)).collect();
    assert_eq!(steps, vec![
      (MatchStatus::Pending, MatchStatus::Accepted),
      (MatchStatus::Accepted, MatchStatus::Pending),
      (MatchStatus::Pending, MatchStatus::Ignored),
    ]);
    let ignored = MatchQuery { status: Some(MatchStatus::Ignored), ..MatchQuery::default() };
    assert_eq!(engine.count_matches(owner, ignored).await.unwrap(), 1);
  }
}

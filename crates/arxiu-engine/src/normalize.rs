//! Ingestion of parsed or fetched genealogy data into a tree.
//!
//! The mapping from source records to persons and family edges is plain
//! synchronous code; only the store writes suspend.

use std::collections::HashMap;

use arxiu_core::{
  import::{ImportMode, ImportSummary},
  store::TreeStore,
  tree::{NewPerson, NewRelation, PersonId, RelationRole, TreeId, TreeSnapshot},
};
use arxiu_gedcom::{GedcomPerson, ParsedGedcom};
use arxiu_gramps::{RemoteFamily, RemotePerson};
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Namespace of external IDs that come from a remote server.
pub const GRAMPS_PREFIX: &str = "gramps:";

pub fn gramps_key(remote_id: &str) -> String { format!("{GRAMPS_PREFIX}{remote_id}") }

pub fn person_from_gedcom(tree_id: TreeId, p: &GedcomPerson) -> NewPerson {
  let xref = p.xref.trim();
  NewPerson {
    given: p.given.trim().to_owned(),
    surname1: p.surname.trim().to_owned(),
    sex: p.sex,
    birth_date: p.birth_date.clone(),
    birth_place: p.birth_place.clone(),
    death_date: p.death_date.clone(),
    death_place: p.death_place.clone(),
    ..NewPerson::new(tree_id, (!xref.is_empty()).then(|| xref.to_owned()))
  }
}

pub fn person_from_remote(tree_id: TreeId, p: &RemotePerson) -> NewPerson {
  NewPerson {
    given: p.given.trim().to_owned(),
    surname1: p.surname.trim().to_owned(),
    sex: p.sex,
    birth_date: p.birth_date.clone(),
    death_date: p.death_date.clone(),
    ..NewPerson::new(tree_id, Some(gramps_key(&p.external_id)))
  }
}

/// Edges of one family: a spouse pair in both directions, then
/// `child → father` and `child → mother` for each child. Self-edges are
/// never produced.
pub fn family_edges<T: Copy + PartialEq>(
  father: Option<T>,
  mother: Option<T>,
  children: &[T],
) -> Vec<(T, T, RelationRole)> {
  let mut edges = Vec::new();
  if let (Some(f), Some(m)) = (father, mother) {
    edges.push((f, m, RelationRole::Spouse));
    edges.push((m, f, RelationRole::Spouse));
  }
  for &child in children {
    if let Some(f) = father {
      edges.push((child, f, RelationRole::Father));
    }
    if let Some(m) = mother {
      edges.push((child, m, RelationRole::Mother));
    }
  }
  edges.retain(|(from, to, _)| from != to);
  edges
}

async fn insert_edges<S: TreeStore>(
  store: &S,
  tree_id: TreeId,
  edges: Vec<(PersonId, PersonId, RelationRole)>,
  summary: &mut ImportSummary,
) -> u64 {
  let mut created = 0;
  for (from_id, to_id, role) in edges {
    match store.insert_relation_if_absent(NewRelation { tree_id, from_id, to_id, role }).await {
      Ok(true) => created += 1,
      Ok(false) => {}
      Err(e) => summary.warn(format!("relation {from_id} -> {to_id} ({role}): {e}")),
    }
  }
  created
}

/// Write a GEDCOM parse result into `tree_id`.
///
/// `replace` swaps the tree's content for the file in one store transaction,
/// so a cancelled or failed import leaves the tree as it was. `merge` updates
/// persons whose external ID already exists. Within one file the first
/// occurrence of an external ID wins and later ones are skipped with a
/// warning.
pub async fn ingest<S: TreeStore>(
  store: &S,
  tree_id: TreeId,
  mode: ImportMode,
  parsed: &ParsedGedcom,
  cancel: &CancellationToken,
) -> Result<ImportSummary> {
  let mut summary = ImportSummary {
    families: parsed.families.len() as u64,
    errors: parsed.errors.len() as u64,
    ..ImportSummary::default()
  };
  for warning in &parsed.warnings {
    summary.warn(warning.clone());
  }
  for error in &parsed.errors {
    summary.warn(error.to_string());
  }

  match mode {
    ImportMode::Merge => merge_gedcom(store, tree_id, parsed, cancel, summary).await,
    ImportMode::Replace | ImportMode::Sync => {
      replace_gedcom(store, tree_id, parsed, cancel, summary).await
    }
  }
}

async fn replace_gedcom<S: TreeStore>(
  store: &S,
  tree_id: TreeId,
  parsed: &ParsedGedcom,
  cancel: &CancellationToken,
  mut summary: ImportSummary,
) -> Result<ImportSummary> {
  let mut snapshot = TreeSnapshot::default();
  let mut index: HashMap<&str, usize> = HashMap::new();
  for person in &parsed.persons {
    if cancel.is_cancelled() {
      return Err(Error::Cancelled);
    }
    let xref = person.xref.trim();
    if !xref.is_empty() {
      if index.contains_key(xref) {
        summary.warn(format!("duplicate person @{xref}@ skipped"));
        continue;
      }
      index.insert(xref, snapshot.persons.len());
    }
    snapshot.persons.push(person_from_gedcom(tree_id, person));
  }

  for family in &parsed.families {
    if cancel.is_cancelled() {
      return Err(Error::Cancelled);
    }
    let resolve = |xref: &str| index.get(xref.trim()).copied();
    let father = family.husband.as_deref().and_then(resolve);
    let mother = family.wife.as_deref().and_then(resolve);
    let children: Vec<usize> = family.children.iter().filter_map(|c| resolve(c)).collect();
    snapshot.edges.extend(family_edges(father, mother, &children));
  }

  if cancel.is_cancelled() {
    return Err(Error::Cancelled);
  }
  let outcome = store.replace_tree(tree_id, snapshot).await.map_err(Error::store)?;
  tracing::debug!(
    tree_id,
    created = outcome.created,
    updated = outcome.updated,
    removed = outcome.removed,
    "tree replaced"
  );
  summary.persons = outcome.persons();
  summary.relations = outcome.relations;
  Ok(summary)
}

async fn merge_gedcom<S: TreeStore>(
  store: &S,
  tree_id: TreeId,
  parsed: &ParsedGedcom,
  cancel: &CancellationToken,
  mut summary: ImportSummary,
) -> Result<ImportSummary> {
  let existing = store.external_ids(tree_id).await.map_err(Error::store)?;

  let mut ids: HashMap<&str, PersonId> = HashMap::new();
  for person in &parsed.persons {
    if cancel.is_cancelled() {
      return Err(Error::Cancelled);
    }
    let xref = person.xref.trim();
    if !xref.is_empty() && ids.contains_key(xref) {
      summary.warn(format!("duplicate person @{xref}@ skipped"));
      continue;
    }

    let input = person_from_gedcom(tree_id, person);
    let written = match existing.get(xref).copied() {
      Some(id) => store.update_person(id, input.into()).await.map(|_| id),
      None => store.create_person(input).await.map(|p| p.id),
    };
    match written {
      Ok(id) => {
        summary.persons += 1;
        if !xref.is_empty() {
          ids.insert(xref, id);
        }
      }
      Err(e) => summary.warn(format!("person @{xref}@: {e}")),
    }
  }

  for family in &parsed.families {
    if cancel.is_cancelled() {
      return Err(Error::Cancelled);
    }
    let resolve = |xref: &Option<String>| xref.as_deref().and_then(|x| ids.get(x.trim()).copied());
    let children: Vec<PersonId> =
      family.children.iter().filter_map(|c| ids.get(c.trim()).copied()).collect();
    let edges = family_edges(resolve(&family.husband), resolve(&family.wife), &children);
    let created = insert_edges(store, tree_id, edges, &mut summary).await;
    summary.relations += created;
  }

  Ok(summary)
}

/// Idempotently merge remote people and families into `tree_id`: persons
/// whose namespaced ID is already present are left alone, and relations are
/// only inserted when absent.
pub async fn reconcile<S: TreeStore>(
  store: &S,
  tree_id: TreeId,
  people: &[RemotePerson],
  families: &[RemoteFamily],
  cancel: &CancellationToken,
) -> Result<ImportSummary> {
  let mut summary =
    ImportSummary { families: families.len() as u64, ..ImportSummary::default() };
  let mut known = store.external_ids(tree_id).await.map_err(Error::store)?;

  for person in people {
    if cancel.is_cancelled() {
      return Err(Error::Cancelled);
    }
    let key = gramps_key(&person.external_id);
    if known.contains_key(&key) {
      continue;
    }
    match store.create_person(person_from_remote(tree_id, person)).await {
      Ok(created) => {
        summary.persons += 1;
        known.insert(key, created.id);
      }
      Err(e) => summary.warn(format!("person {key}: {e}")),
    }
  }

  for family in families {
    if cancel.is_cancelled() {
      return Err(Error::Cancelled);
    }
    let resolve = |id: &str| known.get(&gramps_key(id)).copied();
    let father = family.father_id.as_deref().and_then(resolve);
    let mother = family.mother_id.as_deref().and_then(resolve);
    let children: Vec<PersonId> = family.children.iter().filter_map(|c| resolve(c)).collect();
    let edges = family_edges(father, mother, &children);
    let created = insert_edges(store, tree_id, edges, &mut summary).await;
    summary.relations += created;
  }

  Ok(summary)
}

#[cfg(test)]
mod tests {
  use arxiu_core::{
    matching::{MatchQuery, MatchReason, MatchStatus, NewMatch},
    search::TargetType,
    store::{MatchStore, TreeStore},
    tree::Sex,
    user::UserRole,
  };

  use super::*;
  use crate::testing;

  const S1: &[u8] = b"0 HEAD\n\
    0 @I1@ INDI\n1 NAME Joan /Puig/\n1 SEX M\n1 BIRT\n2 DATE 1 JAN 1900\n\
    0 @I2@ INDI\n1 NAME Maria /Soler/\n1 SEX F\n\
    0 @F1@ FAM\n1 HUSB @I1@\n1 WIFE @I2@\n1 CHIL @I1@\n\
    0 TRLR\n";

  #[test]
  fn family_edges_skip_self_references() {
    let edges = family_edges(Some(1), Some(2), &[1, 3]);
    assert_eq!(edges, vec![
      (1, 2, RelationRole::Spouse),
      (2, 1, RelationRole::Spouse),
      (1, 2, RelationRole::Mother),
      (3, 1, RelationRole::Father),
      (3, 2, RelationRole::Mother),
    ]);
    assert!(family_edges(None, None, &[4]).is_empty());
    assert_eq!(family_edges(None, Some(2), &[4]), vec![(4, 2, RelationRole::Mother)]);
  }

  #[test]
  fn remote_persons_are_namespaced() {
    let p = RemotePerson {
      external_id: "I0001".into(),
      given: " Joan ".into(),
      surname: "Puig".into(),
      sex: Sex::Male,
      ..RemotePerson::default()
    };
    let new = person_from_remote(3, &p);
    assert_eq!(new.external_id.as_deref(), Some("gramps:I0001"));
    assert_eq!(new.given, "Joan");
  }

  #[tokio::test]
  async fn happy_path_file_ingests_persons_and_edges() {
    let engine = testing::engine().await;
    let owner = testing::user(&engine, "anna", UserRole::User).await;
    let tree = testing::tree(&engine, &owner, "Puig").await;
    let parsed = arxiu_gedcom::parse(S1);
    assert_eq!((parsed.persons.len(), parsed.families.len()), (2, 1));

    let summary =
      ingest(engine.store(), tree.id, ImportMode::Replace, &parsed, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.persons, 2);
    assert_eq!(summary.families, 1);
    // Spouse pair plus I1 → I2 as mother; the I1 → I1 father edge is dropped.
    assert_eq!(summary.relations, 3);

    let relations = engine.store().list_relations(tree.id).await.unwrap();
    assert_eq!(relations.len(), 3);
    assert!(relations.iter().all(|r| r.from_id != r.to_id));
  }

  #[tokio::test]
  async fn replace_clears_and_merge_updates() {
    let engine = testing::engine().await;
    let owner = testing::user(&engine, "anna", UserRole::User).await;
    let tree = testing::tree(&engine, &owner, "Puig").await;
    let cancel = CancellationToken::new();
    testing::person(&engine, &tree, "Stale", "Entry", None).await;

    ingest(engine.store(), tree.id, ImportMode::Replace, &arxiu_gedcom::parse(S1), &cancel)
      .await
      .unwrap();
    assert_eq!(engine.store().list_active_persons(tree.id).await.unwrap().len(), 2);

    let update = b"0 HEAD\n0 @I2@ INDI\n1 NAME Maria /Soler i Vila/\n\
      0 @I3@ INDI\n1 NAME Pere /Puig/\n0 TRLR\n";
    let summary =
      ingest(engine.store(), tree.id, ImportMode::Merge, &arxiu_gedcom::parse(update), &cancel)
        .await
        .unwrap();
    assert_eq!(summary.persons, 2);

    let persons = engine.store().list_active_persons(tree.id).await.unwrap();
    assert_eq!(persons.len(), 3);
    let maria = engine
      .store()
      .find_person_by_external_id(tree.id, "I2".into())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(maria.surname1, "Soler i Vila");
  }

  #[tokio::test]
  async fn duplicate_xrefs_keep_the_first_occurrence() {
    let engine = testing::engine().await;
    let owner = testing::user(&engine, "anna", UserRole::User).await;
    let tree = testing::tree(&engine, &owner, "Puig").await;
    let input = b"0 HEAD\n0 @I1@ INDI\n1 NAME Joan /Puig/\n\
      0 @I1@ INDI\n1 NAME Altre /Nom/\n0 TRLR\n";

    let summary = ingest(
      engine.store(),
      tree.id,
      ImportMode::Replace,
      &arxiu_gedcom::parse(input),
      &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(summary.persons, 1);
    assert!(summary.warnings.iter().any(|w| w.contains("duplicate person @I1@")));
    let persons = engine.store().list_active_persons(tree.id).await.unwrap();
    assert_eq!(persons[0].given, "Joan");
  }

  #[tokio::test]
  async fn reconcile_twice_adds_nothing_the_second_time() {
    let engine = testing::engine().await;
    let owner = testing::user(&engine, "anna", UserRole::User).await;
    let tree = testing::tree(&engine, &owner, "Remote").await;
    let person = |id: &str, given: &str| RemotePerson {
      external_id: id.into(),
      given: given.into(),
      surname: "Puig".into(),
      ..RemotePerson::default()
    };
    let people = vec![person("F", "Pere"), person("M", "Rosa"), person("C", "Joan")];
    let families = vec![RemoteFamily {
      father_id: Some("F".into()),
      mother_id: Some("M".into()),
      children:  vec!["C".into(), "missing".into()],
    }];
    let cancel = CancellationToken::new();

    let first = reconcile(engine.store(), tree.id, &people, &families, &cancel).await.unwrap();
    assert_eq!((first.persons, first.relations), (3, 4));
    let second = reconcile(engine.store(), tree.id, &people, &families, &cancel).await.unwrap();
    assert_eq!((second.persons, second.relations), (0, 0));
  }

  #[tokio::test]
  async fn cancelled_replace_leaves_the_tree_untouched() {
    let engine = testing::engine().await;
    let owner = testing::user(&engine, "anna", UserRole::User).await;
    let tree = testing::tree(&engine, &owner, "Puig").await;
    testing::person(&engine, &tree, "Stale", "Entry", None).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err =
      ingest(engine.store(), tree.id, ImportMode::Replace, &arxiu_gedcom::parse(S1), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    let persons = engine.store().list_active_persons(tree.id).await.unwrap();
    assert_eq!(persons.len(), 1);
    assert_eq!(persons[0].given, "Stale");
  }

  #[tokio::test]
  async fn reimport_keeps_match_decisions() {
    let engine = testing::engine().await;
    let owner = testing::user(&engine, "anna", UserRole::User).await;
    let tree = testing::tree(&engine, &owner, "Puig").await;
    let cancel = CancellationToken::new();
    let parsed = arxiu_gedcom::parse(S1);
    ingest(engine.store(), tree.id, ImportMode::Replace, &parsed, &cancel).await.unwrap();

    let joan = engine
      .store()
      .find_person_by_external_id(tree.id, "I1".into())
      .await
      .unwrap()
      .unwrap();
    engine
      .store()
      .insert_match_if_absent(NewMatch {
        owner_id:    owner.id,
        tree_id:     tree.id,
        person_id:   joan.id,
        target_type: TargetType::RegistreRaw,
        target_id:   4,
        score:       0.9,
        reason:      MatchReason::default(),
      })
      .await
      .unwrap();
    let query = MatchQuery { owner_id: owner.id, ..MatchQuery::default() };
    let id = engine.store().list_matches(query.clone()).await.unwrap()[0].id;
    engine.decide_match(owner.id, id, MatchStatus::Accepted).await.unwrap();

    let summary =
      ingest(engine.store(), tree.id, ImportMode::Replace, &parsed, &cancel).await.unwrap();
    assert_eq!((summary.persons, summary.relations), (2, 3));

    let matches = engine.store().list_matches(query).await.unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].person_id, joan.id);
    assert_eq!(matches[0].status, MatchStatus::Accepted);
    assert_eq!(engine.match_decisions(owner.id, id).await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn cancellation_stops_ingest() {
    let engine = testing::engine().await;
    let owner = testing::user(&engine, "anna", UserRole::User).await;
    let tree = testing::tree(&engine, &owner, "Puig").await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = ingest(engine.store(), tree.id, ImportMode::Merge, &arxiu_gedcom::parse(S1), &cancel)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
  }
}

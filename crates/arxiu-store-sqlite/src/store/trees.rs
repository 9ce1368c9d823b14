use std::collections::{HashMap, HashSet};

use arxiu_core::{
  store::TreeStore,
  tree::{
    NewPerson, NewRelation, NewTree, ParentNames, Person, PersonId, PersonStatus,
    PersonUpdate, PersonVisibility, Relation, RelationRole, ReplaceOutcome, Tree, TreeId,
    TreeSnapshot, TreeStatus, TreeVisibility,
  },
  user::UserId,
};
use chrono::Utc;
use rusqlite::{OptionalExtension as _, TransactionBehavior};

use super::SqliteStore;
use crate::{
  Result,
  encode::{
    PERSON_COLUMNS, RELATION_COLUMNS, RawPerson, RawRelation, RawTree, TREE_COLUMNS,
    encode_dt, now,
  },
};

/// Empty external IDs are stored as NULL so they never collide.
fn external_key(id: Option<String>) -> Option<String> {
  id.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty())
}

impl SqliteStore {
  async fn persons_where(
    &self,
    clause: &'static str,
    params: Vec<rusqlite::types::Value>,
  ) -> Result<Vec<Person>> {
    let raws: Vec<RawPerson> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {PERSON_COLUMNS} FROM persons WHERE {clause} ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawPerson::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawPerson::into_person).collect()
  }

  async fn parents_by_role(&self, person_id: PersonId, role: RelationRole) -> Result<Vec<String>> {
    let parents = self
      .persons_where(
        "id IN (SELECT to_id FROM relations WHERE from_id = ?1 AND role = ?2)",
        vec![person_id.into(), role.to_string().into()],
      )
      .await?;
    Ok(
      parents
        .iter()
        .filter(|p| !p.is_empty())
        .map(Person::display_name)
        .collect(),
    )
  }
}

impl TreeStore for SqliteStore {
  // ── Trees ─────────────────────────────────────────────────────────────────

  async fn create_tree(&self, input: NewTree) -> Result<Tree> {
    let at = Utc::now();
    let at_str = encode_dt(at);
    let name = input.name.clone();
    let visibility = input.visibility.to_string();
    let status = TreeStatus::Active.to_string();
    let owner_id = input.owner_id;

    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO trees (owner_id, name, visibility, status, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
          rusqlite::params![owner_id, name, visibility, status, at_str],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(Tree {
      id,
      owner_id,
      name: input.name,
      visibility: input.visibility,
      status: TreeStatus::Active,
      created_at: at,
      updated_at: at,
    })
  }

  async fn get_tree(&self, id: TreeId) -> Result<Option<Tree>> {
    let raw: Option<RawTree> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {TREE_COLUMNS} FROM trees WHERE id = ?1"),
              [id],
              RawTree::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawTree::into_tree).transpose()
  }

  async fn list_trees(&self, owner_id: UserId) -> Result<Vec<Tree>> {
    let raws: Vec<RawTree> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {TREE_COLUMNS} FROM trees WHERE owner_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt
          .query_map([owner_id], RawTree::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawTree::into_tree).collect()
  }

  async fn update_tree(
    &self,
    id: TreeId,
    name: String,
    visibility: TreeVisibility,
    status: TreeStatus,
  ) -> Result<bool> {
    let (visibility, status, at) = (visibility.to_string(), status.to_string(), now());
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE trees SET name = ?2, visibility = ?3, status = ?4, updated_at = ?5
           WHERE id = ?1",
          rusqlite::params![id, name, visibility, status, at],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  // ── Persons ───────────────────────────────────────────────────────────────

  async fn create_person(&self, input: NewPerson) -> Result<Person> {
    let at = Utc::now();
    let at_str = encode_dt(at);
    let external_id = external_key(input.external_id.clone());
    let p = input.clone();
    let ext = external_id.clone();

    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO persons (
             tree_id, external_id, given, surname1, surname2, full_name, sex,
             birth_date, birth_place, death_date, death_place,
             visibility, status, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
          rusqlite::params![
            p.tree_id,
            ext,
            p.given,
            p.surname1,
            p.surname2,
            p.full_name,
            p.sex.to_string(),
            p.birth_date,
            p.birth_place,
            p.death_date,
            p.death_place,
            PersonVisibility::Visible.to_string(),
            PersonStatus::Active.to_string(),
            at_str,
          ],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(Person {
      id,
      tree_id: input.tree_id,
      external_id,
      given: input.given,
      surname1: input.surname1,
      surname2: input.surname2,
      full_name: input.full_name,
      sex: input.sex,
      birth_date: input.birth_date,
      birth_place: input.birth_place,
      death_date: input.death_date,
      death_place: input.death_place,
      visibility: PersonVisibility::Visible,
      status: PersonStatus::Active,
      created_at: at,
      updated_at: at,
    })
  }

  async fn get_person(&self, id: PersonId) -> Result<Option<Person>> {
    Ok(self.persons_where("id = ?1", vec![id.into()]).await?.pop())
  }

  async fn find_person_by_external_id(
    &self,
    tree_id: TreeId,
    external_id: String,
  ) -> Result<Option<Person>> {
    Ok(
      self
        .persons_where(
          "tree_id = ?1 AND external_id = ?2",
          vec![tree_id.into(), external_id.trim().to_owned().into()],
        )
        .await?
        .pop(),
    )
  }

  async fn update_person(&self, id: PersonId, update: PersonUpdate) -> Result<bool> {
    let at = now();
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE persons SET
             given = ?2, surname1 = ?3, surname2 = ?4, full_name = ?5, sex = ?6,
             birth_date = ?7, birth_place = ?8, death_date = ?9, death_place = ?10,
             updated_at = ?11
           WHERE id = ?1",
          rusqlite::params![
            id,
            update.given,
            update.surname1,
            update.surname2,
            update.full_name,
            update.sex.to_string(),
            update.birth_date,
            update.birth_place,
            update.death_date,
            update.death_place,
            at,
          ],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  async fn list_active_persons(&self, tree_id: TreeId) -> Result<Vec<Person>> {
    self
      .persons_where(
        "tree_id = ?1 AND status = ?2",
        vec![tree_id.into(), PersonStatus::Active.to_string().into()],
      )
      .await
  }

  async fn external_ids(&self, tree_id: TreeId) -> Result<HashMap<String, PersonId>> {
    let pairs: Vec<(String, PersonId)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT external_id, id FROM persons
           WHERE tree_id = ?1 AND external_id IS NOT NULL AND external_id != ''",
        )?;
        let rows = stmt
          .query_map([tree_id], |r| Ok((r.get(0)?, r.get(1)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(pairs.into_iter().collect())
  }

  async fn replace_tree(&self, tree_id: TreeId, snapshot: TreeSnapshot) -> Result<ReplaceOutcome> {
    let at = now();
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut outcome = ReplaceOutcome::default();

        let old: Vec<(PersonId, Option<String>)> = {
          let mut stmt = tx.prepare("SELECT id, external_id FROM persons WHERE tree_id = ?1")?;
          stmt
            .query_map([tree_id], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        let mut by_external: HashMap<String, PersonId> = old
          .iter()
          .filter_map(|(id, ext)| ext.clone().map(|e| (e, *id)))
          .collect();

        tx.execute("DELETE FROM relations WHERE tree_id = ?1", [tree_id])?;

        let mut ids = Vec::with_capacity(snapshot.persons.len());
        let mut kept = HashSet::new();
        for p in snapshot.persons {
          let ext = external_key(p.external_id);
          let existing = ext.as_ref().and_then(|e| by_external.get(e)).copied();
          let id = match existing {
            Some(id) => {
              tx.execute(
                "UPDATE persons SET
                   given = ?2, surname1 = ?3, surname2 = ?4, full_name = ?5, sex = ?6,
                   birth_date = ?7, birth_place = ?8, death_date = ?9, death_place = ?10,
                   status = ?11, updated_at = ?12
                 WHERE id = ?1",
                rusqlite::params![
                  id,
                  p.given,
                  p.surname1,
                  p.surname2,
                  p.full_name,
                  p.sex.to_string(),
                  p.birth_date,
                  p.birth_place,
                  p.death_date,
                  p.death_place,
                  PersonStatus::Active.to_string(),
                  at,
                ],
              )?;
              if !kept.contains(&id) {
                outcome.updated += 1;
              }
              id
            }
            None => {
              tx.execute(
                "INSERT INTO persons (
                   tree_id, external_id, given, surname1, surname2, full_name, sex,
                   birth_date, birth_place, death_date, death_place,
                   visibility, status, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
                rusqlite::params![
                  tree_id,
                  ext,
                  p.given,
                  p.surname1,
                  p.surname2,
                  p.full_name,
                  p.sex.to_string(),
                  p.birth_date,
                  p.birth_place,
                  p.death_date,
                  p.death_place,
                  PersonVisibility::Visible.to_string(),
                  PersonStatus::Active.to_string(),
                  at,
                ],
              )?;
              let id = tx.last_insert_rowid();
              if let Some(e) = ext {
                by_external.insert(e, id);
              }
              outcome.created += 1;
              id
            }
          };
          kept.insert(id);
          ids.push(id);
        }

        for (id, _) in &old {
          if !kept.contains(id) {
            outcome.removed += tx.execute("DELETE FROM persons WHERE id = ?1", [id])? as u64;
          }
        }

        for (from, to, role) in snapshot.edges {
          let (Some(&from_id), Some(&to_id)) = (ids.get(from), ids.get(to)) else {
            continue;
          };
          if from_id == to_id {
            continue;
          }
          outcome.relations += tx.execute(
            "INSERT OR IGNORE INTO relations (tree_id, from_id, to_id, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![tree_id, from_id, to_id, role.to_string(), at],
          )? as u64;
        }

        tx.commit()?;
        Ok(outcome)
      })
      .await?;
    Ok(outcome)
  }

  // ── Relations ─────────────────────────────────────────────────────────────

  async fn insert_relation_if_absent(&self, input: NewRelation) -> Result<bool> {
    if input.from_id == input.to_id {
      return Ok(false);
    }
    let role = input.role.to_string();
    let at = now();
    let inserted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "INSERT OR IGNORE INTO relations (tree_id, from_id, to_id, role, created_at)
           SELECT ?1, ?2, ?3, ?4, ?5
           WHERE EXISTS (SELECT 1 FROM persons WHERE id = ?2 AND tree_id = ?1)
             AND EXISTS (SELECT 1 FROM persons WHERE id = ?3 AND tree_id = ?1)",
          rusqlite::params![input.tree_id, input.from_id, input.to_id, role, at],
        )?)
      })
      .await?;
    Ok(inserted > 0)
  }

  async fn list_relations(&self, tree_id: TreeId) -> Result<Vec<Relation>> {
    let raws: Vec<RawRelation> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {RELATION_COLUMNS} FROM relations WHERE tree_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt
          .query_map([tree_id], RawRelation::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawRelation::into_relation).collect()
  }

  async fn parent_names(&self, person_id: PersonId) -> Result<ParentNames> {
    Ok(ParentNames {
      fathers: self.parents_by_role(person_id, RelationRole::Father).await?,
      mothers: self.parents_by_role(person_id, RelationRole::Mother).await?,
    })
  }
}

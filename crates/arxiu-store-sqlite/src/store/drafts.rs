use arxiu_core::{
  draft::{
    DraftContent, DraftQuery, DraftStatus, DraftUpdate, DraftVersion, EntityId, EntityKind,
    LockOutcome, ModeratedEntity, Moderation, VersionId,
  },
  store::DraftStore,
  user::UserId,
};
use rusqlite::{OptionalExtension as _, types::Value};

use super::{SqliteStore, page};
use crate::{
  Error, Result,
  encode::{ENTITY_COLUMNS, RawEntity, RawVersion, VERSION_COLUMNS, now},
};

fn draft_filter(query: &DraftQuery) -> (String, Vec<Value>) {
  let mut clause = String::from("1 = 1");
  let mut params: Vec<Value> = Vec::new();
  if let Some(status) = query.status {
    clause.push_str(" AND status = ?");
    params.push(status.to_string().into());
  }
  if let Some(kind) = query.kind {
    clause.push_str(" AND content_kind = ?");
    params.push(kind.to_string().into());
  }
  if let Some(user_id) = query.created_by {
    clause.push_str(" AND created_by = ?");
    params.push(user_id.into());
  }
  (clause, params)
}

impl SqliteStore {
  async fn versions_where(&self, clause: String, params: Vec<Value>) -> Result<Vec<DraftVersion>> {
    let raws: Vec<RawVersion> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {VERSION_COLUMNS} FROM draft_versions WHERE {clause}");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawVersion::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawVersion::into_version).collect()
  }
}

impl DraftStore for SqliteStore {
  async fn create_entity(&self, kind: EntityKind, created_by: UserId) -> Result<ModeratedEntity> {
    let at = now();
    let kind = kind.to_string();
    let raw: RawEntity = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO moderated_entities (kind, created_by, created_at) VALUES (?1, ?2, ?3)",
          rusqlite::params![kind, created_by, at],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
          &format!("SELECT {ENTITY_COLUMNS} FROM moderated_entities WHERE id = ?1"),
          [id],
          RawEntity::from_row,
        )?)
      })
      .await?;
    raw.into_entity()
  }

  async fn get_entity(&self, id: EntityId) -> Result<Option<ModeratedEntity>> {
    let raw: Option<RawEntity> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {ENTITY_COLUMNS} FROM moderated_entities WHERE id = ?1"),
              [id],
              RawEntity::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawEntity::into_entity).transpose()
  }

  async fn create_draft(
    &self,
    entity_id: EntityId,
    user_id: UserId,
    force_new: bool,
    content: DraftContent,
  ) -> Result<DraftVersion> {
    let at = now();
    let kind = content.kind().to_string();
    let data = serde_json::to_string(&content.to_json()?)?;
    let draft = DraftStatus::Draft.to_string();

    let raw: RawVersion = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let existing = if force_new {
          None
        } else {
          tx.query_row(
            &format!(
              "SELECT {VERSION_COLUMNS} FROM draft_versions
               WHERE entity_id = ?1 AND created_by = ?2 AND status = ?3
               ORDER BY id DESC LIMIT 1"
            ),
            rusqlite::params![entity_id, user_id, draft],
            RawVersion::from_row,
          )
          .optional()?
        };
        if let Some(raw) = existing {
          return Ok(raw);
        }

        tx.execute(
          "INSERT INTO draft_versions (
             entity_id, status, content_kind, content_json, created_by,
             lock_version, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)",
          rusqlite::params![entity_id, draft, kind, data, user_id, at],
        )?;
        let id = tx.last_insert_rowid();
        let raw = tx.query_row(
          &format!("SELECT {VERSION_COLUMNS} FROM draft_versions WHERE id = ?1"),
          [id],
          RawVersion::from_row,
        )?;
        tx.commit()?;
        Ok(raw)
      })
      .await?;
    raw.into_version()
  }

  async fn get_version(&self, id: VersionId) -> Result<Option<DraftVersion>> {
    Ok(self.versions_where("id = ?".into(), vec![id.into()]).await?.pop())
  }

  async fn update_draft(&self, update: DraftUpdate) -> Result<LockOutcome> {
    let at = now();
    let kind = update.content.kind().to_string();
    let data = serde_json::to_string(&update.content.to_json()?)?;
    let draft = DraftStatus::Draft.to_string();
    let DraftUpdate { version_id, lock_version, .. } = update;

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let changed = tx.execute(
          "UPDATE draft_versions SET
             content_kind = ?3, content_json = ?4,
             lock_version = lock_version + 1, updated_at = ?5
           WHERE id = ?1 AND lock_version = ?2 AND status = ?6",
          rusqlite::params![version_id, lock_version, kind, data, at, draft],
        )?;
        let current: Option<i64> = tx
          .query_row(
            "SELECT lock_version FROM draft_versions WHERE id = ?1",
            [version_id],
            |r| r.get(0),
          )
          .optional()?;
        tx.commit()?;
        Ok(match (changed, current) {
          (_, None) => LockOutcome::Missing,
          (0, Some(current)) => LockOutcome::Stale { current },
          (_, Some(lock_version)) => LockOutcome::Saved { lock_version },
        })
      })
      .await?;
    Ok(outcome)
  }

  async fn set_draft_status(
    &self,
    id: VersionId,
    from: DraftStatus,
    to: DraftStatus,
    moderation: Moderation,
  ) -> Result<bool> {
    let (from, to, at) = (from.to_string(), to.to_string(), now());
    let Moderation { moderator_id, notes } = moderation;
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE draft_versions SET
             status           = ?3,
             moderator_id     = COALESCE(?4, moderator_id),
             moderation_notes = COALESCE(?5, moderation_notes),
             moderated_at     = CASE WHEN ?4 IS NULL THEN moderated_at ELSE ?6 END,
             updated_at       = ?6
           WHERE id = ?1 AND status = ?2",
          rusqlite::params![id, from, to, moderator_id, notes, at],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  async fn approve_version(&self, id: VersionId, moderation: Moderation) -> Result<bool> {
    let at = now();
    let (pending, published) =
      (DraftStatus::Pending.to_string(), DraftStatus::Published.to_string());
    let Moderation { moderator_id, notes } = moderation;

    let approved = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let changed = tx.execute(
          "UPDATE draft_versions SET
             status = ?3, moderator_id = ?4, moderation_notes = ?5,
             moderated_at = ?6, updated_at = ?6
           WHERE id = ?1 AND status = ?2",
          rusqlite::params![id, pending, published, moderator_id, notes, at],
        )?;
        if changed == 0 {
          return Ok(false);
        }
        tx.execute(
          "UPDATE moderated_entities SET current_version_id = ?1
           WHERE id = (SELECT entity_id FROM draft_versions WHERE id = ?1)",
          [id],
        )?;
        tx.commit()?;
        Ok(true)
      })
      .await?;
    Ok(approved)
  }

  async fn set_current_version(&self, entity_id: EntityId, version_id: VersionId) -> Result<()> {
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE moderated_entities SET current_version_id = ?2 WHERE id = ?1",
          rusqlite::params![entity_id, version_id],
        )?)
      })
      .await?;
    if changed == 0 {
      return Err(Error::NotFound { entity: "moderated entity", id: entity_id });
    }
    Ok(())
  }

  async fn list_versions(&self, entity_id: EntityId) -> Result<Vec<DraftVersion>> {
    self
      .versions_where("entity_id = ? ORDER BY id".into(), vec![entity_id.into()])
      .await
  }

  async fn list_drafts(&self, query: DraftQuery) -> Result<Vec<DraftVersion>> {
    let (clause, mut params) = draft_filter(&query);
    let (limit, offset) = page(query.limit, query.offset);
    params.extend([limit.into(), offset.into()]);
    let sql = format!("{clause} ORDER BY updated_at DESC, id DESC LIMIT ? OFFSET ?");
    self.versions_where(sql, params).await
  }

  async fn count_drafts(&self, query: DraftQuery) -> Result<u64> {
    let (clause, params) = draft_filter(&query);
    let n: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          &format!("SELECT COUNT(*) FROM draft_versions WHERE {clause}"),
          rusqlite::params_from_iter(params),
          |r| r.get(0),
        )?)
      })
      .await?;
    Ok(u64::try_from(n).unwrap_or(0))
  }
}

use arxiu_core::{
  import::{ImportJob, ImportSource, JobId, JobStatus, JobUpdate, NewImportJob, NewSource, SourceId},
  store::ImportStore,
  user::UserId,
};
use rusqlite::OptionalExtension as _;

use super::SqliteStore;
use crate::{
  Error, Result,
  encode::{JOB_COLUMNS, RawJob, RawSource, SOURCE_COLUMNS, now},
};

impl SqliteStore {
  async fn jobs_where(
    &self,
    clause: &'static str,
    params: Vec<rusqlite::types::Value>,
  ) -> Result<Vec<ImportJob>> {
    let raws: Vec<RawJob> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {JOB_COLUMNS} FROM import_jobs WHERE {clause}");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawJob::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawJob::into_job).collect()
  }
}

impl ImportStore for SqliteStore {
  async fn upsert_source_by_checksum(&self, input: NewSource) -> Result<(ImportSource, bool)> {
    let at = now();
    let size = i64::try_from(input.size_bytes).unwrap_or(i64::MAX);

    let (raw, created): (RawSource, bool) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let inserted = tx.execute(
          "INSERT OR IGNORE INTO import_sources (
             owner_id, source_type, original_filename, storage_path,
             size_bytes, checksum, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![
            input.owner_id,
            input.source_type.to_string(),
            input.original_filename,
            input.storage_path,
            size,
            input.checksum,
            at,
          ],
        )?;
        let raw = tx.query_row(
          &format!(
            "SELECT {SOURCE_COLUMNS} FROM import_sources WHERE owner_id = ?1 AND checksum = ?2"
          ),
          rusqlite::params![input.owner_id, input.checksum],
          RawSource::from_row,
        )?;
        tx.commit()?;
        Ok((raw, inserted > 0))
      })
      .await?;

    Ok((raw.into_source()?, created))
  }

  async fn get_source(&self, id: SourceId) -> Result<Option<ImportSource>> {
    let raw: Option<RawSource> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {SOURCE_COLUMNS} FROM import_sources WHERE id = ?1"),
              [id],
              RawSource::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawSource::into_source).transpose()
  }

  async fn create_job(&self, input: NewImportJob) -> Result<ImportJob> {
    let at = now();
    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO import_jobs (
             owner_id, tree_id, source_id, connection_id, job_type, mode,
             status, created_by, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
          rusqlite::params![
            input.owner_id,
            input.tree_id,
            input.source_id,
            input.connection_id,
            input.job_type.to_string(),
            input.mode.to_string(),
            JobStatus::Queued.to_string(),
            input.created_by,
            at,
          ],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    self
      .get_job(id)
      .await?
      .ok_or(Error::NotFound { entity: "import job", id })
  }

  async fn get_job(&self, id: JobId) -> Result<Option<ImportJob>> {
    Ok(self.jobs_where("id = ?1", vec![id.into()]).await?.pop())
  }

  async fn latest_job_for_source(&self, source_id: SourceId) -> Result<Option<ImportJob>> {
    Ok(
      self
        .jobs_where("source_id = ?1 ORDER BY id DESC LIMIT 1", vec![source_id.into()])
        .await?
        .pop(),
    )
  }

  async fn list_queued_jobs(&self, limit: usize) -> Result<Vec<ImportJob>> {
    self
      .jobs_where("status = ?1 ORDER BY created_at, id LIMIT ?2", vec![
        JobStatus::Queued.to_string().into(),
        i64::try_from(limit).unwrap_or(i64::MAX).into(),
      ])
      .await
  }

  async fn list_jobs(&self, owner_id: UserId) -> Result<Vec<ImportJob>> {
    self
      .jobs_where("owner_id = ?1 ORDER BY id DESC", vec![owner_id.into()])
      .await
  }

  async fn update_job(&self, id: JobId, update: JobUpdate) -> Result<()> {
    let at = now();
    let status = update.status.to_string();
    let terminal = update.status.is_terminal();
    let leaving_queue = update.status != JobStatus::Queued;
    let (done, total) = match update.progress {
      Some(p) => (
        Some(i64::try_from(p.done).unwrap_or(i64::MAX)),
        Some(i64::try_from(p.total).unwrap_or(i64::MAX)),
      ),
      None => (None, None),
    };
    let summary = update.summary.as_ref().map(serde_json::to_string).transpose()?;
    let error_message = update.error_message;

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE import_jobs SET
             status         = ?2,
             progress_done  = COALESCE(?3, progress_done),
             progress_total = COALESCE(?4, progress_total),
             error_message  = COALESCE(?5, error_message),
             summary_json   = COALESCE(?6, summary_json),
             started_at     = CASE WHEN ?7 AND started_at IS NULL THEN ?9 ELSE started_at END,
             finished_at    = CASE WHEN ?8 THEN ?9 ELSE finished_at END
           WHERE id = ?1",
          rusqlite::params![
            id,
            status,
            done,
            total,
            error_message,
            summary,
            leaving_queue,
            terminal,
            at
          ],
        )?)
      })
      .await?;

    if changed == 0 {
      return Err(Error::NotFound { entity: "import job", id });
    }
    Ok(())
  }
}

//! Polling import worker.
//!
//! Each tick pulls a batch of queued jobs, oldest first, and starts every job
//! whose owner still has a free slot in the gate. A job runs on its own task;
//! the gate slot travels with it and is released when the task ends, whether
//! the job finished, failed or panicked.

use std::{path::Path, sync::Arc};

use arxiu_core::{
  import::{ImportJob, ImportSummary, JobId, JobStatus, JobUpdate, SourceType},
  notification::NotificationKind,
  store::{GroupStore, ImportStore, Store},
  tree::TreeId,
  user::UserId,
};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{Engine, Error, Result, normalize, notify::Notice, sync::SyncOutcome};

impl<S: Store + 'static> Engine<S> {
  /// Worker loop. Exits when `cancel` fires, after the jobs it started have
  /// wound down.
  pub async fn run_import_worker(self: Arc<Self>, cancel: CancellationToken) {
    let cfg = &self.config.import;
    let mut ticker = tokio::time::interval(cfg.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(
      poll_seconds = cfg.poll_seconds,
      batch = cfg.batch,
      max_per_owner = cfg.max_per_owner,
      "import worker started"
    );

    let mut running: Vec<JoinHandle<()>> = Vec::new();
    loop {
      tokio::select! {
        biased;
        _ = cancel.cancelled() => break,
        _ = ticker.tick() => {}
      }
      running.retain(|h| !h.is_finished());
      match self.import_tick(&cancel).await {
        Ok(started) => running.extend(started),
        Err(e) => tracing::error!(error = %e, "import tick failed"),
      }
    }

    for handle in running {
      if let Err(e) = handle.await {
        tracing::warn!(error = %e, "import task did not finish cleanly");
      }
    }
    tracing::info!("import worker stopped");
  }

  /// Start every admissible queued job. Returns the handles of the started
  /// tasks.
  pub async fn import_tick(
    self: &Arc<Self>,
    cancel: &CancellationToken,
  ) -> Result<Vec<JoinHandle<()>>> {
    let cfg = &self.config.import;
    let queued = self.store.list_queued_jobs(cfg.batch).await.map_err(Error::store)?;
    let mut started = Vec::new();

    for job in queued {
      let Some(slot) = self.gate.try_acquire(job.owner_id, job.id, cfg.max_per_owner) else {
        tracing::debug!(job_id = job.id, owner_id = job.owner_id, "owner at capacity");
        continue;
      };
      let engine = Arc::clone(self);
      let cancel = cancel.clone();
      started.push(tokio::spawn(async move {
        let _slot = slot;
        let (id, owner_id, tree_id) = (job.id, job.owner_id, job.tree_id);
        let run = {
          let engine = Arc::clone(&engine);
          tokio::spawn(async move { engine.run_job(job, &cancel).await })
        };
        let result = match run.await {
          Ok(result) => result,
          Err(e) if e.is_panic() => Err(Error::Task("job panicked".into())),
          Err(e) => Err(Error::Task(e.to_string())),
        };
        if let Err(e) = result {
          engine.fail_job(id, owner_id, tree_id, &e).await;
        }
      }));
    }
    Ok(started)
  }

  async fn run_job(&self, job: ImportJob, cancel: &CancellationToken) -> Result<()> {
    tracing::info!(
      job_id = job.id,
      owner_id = job.owner_id,
      tree_id = job.tree_id,
      job_type = %job.job_type,
      mode = %job.mode,
      "import started"
    );
    let summary = match job.job_type {
      SourceType::Gedcom => self.run_gedcom(&job, cancel).await?,
      SourceType::Gramps => self.run_gramps(&job, cancel).await?,
    };

    let update = JobUpdate::done(summary.clone()).with_progress(summary.persons, summary.persons);
    self.store.update_job(job.id, update).await.map_err(Error::store)?;
    tracing::info!(
      job_id = job.id,
      persons = summary.persons,
      families = summary.families,
      relations = summary.relations,
      errors = summary.errors,
      "import done"
    );
    self.after_import(&job, &summary).await;
    Ok(())
  }

  async fn run_gedcom(
    &self,
    job: &ImportJob,
    cancel: &CancellationToken,
  ) -> Result<ImportSummary> {
    self.set_status(job.id, JobUpdate::status(JobStatus::Parsing)).await?;
    let source_id = job.source_id.ok_or(Error::NotFound("import source"))?;
    let source = self
      .store
      .get_source(source_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound("import source"))?;
    let bytes = read_upload(Path::new(&source.storage_path)).await?;
    if cancel.is_cancelled() {
      return Err(Error::Cancelled);
    }

    let mut parsed = tokio::task::spawn_blocking(move || arxiu_gedcom::parse(&bytes))
      .await
      .map_err(|e| Error::Task(e.to_string()))?;
    if parsed.persons.is_empty() && !parsed.errors.is_empty() {
      return Err(Error::Gedcom(parsed.errors.remove(0)));
    }

    let total = parsed.persons.len() as u64;
    let normalizing = JobUpdate::status(JobStatus::Normalizing).with_progress(0, total);
    self.set_status(job.id, normalizing).await?;
    let summary = normalize::ingest(&*self.store, job.tree_id, job.mode, &parsed, cancel).await?;
    let persisted = JobUpdate::status(JobStatus::Persisted).with_progress(summary.persons, total);
    self.set_status(job.id, persisted).await?;
    Ok(summary)
  }

  async fn run_gramps(
    &self,
    job: &ImportJob,
    cancel: &CancellationToken,
  ) -> Result<ImportSummary> {
    let connection_id = self.connection_for_job(job).await?;
    let summary = match self.sync_for_job(connection_id, true, Some(job.id), cancel).await? {
      SyncOutcome::Synced { summary } => summary,
      SyncOutcome::Failed { message } => return Err(Error::SyncFailed(message)),
      SyncOutcome::Busy => return Err(Error::Conflict("a sync is already running".into())),
      SyncOutcome::Disabled => return Err(Error::Conflict("connection is disabled".into())),
      SyncOutcome::Deferred => return Err(Error::Conflict("sync deferred".into())),
    };
    self.set_status(job.id, JobUpdate::status(JobStatus::Persisted)).await?;
    Ok(summary)
  }

  pub(crate) async fn set_status(&self, id: JobId, update: JobUpdate) -> Result<()> {
    tracing::debug!(job_id = id, status = %update.status, "job status");
    self.store.update_job(id, update).await.map_err(Error::store)
  }

  async fn fail_job(&self, id: JobId, owner_id: UserId, tree_id: TreeId, error: &Error) {
    let message = error.to_string();
    tracing::error!(job_id = id, owner_id, error = %message, "import failed");
    if let Err(e) = self.store.update_job(id, JobUpdate::failed(message.clone())).await {
      tracing::error!(job_id = id, error = %e, "could not record job failure");
    }
    let notice = Notice::new(NotificationKind::ImportError, "Import failed", message)
      .tree(tree_id)
      .object(id);
    self.notify_quietly(owner_id, notice).await;
  }

  /// Follow-up work after a successful import. Failures are logged; the job
  /// stays `done`.
  async fn after_import(&self, job: &ImportJob, summary: &ImportSummary) {
    let body = format!("{} persons, {} relations", summary.persons, summary.relations);
    let notice = Notice::new(NotificationKind::ImportDone, "Import finished", body)
      .tree(job.tree_id)
      .object(job.id);
    self.notify_quietly(job.owner_id, notice).await;

    match self.rebuild_matches(job.owner_id, job.tree_id).await {
      Ok(created) => tracing::debug!(tree_id = job.tree_id, created, "matches rebuilt"),
      Err(e) => tracing::warn!(tree_id = job.tree_id, error = %e, "match rebuild failed"),
    }

    let groups = match self.store.groups_for_tree(job.tree_id).await {
      Ok(groups) => groups,
      Err(e) => {
        tracing::warn!(tree_id = job.tree_id, error = %e, "could not list linked groups");
        return;
      }
    };
    for group_id in groups {
      if let Err(e) = self.refresh_conflicts(group_id).await {
        tracing::warn!(group_id, error = %e, "conflict refresh failed");
      }
    }
  }
}

async fn read_upload(path: &Path) -> Result<Vec<u8>> {
  match tokio::fs::read(path).await {
    Ok(bytes) => Ok(bytes),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound("import file")),
    Err(e) => Err(e.into()),
  }
}

#[cfg(test)]
mod tests {
  use arxiu_core::{import::ImportMode, store::TreeStore, user::UserRole};
  use axum::{Json, Router, routing::get};
  use serde_json::json;

  use super::*;
  use crate::{EngineConfig, testing};

  const S1: &[u8] = b"0 HEAD\n\
    0 @I1@ INDI\n1 NAME Joan /Puig/\n1 SEX M\n1 BIRT\n2 DATE 1 JAN 1900\n\
    0 @I2@ INDI\n1 NAME Maria /Soler/\n1 SEX F\n\
    0 @F1@ FAM\n1 HUSB @I1@\n1 WIFE @I2@\n1 CHIL @I1@\n\
    0 TRLR\n";

  fn config(root: &Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.upload.gedcom_root = root.to_path_buf();
    config
  }

  async fn drain(handles: Vec<JoinHandle<()>>) {
    for h in handles {
      h.await.unwrap();
    }
  }

  #[tokio::test]
  async fn gedcom_job_runs_to_done() {
    let dir = tempfile::tempdir().unwrap();
    let engine = testing::engine_with(config(dir.path())).await;
    let owner = testing::user(&engine, "anna", UserRole::User).await;
    let tree = testing::tree(&engine, &owner, "Puig").await;
    let receipt =
      engine.upload_gedcom(owner.id, tree.id, "s1.ged", S1, ImportMode::Replace).await.unwrap();
    let job_id = receipt.job.unwrap().id;

    let cancel = CancellationToken::new();
    let started = engine.import_tick(&cancel).await.unwrap();
    assert_eq!(started.len(), 1);
    drain(started).await;

    let job = engine.job(owner.id, job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Done, "{:?}", job.error_message);
    assert!(job.started_at.is_some() && job.finished_at.is_some());
    let summary = job.summary.unwrap();
    assert_eq!((summary.persons, summary.families, summary.relations), (2, 1, 3));
    assert_eq!(engine.store().list_relations(tree.id).await.unwrap().len(), 3);

    let inbox = engine.notifications(owner.id, true, 10, 0).await.unwrap();
    assert!(inbox.iter().any(|n| n.kind == NotificationKind::ImportDone));
    assert_eq!(engine.gate.active(owner.id), 0);
  }

  #[tokio::test]
  async fn one_slot_per_owner_runs_jobs_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let engine = testing::engine_with(config(dir.path())).await;
    let owner = testing::user(&engine, "anna", UserRole::User).await;
    let tree = testing::tree(&engine, &owner, "Puig").await;
    let first =
      engine.upload_gedcom(owner.id, tree.id, "a.ged", S1, ImportMode::Replace).await.unwrap();
    let other = b"0 HEAD\n0 @I9@ INDI\n1 NAME Pere /Vila/\n0 TRLR\n";
    let second =
      engine.upload_gedcom(owner.id, tree.id, "b.ged", other, ImportMode::Merge).await.unwrap();
    let (a, b) = (first.job.unwrap().id, second.job.unwrap().id);
    let cancel = CancellationToken::new();

    let started = engine.import_tick(&cancel).await.unwrap();
    assert_eq!(started.len(), 1);
    drain(started).await;
    assert_eq!(engine.job(owner.id, a).await.unwrap().status, JobStatus::Done);
    assert_eq!(engine.job(owner.id, b).await.unwrap().status, JobStatus::Queued);

    drain(engine.import_tick(&cancel).await.unwrap()).await;
    let (a, b) = (engine.job(owner.id, a).await.unwrap(), engine.job(owner.id, b).await.unwrap());
    assert_eq!(b.status, JobStatus::Done);
    assert!(a.finished_at.unwrap() <= b.started_at.unwrap());
    assert_eq!(engine.store().list_active_persons(tree.id).await.unwrap().len(), 3);
  }

  #[tokio::test]
  async fn missing_file_fails_the_job_and_frees_the_slot() {
    let dir = tempfile::tempdir().unwrap();
    let engine = testing::engine_with(config(dir.path())).await;
    let owner = testing::user(&engine, "anna", UserRole::User).await;
    let tree = testing::tree(&engine, &owner, "Puig").await;
    let receipt =
      engine.upload_gedcom(owner.id, tree.id, "s1.ged", S1, ImportMode::Replace).await.unwrap();
    std::fs::remove_file(&receipt.source.storage_path).unwrap();

    drain(engine.import_tick(&CancellationToken::new()).await.unwrap()).await;
    let job = engine.job(owner.id, receipt.job.unwrap().id).await.unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.error_message.as_deref(), Some("import file not found"));
    assert_eq!(engine.gate.active(owner.id), 0);
    let inbox = engine.notifications(owner.id, true, 10, 0).await.unwrap();
    assert!(inbox.iter().any(|n| n.kind == NotificationKind::ImportError));
  }

  #[tokio::test]
  async fn headerless_file_and_cancellation_fail() {
    let dir = tempfile::tempdir().unwrap();
    let engine = testing::engine_with(config(dir.path())).await;
    let owner = testing::user(&engine, "anna", UserRole::User).await;
    let tree = testing::tree(&engine, &owner, "Puig").await;
    let bad = engine
      .upload_gedcom(owner.id, tree.id, "bad.ged", b"1 NAME x\n", ImportMode::Replace)
      .await
      .unwrap();
    drain(engine.import_tick(&CancellationToken::new()).await.unwrap()).await;
    let job = engine.job(owner.id, bad.job.unwrap().id).await.unwrap();
    assert_eq!(job.status, JobStatus::Error);

    let ok =
      engine.upload_gedcom(owner.id, tree.id, "s1.ged", S1, ImportMode::Replace).await.unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    drain(engine.import_tick(&cancel).await.unwrap()).await;
    let job = engine.job(owner.id, ok.job.unwrap().id).await.unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.error_message.as_deref(), Some("cancelled"));
  }

  #[tokio::test]
  async fn sync_job_goes_through_the_connection() {
    let router = Router::new()
      .route("/api/health", get(|| async { "ok" }))
      .route(
        "/api/people/",
        get(|| async { Json(json!([{ "gramps_id": "I1", "first_name": "Joan" }])) }),
      )
      .route("/api/families/", get(|| async { Json(json!([])) }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

    let engine = testing::engine().await;
    let owner = testing::user(&engine, "anna", UserRole::User).await;
    let tree = testing::tree(&engine, &owner, "Remote").await;
    let conn = engine.create_connection(owner.id, tree.id, &url, None, "tok").await.unwrap();
    let job = engine.enqueue_sync(owner.id, conn.id).await.unwrap();

    drain(engine.import_tick(&CancellationToken::new()).await.unwrap()).await;
    let job = engine.job(owner.id, job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Done, "{:?}", job.error_message);
    assert_eq!(job.summary.unwrap().persons, 1);
    let person = engine
      .store()
      .find_person_by_external_id(tree.id, "gramps:I1".into())
      .await
      .unwrap();
    assert!(person.is_some());
  }

  #[tokio::test]
  async fn sync_job_is_parsing_while_the_remote_is_fetched() {
    let engine = testing::engine().await;
    let owner = testing::user(&engine, "anna", UserRole::User).await;
    let tree = testing::tree(&engine, &owner, "Remote").await;
    let job_id = Arc::new(std::sync::OnceLock::<JobId>::new());
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

    let people = {
      let (engine, job_id, seen) = (engine.clone(), job_id.clone(), seen.clone());
      move || async move {
        if let Some(&id) = job_id.get() {
          let job = engine.store().get_job(id).await.unwrap().unwrap();
          seen.lock().unwrap().push(job.status);
        }
        Json(json!([{ "gramps_id": "I1", "first_name": "Joan" }]))
      }
    };
    let router = Router::new()
      .route("/api/health", get(|| async { "ok" }))
      .route("/api/people/", get(people))
      .route("/api/families/", get(|| async { Json(json!([])) }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

    let conn = engine.create_connection(owner.id, tree.id, &url, None, "tok").await.unwrap();
    let job = engine.enqueue_sync(owner.id, conn.id).await.unwrap();
    job_id.set(job.id).unwrap();

    drain(engine.import_tick(&CancellationToken::new()).await.unwrap()).await;
    assert_eq!(*seen.lock().unwrap(), vec![JobStatus::Parsing]);
    let job = engine.job(owner.id, job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Done, "{:?}", job.error_message);
  }
}

//! External connections and the single-flight, backoff-protected sync
//! scheduler.
//!
//! In-memory state is process-wide and guarded by one mutex that is never
//! held across an await:
//!
//! - `in_flight`: connections with a sync running right now;
//! - `failures`: consecutive failures, seeded from the stored counter;
//! - `blocked`: connections whose credentials were rejected. Unforced syncs
//!   skip them until the credentials are updated.

use std::{
  collections::{HashMap, HashSet},
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use arxiu_core::{
  connection::{ConnectionId, ConnectionStatus, ExternalConnection, NewConnection, SyncLogEntry},
  import::{ImportSummary, JobId, JobStatus, JobUpdate},
  notification::NotificationKind,
  store::{ConnectionStore, Store},
  tree::TreeId,
  user::UserId,
};
use arxiu_gramps::{GrampsClient, GrampsConfig};
use chrono::{Duration, Utc};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{Engine, Error, Result, normalize, notify::Notice};

const MAX_BACKOFF_HOURS: i64 = 2;
const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Delay before the next unforced attempt after `failures` consecutive
/// failures: `base × 2^(failures-1)`, failures clamped to `[1, 6]`, capped
/// at two hours.
pub fn backoff_delay(base: Duration, failures: u32) -> Duration {
  let exponent = failures.clamp(1, MAX_BACKOFF_EXPONENT) - 1;
  (base * 2_i32.pow(exponent)).min(Duration::hours(MAX_BACKOFF_HOURS))
}

/// What one sync attempt did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
  /// Another sync of the same connection is running.
  Busy,
  /// Skipped: within the backoff window or waiting for new credentials.
  Deferred,
  Disabled,
  Synced { summary: ImportSummary },
  Failed { message: String },
}

// ─── In-memory state ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Inner {
  in_flight: HashSet<ConnectionId>,
  failures:  HashMap<ConnectionId, u32>,
  blocked:   HashSet<ConnectionId>,
}

#[derive(Debug, Default)]
pub(crate) struct SyncState {
  inner: Mutex<Inner>,
}

impl SyncState {
  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn begin(&self, id: ConnectionId) -> Option<FlightGuard<'_>> {
    let inserted = self.lock().in_flight.insert(id);
    inserted.then(|| FlightGuard { state: self, id })
  }

  fn is_blocked(&self, id: ConnectionId) -> bool { self.lock().blocked.contains(&id) }

  /// Count one more failure and return the new total.
  fn fail(&self, id: ConnectionId, stored: u32, block: bool) -> u32 {
    let mut inner = self.lock();
    let count = inner.failures.entry(id).or_insert(stored);
    *count = (*count).max(stored).saturating_add(1);
    let total = *count;
    if block {
      inner.blocked.insert(id);
    }
    total
  }

  fn clear(&self, id: ConnectionId) {
    let mut inner = self.lock();
    inner.failures.remove(&id);
    inner.blocked.remove(&id);
  }
}

struct FlightGuard<'a> {
  state: &'a SyncState,
  id:    ConnectionId,
}

impl Drop for FlightGuard<'_> {
  fn drop(&mut self) { self.state.lock().in_flight.remove(&self.id); }
}

// ─── Connections ─────────────────────────────────────────────────────────────

impl<S: Store + 'static> Engine<S> {
  /// The connection, if `owner_id` owns it.
  pub async fn owned_connection(
    &self,
    owner_id: UserId,
    id: ConnectionId,
  ) -> Result<ExternalConnection> {
    self
      .store
      .get_connection(id)
      .await
      .map_err(Error::store)?
      .filter(|c| c.owner_id == owner_id)
      .ok_or(Error::NotFound("external connection"))
  }

  pub async fn connection_for_tree(
    &self,
    owner_id: UserId,
    tree_id: TreeId,
  ) -> Result<Option<ExternalConnection>> {
    self.owned_tree(owner_id, tree_id).await?;
    self.store.find_connection_for_tree(tree_id).await.map_err(Error::store)
  }

  /// Bind `tree_id` to a remote server. The token is sealed before it is
  /// stored; at most one connection exists per tree.
  pub async fn create_connection(
    &self,
    owner_id: UserId,
    tree_id: TreeId,
    base_url: &str,
    username: Option<&str>,
    token: &str,
  ) -> Result<ExternalConnection> {
    self.owned_tree(owner_id, tree_id).await?;
    if self.store.find_connection_for_tree(tree_id).await.map_err(Error::store)?.is_some() {
      return Err(Error::Conflict("tree already has an external connection".into()));
    }
    let (base_url, username, token_sealed) = self.seal_credentials(base_url, username, token)?;
    let conn = self
      .store
      .create_connection(NewConnection { owner_id, tree_id, base_url, username, token_sealed })
      .await
      .map_err(Error::store)?;
    tracing::info!(owner_id, tree_id, connection_id = conn.id, "external connection created");
    Ok(conn)
  }

  /// Replace the endpoint and token. Clears the failure state so the next
  /// scheduled sync runs.
  pub async fn update_credentials(
    &self,
    owner_id: UserId,
    id: ConnectionId,
    base_url: &str,
    username: Option<&str>,
    token: &str,
  ) -> Result<ExternalConnection> {
    self.owned_connection(owner_id, id).await?;
    let (base_url, username, token_sealed) = self.seal_credentials(base_url, username, token)?;
    self
      .store
      .update_connection_credentials(id, base_url, username, token_sealed)
      .await
      .map_err(Error::store)?;
    self.sync.clear(id);
    tracing::info!(owner_id, connection_id = id, "connection credentials updated");
    self.owned_connection(owner_id, id).await
  }

  pub async fn set_connection_enabled(
    &self,
    owner_id: UserId,
    id: ConnectionId,
    enabled: bool,
  ) -> Result<ExternalConnection> {
    let conn = self.owned_connection(owner_id, id).await?;
    let status = match (enabled, conn.status) {
      (false, _) => ConnectionStatus::Disabled,
      (true, ConnectionStatus::Disabled) if conn.last_error.is_some() => ConnectionStatus::Error,
      (true, ConnectionStatus::Disabled) => ConnectionStatus::Connected,
      (true, current) => current,
    };
    self.store.set_connection_status(id, status).await.map_err(Error::store)?;
    self.owned_connection(owner_id, id).await
  }

  /// Probe the remote server with the stored credentials.
  pub async fn test_connection(
    &self,
    owner_id: UserId,
    id: ConnectionId,
    cancel: &CancellationToken,
  ) -> Result<()> {
    let conn = self.owned_connection(owner_id, id).await?;
    self.client_for(&conn)?.ping(cancel).await?;
    Ok(())
  }

  pub async fn sync_log(
    &self,
    owner_id: UserId,
    id: ConnectionId,
    limit: usize,
  ) -> Result<Vec<SyncLogEntry>> {
    self.owned_connection(owner_id, id).await?;
    self.store.list_sync_log(id, limit).await.map_err(Error::store)
  }

  fn seal_credentials(
    &self,
    base_url: &str,
    username: Option<&str>,
    token: &str,
  ) -> Result<(String, Option<String>, String)> {
    let base_url = base_url.trim().trim_end_matches('/').to_owned();
    let username = username.map(str::trim).filter(|u| !u.is_empty()).map(str::to_owned);
    let token = token.trim();
    // Validates the URL and the token before anything is stored.
    GrampsClient::new(GrampsConfig {
      base_url: base_url.clone(),
      username: username.clone(),
      token:    token.to_owned(),
      timeout:  self.config.sync.http_timeout(),
    })
    .map_err(|e| match e {
      arxiu_gramps::Error::InvalidUrl(_) => Error::validation("base_url", e.to_string()),
      arxiu_gramps::Error::MissingToken => Error::validation("token", "must not be empty"),
      other => other.into(),
    })?;
    let sealed = self.secrets.seal(token)?;
    Ok((base_url, username, sealed))
  }

  fn client_for(&self, conn: &ExternalConnection) -> Result<GrampsClient> {
    let token = self.secrets.open(&conn.token_sealed)?;
    Ok(GrampsClient::new(GrampsConfig {
      base_url: conn.base_url.clone(),
      username: conn.username.clone(),
      token,
      timeout: self.config.sync.http_timeout(),
    })?)
  }
}

// ─── Sync ────────────────────────────────────────────────────────────────────

impl<S: Store + 'static> Engine<S> {
  /// Sync one connection. A concurrent call for the same connection returns
  /// [`SyncOutcome::Busy`] without doing anything; unless `force`, a
  /// connection in backoff or waiting for new credentials is deferred.
  ///
  /// Remote and credential failures are recorded on the connection and
  /// returned as [`SyncOutcome::Failed`]. Cancellation is returned as an
  /// error and does not count as a failure.
  pub async fn sync_connection(
    &self,
    id: ConnectionId,
    force: bool,
    cancel: &CancellationToken,
  ) -> Result<SyncOutcome> {
    self.sync_for_job(id, force, None, cancel).await
  }

  /// Like [`Engine::sync_connection`], moving `job` to `parsing` while the
  /// remote is fetched and to `normalizing` while the tree is reconciled.
  pub(crate) async fn sync_for_job(
    &self,
    id: ConnectionId,
    force: bool,
    job: Option<JobId>,
    cancel: &CancellationToken,
  ) -> Result<SyncOutcome> {
    let Some(_flight) = self.sync.begin(id) else {
      tracing::debug!(connection_id = id, "sync already in flight");
      return Ok(SyncOutcome::Busy);
    };
    let conn = self
      .store
      .get_connection(id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound("external connection"))?;
    if conn.status == ConnectionStatus::Disabled {
      return Ok(SyncOutcome::Disabled);
    }
    if !force && (self.sync.is_blocked(id) || conn.in_backoff(Utc::now())) {
      tracing::debug!(connection_id = id, "sync deferred");
      return Ok(SyncOutcome::Deferred);
    }

    match self.pull(&conn, job, cancel).await {
      Ok(summary) => {
        self.record_success(&conn, &summary).await?;
        Ok(SyncOutcome::Synced { summary })
      }
      Err(Error::Cancelled) => Err(Error::Cancelled),
      Err(e) => {
        let message = e.to_string();
        self.record_failure(&conn, &e).await?;
        Ok(SyncOutcome::Failed { message })
      }
    }
  }

  async fn pull(
    &self,
    conn: &ExternalConnection,
    job: Option<JobId>,
    cancel: &CancellationToken,
  ) -> Result<ImportSummary> {
    let client = self.client_for(conn)?;
    if let Some(job) = job {
      self.set_status(job, JobUpdate::status(JobStatus::Parsing)).await?;
    }
    client.ping(cancel).await?;
    let people = client.fetch_people(cancel).await?;
    let families = client.fetch_families(cancel).await?;
    if let Some(job) = job {
      self.set_status(job, JobUpdate::status(JobStatus::Normalizing)).await?;
    }
    normalize::reconcile(&*self.store, conn.tree_id, &people, &families, cancel).await
  }

  async fn record_success(&self, conn: &ExternalConnection, summary: &ImportSummary) -> Result<()> {
    let now = Utc::now();
    self.sync.clear(conn.id);
    self.store.record_sync_success(conn.id, now).await.map_err(Error::store)?;
    let line = format!(
      "sync ok: {} new persons, {} new relations",
      summary.persons, summary.relations
    );
    self.append_log(conn.id, line).await;
    tracing::info!(
      connection_id = conn.id,
      tree_id = conn.tree_id,
      persons = summary.persons,
      relations = summary.relations,
      "sync completed"
    );
    let notice = Notice::new(
      NotificationKind::GrampsSynced,
      "Synchronisation completed",
      format!("{} new persons, {} new relations", summary.persons, summary.relations),
    )
    .tree(conn.tree_id)
    .object(conn.id);
    self.notify_quietly(conn.owner_id, notice).await;
    Ok(())
  }

  async fn record_failure(&self, conn: &ExternalConnection, error: &Error) -> Result<()> {
    let failures = self.sync.fail(conn.id, conn.failures, error.needs_user());
    let delay = backoff_delay(self.config.sync.backoff_base(), failures);
    let message = error.to_string();
    self
      .store
      .record_sync_failure(conn.id, message.clone(), failures, Utc::now() + delay)
      .await
      .map_err(Error::store)?;
    self.append_log(conn.id, format!("sync failed: {message}")).await;
    tracing::warn!(
      connection_id = conn.id,
      failures,
      retry_in_minutes = delay.num_minutes(),
      error = %message,
      "sync failed"
    );
    let notice =
      Notice::new(NotificationKind::GrampsError, "Synchronisation failed", message)
        .tree(conn.tree_id)
        .object(conn.id);
    self.notify_quietly(conn.owner_id, notice).await;
    Ok(())
  }

  async fn append_log(&self, id: ConnectionId, line: String) {
    if let Err(e) = self.store.append_sync_log(id, line).await {
      tracing::warn!(connection_id = id, error = %e, "could not append sync log");
    }
  }

  /// One scheduler pass over every non-disabled connection. Returns how many
  /// synced.
  pub async fn sync_tick(&self, cancel: &CancellationToken) -> Result<usize> {
    let connections = self.store.list_syncable_connections().await.map_err(Error::store)?;
    let mut synced = 0;
    for conn in connections {
      match self.sync_connection(conn.id, false, cancel).await {
        Ok(SyncOutcome::Synced { .. }) => synced += 1,
        Ok(_) => {}
        Err(Error::Cancelled) => break,
        Err(e) => tracing::error!(connection_id = conn.id, error = %e, "sync error"),
      }
    }
    Ok(synced)
  }

  /// Periodic sync loop. Exits when `cancel` fires.
  pub async fn run_sync_scheduler(self: Arc<Self>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(self.config.sync.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(
      interval_minutes = self.config.sync.interval_minutes,
      "sync scheduler started"
    );
    loop {
      tokio::select! {
        biased;
        _ = cancel.cancelled() => break,
        _ = ticker.tick() => {}
      }
      match self.sync_tick(&cancel).await {
        Ok(0) => {}
        Ok(synced) => tracing::info!(synced, "sync pass finished"),
        Err(e) => tracing::error!(error = %e, "sync pass failed"),
      }
    }
    tracing::info!("sync scheduler stopped");
  }
}

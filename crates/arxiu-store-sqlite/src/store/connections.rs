use arxiu_core::{
  connection::{
    ConnectionId, ConnectionStatus, ExternalConnection, NewConnection, SyncLogEntry,
  },
  store::ConnectionStore,
  tree::TreeId,
};
use chrono::{DateTime, Utc};

use super::SqliteStore;
use crate::{
  Error, Result,
  encode::{CONNECTION_COLUMNS, RawConnection, decode_dt, encode_dt, now},
};

impl SqliteStore {
  async fn connections_where(
    &self,
    clause: &'static str,
    params: Vec<rusqlite::types::Value>,
  ) -> Result<Vec<ExternalConnection>> {
    let raws: Vec<RawConnection> = self
      .conn
      .call(move |conn| {
        let sql =
          format!("SELECT {CONNECTION_COLUMNS} FROM external_connections WHERE {clause}");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawConnection::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawConnection::into_connection).collect()
  }
}

impl ConnectionStore for SqliteStore {
  async fn create_connection(&self, input: NewConnection) -> Result<ExternalConnection> {
    let at = now();
    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO external_connections (
             owner_id, tree_id, base_url, username, token_sealed, status, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![
            input.owner_id,
            input.tree_id,
            input.base_url,
            input.username,
            input.token_sealed,
            ConnectionStatus::Connected.to_string(),
            at,
          ],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    self
      .get_connection(id)
      .await?
      .ok_or(Error::NotFound { entity: "connection", id })
  }

  async fn get_connection(&self, id: ConnectionId) -> Result<Option<ExternalConnection>> {
    Ok(self.connections_where("id = ?1", vec![id.into()]).await?.pop())
  }

  async fn find_connection_for_tree(
    &self,
    tree_id: TreeId,
  ) -> Result<Option<ExternalConnection>> {
    Ok(
      self
        .connections_where("tree_id = ?1 ORDER BY id DESC LIMIT 1", vec![tree_id.into()])
        .await?
        .pop(),
    )
  }

  async fn list_syncable_connections(&self) -> Result<Vec<ExternalConnection>> {
    self
      .connections_where("status != ?1 ORDER BY id", vec![
        ConnectionStatus::Disabled.to_string().into(),
      ])
      .await
  }

  async fn set_connection_status(&self, id: ConnectionId, status: ConnectionStatus) -> Result<()> {
    let status = status.to_string();
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE external_connections SET status = ?2 WHERE id = ?1",
          rusqlite::params![id, status],
        )?)
      })
      .await?;
    if changed == 0 {
      return Err(Error::NotFound { entity: "connection", id });
    }
    Ok(())
  }

  async fn update_connection_credentials(
    &self,
    id: ConnectionId,
    base_url: String,
    username: Option<String>,
    token_sealed: String,
  ) -> Result<bool> {
    let connected = ConnectionStatus::Connected.to_string();
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE external_connections SET
             base_url = ?2, username = ?3, token_sealed = ?4, status = ?5,
             last_error = NULL, failures = 0, next_sync_at = NULL
           WHERE id = ?1",
          rusqlite::params![id, base_url, username, token_sealed, connected],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  async fn record_sync_success(&self, id: ConnectionId, at: DateTime<Utc>) -> Result<()> {
    let (at, connected) = (encode_dt(at), ConnectionStatus::Connected.to_string());
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE external_connections SET
             status = ?2, last_sync_at = ?3, last_error = NULL,
             failures = 0, next_sync_at = NULL
           WHERE id = ?1",
          rusqlite::params![id, connected, at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn record_sync_failure(
    &self,
    id: ConnectionId,
    message: String,
    failures: u32,
    next_sync_at: DateTime<Utc>,
  ) -> Result<()> {
    let (next, status) = (encode_dt(next_sync_at), ConnectionStatus::Error.to_string());
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE external_connections SET
             status = ?2, last_error = ?3, failures = ?4, next_sync_at = ?5
           WHERE id = ?1",
          rusqlite::params![id, status, message, failures, next],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn append_sync_log(&self, id: ConnectionId, message: String) -> Result<()> {
    let at = now();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO sync_log (connection_id, message, created_at) VALUES (?1, ?2, ?3)",
          rusqlite::params![id, message, at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list_sync_log(&self, id: ConnectionId, limit: usize) -> Result<Vec<SyncLogEntry>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows: Vec<(String, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT message, created_at FROM sync_log
           WHERE connection_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![id, limit], |r| Ok((r.get(0)?, r.get(1)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(message, created_at)| {
        Ok(SyncLogEntry { connection_id: id, message, created_at: decode_dt(&created_at)? })
      })
      .collect()
  }
}

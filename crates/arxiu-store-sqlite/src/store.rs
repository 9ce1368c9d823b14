//! [`SqliteStore`]: the SQLite implementation of the Arxiu store traits.
//!
//! One file per store concern lives under `store/`.

use std::path::Path;

use arxiu_core::store::Backend;

use crate::{Result, schema::SCHEMA};

mod banner;
mod connections;
mod credits;
mod drafts;
mod groups;
mod imports;
mod matches;
mod notifications;
mod search;
mod trees;
mod users;

// ─── Store ───────────────────────────────────────────────────────────────────

/// An Arxiu store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation. The
  /// parent directory is created if missing.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      tokio::fs::create_dir_all(parent).await?;
    }
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    tracing::debug!(path = %path.display(), "sqlite store opened");
    Ok(store)
  }

  /// Open an in-memory store; useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

impl Backend for SqliteStore {
  type Error = crate::Error;
}

/// Clamp a caller-supplied page size to SQLite's integer domain.
pub(crate) fn page(limit: Option<usize>, offset: Option<usize>) -> (i64, i64) {
  let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
  let offset = offset.map_or(0, |o| i64::try_from(o).unwrap_or(0));
  (limit, offset)
}

//! GEDCOM uploads and the import job queue.
//!
//! Uploads are content-addressed per owner: the SHA-256 of the body decides
//! whether a new source (and job) is created or the existing one is returned.

use std::path::{Path, PathBuf};

use arxiu_core::{
  connection::ConnectionId,
  import::{ImportJob, ImportMode, ImportSource, JobId, NewImportJob, NewSource, SourceType},
  store::{ConnectionStore, ImportStore, Store},
  tree::TreeId,
  user::UserId,
};
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{Engine, Error, Result};

const FALLBACK_STEM: &str = "arbre";
const MAX_STEM_CHARS: usize = 120;

/// What an upload produced.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
  pub source:    ImportSource,
  /// The new job, or the source's latest job when the upload was a
  /// duplicate.
  pub job:       Option<ImportJob>,
  pub duplicate: bool,
}

/// Filesystem-safe stem: `[A-Za-z0-9._-]` kept, everything else mapped to
/// `_`, any `.ged` suffix removed, `arbre` when nothing is left.
pub fn safe_filename(name: &str) -> String {
  let base = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
  let stem = if base.to_ascii_lowercase().ends_with(".ged") {
    &base[..base.len() - 4]
  } else {
    base
  };
  let cleaned: String = stem
    .chars()
    .take(MAX_STEM_CHARS)
    .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
    .collect();
  let cleaned = cleaned.trim_matches('.');
  if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
    FALLBACK_STEM.to_owned()
  } else {
    cleaned.to_owned()
  }
}

/// Lowercase hex SHA-256.
pub fn checksum(bytes: &[u8]) -> String { hex::encode(Sha256::digest(bytes)) }

fn upload_path(root: &Path, owner_id: UserId, filename: &str) -> PathBuf {
  let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
  root.join(owner_id.to_string()).join(format!("{nanos}_{}.ged", safe_filename(filename)))
}

impl<S: Store + 'static> Engine<S> {
  /// Store an uploaded GEDCOM file and queue its import.
  pub async fn upload_gedcom(
    &self,
    owner_id: UserId,
    tree_id: TreeId,
    filename: &str,
    body: &[u8],
    mode: ImportMode,
  ) -> Result<UploadReceipt> {
    self.owned_tree(owner_id, tree_id).await?;
    if mode == ImportMode::Sync {
      return Err(Error::validation("mode", "file uploads import as replace or merge"));
    }
    let limit_mb = self.config.upload.gedcom_max_upload_mb;
    if body.len() as u64 > limit_mb.saturating_mul(1024 * 1024) {
      return Err(Error::TooLarge { limit_mb });
    }
    if body.is_empty() {
      return Err(Error::validation("file", "is empty"));
    }

    let checksum = checksum(body);
    let path = upload_path(&self.config.upload.gedcom_root, owner_id, filename);
    if let Some(dir) = path.parent() {
      tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(&path, body).await?;

    let stored = self
      .store
      .upsert_source_by_checksum(NewSource {
        owner_id,
        source_type: SourceType::Gedcom,
        original_filename: filename.to_owned(),
        storage_path: path.to_string_lossy().into_owned(),
        size_bytes: body.len() as u64,
        checksum,
      })
      .await;
    let (source, created) = match stored {
      Ok(pair) => pair,
      Err(e) => {
        discard(&path).await;
        return Err(Error::store(e));
      }
    };

    if !created {
      discard(&path).await;
      let job = self.store.latest_job_for_source(source.id).await.map_err(Error::store)?;
      tracing::info!(owner_id, source_id = source.id, "duplicate upload");
      return Ok(UploadReceipt { source, job, duplicate: true });
    }

    let job = self
      .store
      .create_job(NewImportJob {
        owner_id,
        tree_id,
        source_id: Some(source.id),
        connection_id: None,
        job_type: SourceType::Gedcom,
        mode,
        created_by: owner_id,
      })
      .await
      .map_err(Error::store)?;
    tracing::info!(owner_id, tree_id, job_id = job.id, %mode, "import queued");
    Ok(UploadReceipt { source, job: Some(job), duplicate: false })
  }

  /// Queue a sync of an external connection through the import worker.
  pub async fn enqueue_sync(
    &self,
    owner_id: UserId,
    connection_id: ConnectionId,
  ) -> Result<ImportJob> {
    let conn = self.owned_connection(owner_id, connection_id).await?;
    let job = self
      .store
      .create_job(NewImportJob {
        owner_id,
        tree_id: conn.tree_id,
        source_id: None,
        connection_id: Some(conn.id),
        job_type: SourceType::Gramps,
        mode: ImportMode::Sync,
        created_by: owner_id,
      })
      .await
      .map_err(Error::store)?;
    tracing::info!(owner_id, connection_id, job_id = job.id, "sync queued");
    Ok(job)
  }

  pub async fn job(&self, owner_id: UserId, id: JobId) -> Result<ImportJob> {
    self
      .store
      .get_job(id)
      .await
      .map_err(Error::store)?
      .filter(|j| j.owner_id == owner_id)
      .ok_or(Error::NotFound("import job"))
  }

  pub async fn jobs(&self, owner_id: UserId) -> Result<Vec<ImportJob>> {
    self.store.list_jobs(owner_id).await.map_err(Error::store)
  }

  pub(crate) async fn connection_for_job(&self, job: &ImportJob) -> Result<ConnectionId> {
    if let Some(id) = job.connection_id {
      return Ok(id);
    }
    self
      .store
      .find_connection_for_tree(job.tree_id)
      .await
      .map_err(Error::store)?
      .map(|c| c.id)
      .ok_or(Error::NotFound("external connection"))
  }
}

pub(crate) async fn discard(path: &Path) {
  if let Err(e) = tokio::fs::remove_file(path).await {
    tracing::warn!(path = %path.display(), error = %e, "could not remove upload");
  }
}

#[cfg(test)]
mod tests {
  use arxiu_core::{import::JobStatus, user::UserRole};

  use super::*;
  use crate::{EngineConfig, testing};

  #[test]
  fn safe_filenames() {
    assert_eq!(safe_filename("Família Puig.GED"), "Fam_lia_Puig");
    assert_eq!(safe_filename("../../etc/passwd"), "passwd");
    assert_eq!(safe_filename("arbre-2024_v1.ged"), "arbre-2024_v1");
    assert_eq!(safe_filename(".ged"), "arbre");
    assert_eq!(safe_filename("???"), "arbre");
  }

  #[test]
  fn checksum_is_lowercase_hex_sha256() {
    assert_eq!(
      checksum(b"abc"),
      "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
  }

  #[tokio::test]
  async fn reupload_returns_the_same_source_without_a_job() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.upload.gedcom_root = dir.path().to_path_buf();
    let engine = testing::engine_with(config).await;
    let owner = testing::user(&engine, "anna", UserRole::User).await;
    let tree = testing::tree(&engine, &owner, "Puig").await;
    let body = b"0 HEAD\n0 @I1@ INDI\n1 NAME Joan /Puig/\n0 TRLR\n";

    let first =
      engine.upload_gedcom(owner.id, tree.id, "puig.ged", body, ImportMode::Replace).await.unwrap();
    assert!(!first.duplicate);
    let job = first.job.clone().unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert!(Path::new(&first.source.storage_path).exists());

    let second =
      engine.upload_gedcom(owner.id, tree.id, "copy.ged", body, ImportMode::Merge).await.unwrap();
    assert!(second.duplicate);
    assert_eq!(second.source.id, first.source.id);
    assert_eq!(second.job.unwrap().id, job.id);
    assert_eq!(engine.jobs(owner.id).await.unwrap().len(), 1);

    let stored: Vec<_> = std::fs::read_dir(dir.path().join(owner.id.to_string()))
      .unwrap()
      .collect();
    assert_eq!(stored.len(), 1);
  }

  #[tokio::test]
  async fn upload_limits() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.upload.gedcom_root = dir.path().to_path_buf();
    config.upload.gedcom_max_upload_mb = 0;
    let engine = testing::engine_with(config).await;
    let owner = testing::user(&engine, "anna", UserRole::User).await;
    let other = testing::user(&engine, "pau", UserRole::User).await;
    let tree = testing::tree(&engine, &owner, "Puig").await;

    assert!(matches!(
      engine.upload_gedcom(owner.id, tree.id, "a.ged", b"0 HEAD", ImportMode::Replace).await,
      Err(Error::TooLarge { limit_mb: 0 })
    ));
    assert!(matches!(
      engine.upload_gedcom(other.id, tree.id, "a.ged", b"0 HEAD", ImportMode::Replace).await,
      Err(Error::NotFound("tree"))
    ));
    assert!(matches!(
      engine.upload_gedcom(owner.id, tree.id, "a.ged", b"", ImportMode::Sync).await,
      Err(Error::Validation { .. })
    ));
  }
}

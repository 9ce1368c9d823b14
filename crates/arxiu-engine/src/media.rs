//! Media originals.
//!
//! An upload lands at `<media_root>/<owner_id>/<item_id>/original/<name>`.
//! Any failure after the write removes the file again.

use std::path::PathBuf;

use arxiu_core::{credit::MediaItemId, store::Store, user::UserId};
use serde::Serialize;

use crate::{Engine, Error, Result, imports::discard};

const FALLBACK_NAME: &str = "original";

#[derive(Debug, Clone, Serialize)]
pub struct StoredMedia {
  pub item_id:        MediaItemId,
  pub path:           String,
  pub mime:           String,
  pub size_bytes:     u64,
  pub points_awarded: i64,
}

/// Filesystem-safe file name that keeps its extension. Leading dots are
/// dropped so nothing becomes hidden.
pub fn media_filename(name: &str) -> String {
  let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
  let cleaned: String = base
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
    .collect();
  let cleaned = cleaned.trim_start_matches('.');
  if cleaned.is_empty() { FALLBACK_NAME.to_owned() } else { cleaned.to_owned() }
}

impl<S: Store + 'static> Engine<S> {
  fn media_path(&self, owner_id: UserId, item_id: MediaItemId, filename: &str) -> PathBuf {
    self
      .config
      .media
      .root
      .join(owner_id.to_string())
      .join(item_id.to_string())
      .join("original")
      .join(media_filename(filename))
  }

  /// Store an uploaded original and award the upload points.
  pub async fn upload_media(
    &self,
    owner_id: UserId,
    item_id: MediaItemId,
    filename: &str,
    mime: &str,
    body: &[u8],
  ) -> Result<StoredMedia> {
    let cfg = &self.config.media;
    if !cfg.allows_mime(mime) {
      return Err(Error::validation("mime", format!("{mime} is not accepted")));
    }
    if body.is_empty() {
      return Err(Error::validation("file", "is empty"));
    }
    if body.len() as u64 > cfg.max_upload_mb.saturating_mul(1024 * 1024) {
      return Err(Error::TooLarge { limit_mb: cfg.max_upload_mb });
    }

    let path = self.media_path(owner_id, item_id, filename);
    if let Some(dir) = path.parent() {
      tokio::fs::create_dir_all(dir).await?;
    }
    if let Err(e) = tokio::fs::write(&path, body).await {
      discard(&path).await;
      return Err(e.into());
    }
    let points_awarded = match self.award_upload_points(owner_id, item_id).await {
      Ok(points) => points,
      Err(e) => {
        discard(&path).await;
        return Err(e);
      }
    };

    tracing::info!(owner_id, item_id, size = body.len(), "media stored");
    Ok(StoredMedia {
      item_id,
      path: path.to_string_lossy().into_owned(),
      mime: mime.split(';').next().unwrap_or_default().trim().to_owned(),
      size_bytes: body.len() as u64,
      points_awarded,
    })
  }
}

#[cfg(test)]
mod tests {
  use std::path::Path;

  use arxiu_core::user::UserRole;

  use super::*;
  use crate::{EngineConfig, testing};

  #[test]
  fn filenames_keep_extension() {
    assert_eq!(media_filename("foto família.JPG"), "foto_fam_lia.JPG");
    assert_eq!(media_filename("../../etc/passwd"), "passwd");
    assert_eq!(media_filename(".hidden.png"), "hidden.png");
    assert_eq!(media_filename(""), "original");
  }

  #[tokio::test]
  async fn upload_checks_mime_and_size() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.media.root = dir.path().to_path_buf();
    config.media.max_upload_mb = 1;
    let engine = testing::engine_with(config).await;
    let anna = testing::user(&engine, "anna", UserRole::User).await;

    assert!(matches!(
      engine.upload_media(anna.id, 1, "a.gif", "image/gif", b"GIF89a").await,
      Err(Error::Validation { field, .. }) if field == "mime"
    ));
    let big = vec![0u8; 1024 * 1024 + 1];
    assert!(matches!(
      engine.upload_media(anna.id, 1, "a.png", "image/png", &big).await,
      Err(Error::TooLarge { limit_mb: 1 })
    ));

    let stored =
      engine.upload_media(anna.id, 4, "casa.jpg", "image/jpeg; q=1", b"\xff\xd8").await.unwrap();
    let expected = dir.path().join(anna.id.to_string()).join("4").join("original").join("casa.jpg");
    assert_eq!(Path::new(&stored.path), expected);
    assert!(expected.exists());
    assert_eq!(stored.mime, "image/jpeg");
    assert_eq!(stored.points_awarded, 10);
    assert_eq!(engine.balances(anna.id).await.unwrap().points, 10);
  }
}

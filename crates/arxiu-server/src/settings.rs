//! Server settings.
//!
//! Sources, lowest precedence first: the TOML file, `ESP_*` environment
//! variables, then the unprefixed deployment variables (`GEDCOM_ROOT`,
//! `MEDIA_*`, `DATABASE_PATH`, `HOST`, `PORT`). Keys are flat:
//! `ESP_MATCH_MIN_SCORE` sets `match_min_score`.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use arxiu_engine::{
  EngineConfig,
  config::{
    BannerConfig, ImportWorkerConfig, MatchConfig, MediaConfig, SyncConfig, UploadConfig,
  },
};
use serde::Deserialize;

/// Unprefixed variables applied as explicit overrides.
const OVERRIDES: &[(&str, &str)] = &[
  ("GEDCOM_ROOT", "gedcom_root"),
  ("GEDCOM_MAX_UPLOAD_MB", "gedcom_max_upload_mb"),
  ("MEDIA_ROOT", "media_root"),
  ("MEDIA_MAX_UPLOAD_MB", "media_max_upload_mb"),
  ("MEDIA_ALLOWED_MIMES", "media_allowed_mimes"),
  ("MEDIA_GRANT_HOURS", "media_grant_hours"),
  ("MEDIA_POINTS_UPLOAD", "media_points_upload"),
  ("MEDIA_POINTS_VIEW", "media_points_view"),
  ("MEDIA_POINTS_PER_CREDIT", "media_points_per_credit"),
  ("DATABASE_PATH", "database_path"),
  ("HOST", "host"),
  ("PORT", "port"),
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host:          String,
  pub port:          u16,
  pub database_path: PathBuf,

  pub import_worker_poll_seconds:  u64,
  pub import_worker_batch:         usize,
  pub import_worker_max_per_owner: usize,

  pub gedcom_root:          PathBuf,
  pub gedcom_max_upload_mb: u64,

  pub gramps_sync_interval_minutes: u64,
  pub gramps_sync_backoff_minutes:  u64,
  pub gramps_http_timeout_seconds:  u64,
  /// Key material for stored credentials. Required.
  pub gramps_secret:                Option<String>,

  pub match_max_candidates:   usize,
  pub match_min_score:        u32,
  pub match_year_radius:      i32,
  pub match_weight_name:      u32,
  pub match_weight_surname:   u32,
  pub match_weight_date:      u32,
  pub match_weight_place:     u32,
  pub match_weight_relations: u32,

  pub media_root:              PathBuf,
  pub media_max_upload_mb:     u64,
  /// Comma-separated.
  pub media_allowed_mimes:     String,
  pub media_grant_hours:       i64,
  pub media_points_upload:     i64,
  pub media_points_view:       i64,
  pub media_points_per_credit: i64,

  pub banner_ttl_seconds: u64,
}

impl Default for ServerConfig {
  fn default() -> Self {
    let EngineConfig { import, upload, sync, matching, media, banner } = EngineConfig::default();
    Self {
      host:          "127.0.0.1".to_owned(),
      port:          8080,
      database_path: PathBuf::from("./data/arxiu.sqlite3"),

      import_worker_poll_seconds:  import.poll_seconds,
      import_worker_batch:         import.batch,
      import_worker_max_per_owner: import.max_per_owner,

      gedcom_root:          upload.gedcom_root,
      gedcom_max_upload_mb: upload.gedcom_max_upload_mb,

      gramps_sync_interval_minutes: sync.interval_minutes,
      gramps_sync_backoff_minutes:  sync.backoff_minutes,
      gramps_http_timeout_seconds:  sync.http_timeout_seconds,
      gramps_secret:                None,

      match_max_candidates:   matching.max_candidates,
      match_min_score:        matching.min_score,
      match_year_radius:      matching.year_radius,
      match_weight_name:      matching.weight_name,
      match_weight_surname:   matching.weight_surname,
      match_weight_date:      matching.weight_date,
      match_weight_place:     matching.weight_place,
      match_weight_relations: matching.weight_relations,

      media_root:              media.root,
      media_max_upload_mb:     media.max_upload_mb,
      media_allowed_mimes:     media.allowed_mimes.join(","),
      media_grant_hours:       media.grant_hours,
      media_points_upload:     media.points_upload,
      media_points_view:       media.points_view,
      media_points_per_credit: media.points_per_credit,

      banner_ttl_seconds: banner.ttl_seconds,
    }
  }
}

impl ServerConfig {
  /// Read the file at `path` (optional) and the process environment.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    Self::load_with(path, |key| std::env::var(key).ok())
  }

  fn load_with(path: &Path, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
    let mut builder = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("ESP"));
    for (var, key) in OVERRIDES {
      builder = builder
        .set_override_option(*key, env(var))
        .with_context(|| format!("failed to apply {var}"))?;
    }
    builder
      .build()
      .context("failed to read configuration")?
      .try_deserialize()
      .context("failed to deserialise ServerConfig")
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }

  pub fn secret(&self) -> anyhow::Result<&str> {
    self
      .gramps_secret
      .as_deref()
      .filter(|s| !s.trim().is_empty())
      .context("ESP_GRAMPS_SECRET is not set")
  }

  pub fn engine_config(&self) -> EngineConfig {
    EngineConfig {
      import:   ImportWorkerConfig {
        poll_seconds:  self.import_worker_poll_seconds,
        batch:         self.import_worker_batch,
        max_per_owner: self.import_worker_max_per_owner,
      },
      upload:   UploadConfig {
        gedcom_root:          self.gedcom_root.clone(),
        gedcom_max_upload_mb: self.gedcom_max_upload_mb,
      },
      sync:     SyncConfig {
        interval_minutes:     self.gramps_sync_interval_minutes,
        backoff_minutes:      self.gramps_sync_backoff_minutes,
        http_timeout_seconds: self.gramps_http_timeout_seconds,
      },
      matching: MatchConfig {
        max_candidates:   self.match_max_candidates,
        min_score:        self.match_min_score,
        year_radius:      self.match_year_radius,
        weight_name:      self.match_weight_name,
        weight_surname:   self.match_weight_surname,
        weight_date:      self.match_weight_date,
        weight_place:     self.match_weight_place,
        weight_relations: self.match_weight_relations,
      },
      media:    MediaConfig {
        root:              self.media_root.clone(),
        max_upload_mb:     self.media_max_upload_mb,
        allowed_mimes:     self
          .media_allowed_mimes
          .split(',')
          .map(str::trim)
          .filter(|m| !m.is_empty())
          .map(str::to_owned)
          .collect(),
        grant_hours:       self.media_grant_hours,
        points_upload:     self.media_points_upload,
        points_view:       self.media_points_view,
        points_per_credit: self.media_points_per_credit,
      },
      banner:   BannerConfig { ttl_seconds: self.banner_ttl_seconds },
    }
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use tempfile::TempDir;

  use super::*;

  fn load(file: Option<&str>, vars: &[(&str, &str)]) -> ServerConfig {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    if let Some(body) = file {
      std::fs::write(&path, body).unwrap();
    }
    let vars: HashMap<String, String> =
      vars.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
    ServerConfig::load_with(&path, |k| vars.get(k).cloned()).unwrap()
  }

  #[test]
  fn missing_file_gives_defaults() {
    let cfg = load(None, &[]);
    assert_eq!(cfg.port, 8080);
    assert_eq!(cfg.database_path, PathBuf::from("./data/arxiu.sqlite3"));
    let engine = cfg.engine_config();
    assert_eq!(engine.matching.min_score, 60);
    assert_eq!(engine.media.allowed_mimes.len(), 3);
    assert!(cfg.secret().is_err());
  }

  #[test]
  fn unprefixed_variables_win_over_the_file() {
    let file = "port = 9000\nmedia_points_view = 5\nmedia_allowed_mimes = \"image/png\"\n";
    let cfg = load(Some(file), &[
      ("PORT", "9100"),
      ("MEDIA_ALLOWED_MIMES", "image/png, image/gif"),
      ("GEDCOM_ROOT", "/srv/gedcom"),
    ]);
    assert_eq!(cfg.port, 9100);
    let engine = cfg.engine_config();
    assert_eq!(engine.media.points_view, 5);
    assert_eq!(engine.media.allowed_mimes, vec!["image/png", "image/gif"]);
    assert_eq!(engine.upload.gedcom_root, PathBuf::from("/srv/gedcom"));
  }

  #[test]
  fn file_sets_the_secret() {
    let cfg = load(Some("gramps_secret = \"s3cret\"\n"), &[]);
    assert_eq!(cfg.secret().unwrap(), "s3cret");
  }
}

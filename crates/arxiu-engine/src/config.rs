//! Typed engine settings. Every struct deserialises with per-field defaults,
//! so a partial configuration file only overrides what it names.

use std::{path::PathBuf, time::Duration};

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  pub import:   ImportWorkerConfig,
  pub upload:   UploadConfig,
  pub sync:     SyncConfig,
  pub matching: MatchConfig,
  pub media:    MediaConfig,
  pub banner:   BannerConfig,
}

// ─── Import worker ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImportWorkerConfig {
  pub poll_seconds:  u64,
  /// Queued jobs pulled per tick.
  pub batch:         usize,
  /// Jobs one owner may have running at once.
  pub max_per_owner: usize,
}

impl Default for ImportWorkerConfig {
  fn default() -> Self { Self { poll_seconds: 5, batch: 10, max_per_owner: 1 } }
}

impl ImportWorkerConfig {
  pub fn poll_interval(&self) -> Duration { Duration::from_secs(self.poll_seconds.max(1)) }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
  pub gedcom_root:          PathBuf,
  pub gedcom_max_upload_mb: u64,
}

impl Default for UploadConfig {
  fn default() -> Self {
    Self { gedcom_root: PathBuf::from("./data/espai/gedcom"), gedcom_max_upload_mb: 50 }
  }
}

// ─── Sync scheduler ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub interval_minutes:     u64,
  pub backoff_minutes:      u64,
  pub http_timeout_seconds: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self { interval_minutes: 60, backoff_minutes: 5, http_timeout_seconds: 20 }
  }
}

impl SyncConfig {
  pub fn interval(&self) -> Duration { Duration::from_secs(self.interval_minutes.max(1) * 60) }

  pub fn backoff_base(&self) -> chrono::Duration {
    chrono::Duration::minutes(i64::try_from(self.backoff_minutes).unwrap_or(i64::MAX / 60_000))
  }

  pub fn http_timeout(&self) -> Duration { Duration::from_secs(self.http_timeout_seconds) }
}

// ─── Matching ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
  pub max_candidates:   usize,
  /// Integer percentage a composite score must reach.
  pub min_score:        u32,
  /// Candidates are searched within `year ± year_radius`.
  pub year_radius:      i32,
  pub weight_name:      u32,
  pub weight_surname:   u32,
  pub weight_date:      u32,
  pub weight_place:     u32,
  pub weight_relations: u32,
}

impl Default for MatchConfig {
  fn default() -> Self {
    Self {
      max_candidates:   25,
      min_score:        60,
      year_radius:      5,
      weight_name:      40,
      weight_surname:   30,
      weight_date:      15,
      weight_place:     10,
      weight_relations: 5,
    }
  }
}

// ─── Media and credits ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
  pub root:              PathBuf,
  pub max_upload_mb:     u64,
  pub allowed_mimes:     Vec<String>,
  pub grant_hours:       i64,
  /// Points awarded for an accepted upload.
  pub points_upload:     i64,
  /// Credits charged for one viewing grant.
  pub points_view:       i64,
  pub points_per_credit: i64,
}

impl Default for MediaConfig {
  fn default() -> Self {
    Self {
      root:              PathBuf::from("./data/media"),
      max_upload_mb:     20,
      allowed_mimes:     vec!["image/jpeg".into(), "image/png".into(), "image/webp".into()],
      grant_hours:       24,
      points_upload:     10,
      points_view:       2,
      points_per_credit: 10,
    }
  }
}

impl MediaConfig {
  pub fn allows_mime(&self, mime: &str) -> bool {
    let mime = mime.split(';').next().unwrap_or_default().trim();
    self.allowed_mimes.iter().any(|m| m.trim().eq_ignore_ascii_case(mime))
  }
}

// ─── Banner ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BannerConfig {
  pub ttl_seconds: u64,
}

impl Default for BannerConfig {
  fn default() -> Self { Self { ttl_seconds: 60 } }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn partial_document_keeps_defaults() {
    let cfg: EngineConfig =
      serde_json::from_value(serde_json::json!({ "matching": { "min_score": 75 } })).unwrap();
    assert_eq!(cfg.matching.min_score, 75);
    assert_eq!(cfg.matching.weight_name, 40);
    assert_eq!(cfg.import.batch, 10);
    assert_eq!(cfg.sync.backoff_base(), chrono::Duration::minutes(5));
  }

  #[test]
  fn mime_check_ignores_parameters_and_case() {
    let media = MediaConfig::default();
    assert!(media.allows_mime("IMAGE/JPEG; charset=binary"));
    assert!(!media.allows_mime("application/pdf"));
  }
}

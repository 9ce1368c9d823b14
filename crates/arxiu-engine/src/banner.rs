//! Maintenance banner with a read-through cache.

use std::time::Duration;

use arxiu_core::{
  banner::MaintenanceBanner,
  store::{BannerStore, Store},
  user::User,
};
use chrono::Utc;
use tokio::{sync::RwLock, time::Instant};

use crate::{Engine, Error, Result};

#[derive(Debug, Clone)]
struct Cached {
  fetched: Instant,
  banner:  Option<MaintenanceBanner>,
}

/// Last banner read from the store. Readers share the lock; a refresh takes
/// it exclusively so only one store read happens per TTL.
#[derive(Debug, Default)]
pub(crate) struct BannerCache {
  slot: RwLock<Option<Cached>>,
}

impl BannerCache {
  async fn fresh(&self, ttl: Duration) -> Option<Option<MaintenanceBanner>> {
    let slot = self.slot.read().await;
    slot.as_ref().filter(|c| c.fetched.elapsed() < ttl).map(|c| c.banner.clone())
  }

  async fn invalidate(&self) { *self.slot.write().await = None; }
}

fn active(banner: Option<MaintenanceBanner>) -> Option<MaintenanceBanner> {
  banner.filter(|b| b.is_active(Utc::now()))
}

impl<S: Store + 'static> Engine<S> {
  /// The banner to show right now, if any.
  pub async fn maintenance_banner(&self) -> Result<Option<MaintenanceBanner>> {
    let ttl = Duration::from_secs(self.config.banner.ttl_seconds);
    if let Some(banner) = self.banner.fresh(ttl).await {
      return Ok(active(banner));
    }

    let mut slot = self.banner.slot.write().await;
    if let Some(cached) = slot.as_ref()
      && cached.fetched.elapsed() < ttl
    {
      return Ok(active(cached.banner.clone()));
    }
    let banner = self.store.current_banner().await.map_err(Error::store)?;
    tracing::debug!(present = banner.is_some(), "maintenance banner refreshed");
    *slot = Some(Cached { fetched: Instant::now(), banner: banner.clone() });
    Ok(active(banner))
  }

  /// Replace or clear the banner. Admin only.
  pub async fn set_maintenance_banner(
    &self,
    admin: &User,
    banner: Option<MaintenanceBanner>,
  ) -> Result<()> {
    if !admin.is_admin() {
      return Err(Error::Forbidden("admin role required".into()));
    }
    if let Some(b) = &banner
      && b.message.trim().is_empty()
    {
      return Err(Error::validation("message", "must not be empty"));
    }
    self.store.set_banner(banner).await.map_err(Error::store)?;
    self.banner.invalidate().await;
    tracing::info!(admin_id = admin.id, "maintenance banner updated");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use arxiu_core::user::UserRole;

  use super::*;
  use crate::{EngineConfig, testing};

  fn banner(message: &str, until: Option<chrono::DateTime<Utc>>) -> MaintenanceBanner {
    MaintenanceBanner { message: message.into(), level: "warning".into(), active_until: until }
  }

  #[tokio::test]
  async fn cached_until_replaced() {
    let engine = testing::engine().await;
    let admin = testing::user(&engine, "admin", UserRole::Admin).await;
    let anna = testing::user(&engine, "anna", UserRole::User).await;

    assert_eq!(engine.maintenance_banner().await.unwrap(), None);
    engine.store().set_banner(Some(banner("behind the cache", None))).await.unwrap();
    assert_eq!(engine.maintenance_banner().await.unwrap(), None);

    assert!(matches!(
      engine.set_maintenance_banner(&anna, Some(banner("x", None))).await,
      Err(Error::Forbidden(_))
    ));
    engine.set_maintenance_banner(&admin, Some(banner("Aturada dissabte", None))).await.unwrap();
    assert_eq!(
      engine.maintenance_banner().await.unwrap().map(|b| b.message).as_deref(),
      Some("Aturada dissabte")
    );
    engine.set_maintenance_banner(&admin, None).await.unwrap();
    assert_eq!(engine.maintenance_banner().await.unwrap(), None);
  }

  #[tokio::test]
  async fn expired_banner_is_hidden() {
    let mut config = EngineConfig::default();
    config.banner.ttl_seconds = 0;
    let engine = testing::engine_with(config).await;

    let past = Utc::now() - chrono::Duration::hours(1);
    engine.store().set_banner(Some(banner("old", Some(past)))).await.unwrap();
    assert_eq!(engine.maintenance_banner().await.unwrap(), None);

    let future = Utc::now() + chrono::Duration::hours(1);
    engine.store().set_banner(Some(banner("soon", Some(future)))).await.unwrap();
    assert!(engine.maintenance_banner().await.unwrap().is_some());
  }
}

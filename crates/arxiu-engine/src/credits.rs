//! Credits, upload points and media viewing grants.

use arxiu_core::{
  credit::{
    Conversion, GrantRequest, LedgerEntry, MediaGrant, MediaItemId, REASON_UPLOAD, SpendOutcome,
  },
  store::{CreditStore, Store},
  user::UserId,
};
use chrono::{Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{Engine, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Balances {
  pub credits: i64,
  pub points:  i64,
}

impl<S: Store + 'static> Engine<S> {
  pub async fn balances(&self, user_id: UserId) -> Result<Balances> {
    let credits = self.store.credit_balance(user_id).await.map_err(Error::store)?;
    let points = self.store.points_balance(user_id).await.map_err(Error::store)?;
    Ok(Balances { credits, points })
  }

  /// Credit ledger, oldest first.
  pub async fn ledger(&self, user_id: UserId) -> Result<Vec<LedgerEntry>> {
    self.store.list_ledger(user_id).await.map_err(Error::store)
  }

  /// Grant access to a media item. A live grant is reused for free;
  /// otherwise the viewing cost is debited and a new grant written in one
  /// transaction.
  pub async fn view_media(&self, user_id: UserId, item_id: MediaItemId) -> Result<MediaGrant> {
    let now = Utc::now();
    let request = GrantRequest {
      user_id,
      item_id,
      cost: self.config.media.points_view,
      token: Uuid::new_v4().to_string(),
      now,
      expires_at: now + Duration::hours(self.config.media.grant_hours.max(1)),
    };
    match self.store.spend_for_grant(request).await.map_err(Error::store)? {
      SpendOutcome::Granted(grant) => {
        tracing::info!(user_id, item_id, cost = grant.credits_spent, "media grant issued");
        Ok(grant)
      }
      SpendOutcome::Reused(grant) => Ok(grant),
      SpendOutcome::Insufficient { balance, cost } => {
        Err(Error::InsufficientCredits { balance, cost })
      }
      SpendOutcome::Refunded { reason } => {
        Err(Error::Conflict(format!("grant not stored, credits refunded: {reason}")))
      }
    }
  }

  /// The caller's live grant for an item, if any.
  pub async fn media_grant(
    &self,
    user_id: UserId,
    item_id: MediaItemId,
  ) -> Result<Option<MediaGrant>> {
    self.store.active_grant(user_id, item_id, Utc::now()).await.map_err(Error::store)
  }

  /// Award the upload bonus for an accepted media item. Returns the points
  /// added.
  pub async fn award_upload_points(&self, user_id: UserId, item_id: MediaItemId) -> Result<i64> {
    let points = self.config.media.points_upload;
    if points <= 0 {
      return Ok(0);
    }
    self
      .store
      .award_points(user_id, points, REASON_UPLOAD.to_owned(), Some(item_id))
      .await
      .map_err(Error::store)?;
    Ok(points)
  }

  /// Turn whole credits' worth of points into credits.
  pub async fn convert_points(&self, user_id: UserId) -> Result<Conversion> {
    let per_credit = self.config.media.points_per_credit;
    if per_credit <= 0 {
      return Err(Error::Conflict("point conversion is disabled".into()));
    }
    let conversion =
      self.store.convert_points(user_id, per_credit).await.map_err(Error::store)?;
    if conversion.credits_gained > 0 {
      tracing::info!(
        user_id,
        points = conversion.points_spent,
        credits = conversion.credits_gained,
        "points converted"
      );
    }
    Ok(conversion)
  }
}

#[cfg(test)]
mod tests {
  use arxiu_core::{credit::NewLedgerEntry, user::UserRole};

  use super::*;
  use crate::{EngineConfig, testing};

  async fn top_up(engine: &Engine<arxiu_store_sqlite::SqliteStore>, user: UserId, credits: i64) {
    engine
      .store()
      .append_ledger(NewLedgerEntry {
        user_id:  user,
        delta:    credits,
        reason:   "top_up".into(),
        ref_type: None,
        ref_id:   None,
      })
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn grant_spends_once() {
    let mut config = EngineConfig::default();
    config.media.points_view = 3;
    let engine = testing::engine_with(config).await;
    let anna = testing::user(&engine, "anna", UserRole::User).await;

    top_up(&engine, anna.id, 2).await;
    assert!(matches!(
      engine.view_media(anna.id, 7).await,
      Err(Error::InsufficientCredits { balance: 2, cost: 3 })
    ));
    assert_eq!(engine.balances(anna.id).await.unwrap().credits, 2);
    assert!(engine.media_grant(anna.id, 7).await.unwrap().is_none());

    top_up(&engine, anna.id, 3).await;
    let grant = engine.view_media(anna.id, 7).await.unwrap();
    assert_eq!(grant.credits_spent, 3);
    assert!(grant.is_live(Utc::now()));
    assert_eq!(Uuid::parse_str(&grant.token).unwrap().get_version_num(), 4);
    assert_eq!(engine.balances(anna.id).await.unwrap().credits, 2);
    let entries = engine.ledger(anna.id).await.unwrap().len();

    let again = engine.view_media(anna.id, 7).await.unwrap();
    assert_eq!(again.id, grant.id);
    assert_eq!(again.token, grant.token);
    assert_eq!(engine.ledger(anna.id).await.unwrap().len(), entries);
    assert_eq!(engine.balances(anna.id).await.unwrap().credits, 2);
  }

  #[tokio::test]
  async fn upload_points_convert_to_credits() {
    let engine = testing::engine().await;
    let anna = testing::user(&engine, "anna", UserRole::User).await;

    assert_eq!(engine.award_upload_points(anna.id, 1).await.unwrap(), 10);
    engine.award_upload_points(anna.id, 2).await.unwrap();
    engine.award_upload_points(anna.id, 3).await.unwrap();
    assert_eq!(engine.balances(anna.id).await.unwrap(), Balances { credits: 0, points: 30 });

    let conversion = engine.convert_points(anna.id).await.unwrap();
    assert_eq!(conversion, Conversion { points_spent: 30, credits_gained: 3 });
    assert_eq!(engine.balances(anna.id).await.unwrap(), Balances { credits: 3, points: 0 });
    assert_eq!(engine.convert_points(anna.id).await.unwrap().credits_gained, 0);
  }
}

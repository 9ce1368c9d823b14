//! Notification fan-out.
//!
//! Every internal event goes through [`Engine::notify`]: preferences are
//! applied, a dedupe key is derived from the event time, and the insert is a
//! no-op when the user already has a row with that key.

use arxiu_core::{
  group::GroupId,
  notification::{
    NewNotification, Notification, NotificationId, NotificationKind, NotificationPrefs,
    dedupe_key, dedupe_window,
  },
  store::{NotificationStore, Store},
  tree::TreeId,
  user::UserId,
};
use chrono::{DateTime, Utc};

use crate::{Engine, Error, Result};

/// Payload of one event, before preferences and dedupe are applied.
#[derive(Debug, Clone)]
pub struct Notice {
  pub kind:      NotificationKind,
  pub title:     String,
  pub body:      String,
  pub url:       Option<String>,
  pub tree_id:   Option<TreeId>,
  pub group_id:  Option<GroupId>,
  /// Part of the dedupe key when present.
  pub object_id: Option<i64>,
}

impl Notice {
  pub fn new(kind: NotificationKind, title: impl Into<String>, body: impl Into<String>) -> Self {
    Self {
      kind,
      title: title.into(),
      body: body.into(),
      url: None,
      tree_id: None,
      group_id: None,
      object_id: None,
    }
  }

  pub fn tree(mut self, tree_id: TreeId) -> Self {
    self.tree_id = Some(tree_id);
    self
  }

  pub fn group(mut self, group_id: GroupId) -> Self {
    self.group_id = Some(group_id);
    self
  }

  pub fn object(mut self, object_id: i64) -> Self {
    self.object_id = Some(object_id);
    self
  }

  pub fn url(mut self, url: impl Into<String>) -> Self {
    self.url = Some(url.into());
    self
  }
}

impl<S: Store + 'static> Engine<S> {
  /// Stored preferences, or the default (`instant`, every kind).
  pub async fn preferences(&self, user_id: UserId) -> Result<NotificationPrefs> {
    Ok(
      self
        .store
        .get_preferences(user_id)
        .await
        .map_err(Error::store)?
        .unwrap_or_default(),
    )
  }

  pub async fn set_preferences(&self, user_id: UserId, prefs: NotificationPrefs) -> Result<()> {
    self.store.set_preferences(user_id, prefs).await.map_err(Error::store)
  }

  /// Deliver `notice` to `user_id`. Returns whether a row was written.
  pub async fn notify(&self, user_id: UserId, notice: Notice) -> Result<bool> {
    self.notify_at(user_id, notice, Utc::now()).await
  }

  pub async fn notify_at(
    &self,
    user_id: UserId,
    notice: Notice,
    at: DateTime<Utc>,
  ) -> Result<bool> {
    let prefs = self.preferences(user_id).await?;
    if !prefs.allows(notice.kind) {
      tracing::debug!(user_id, kind = %notice.kind, "notification suppressed by preferences");
      return Ok(false);
    }

    let window = dedupe_window(prefs.frequency, at);
    let key = dedupe_key(notice.kind, notice.object_id, &window);
    let inserted = self
      .store
      .insert_notification(NewNotification {
        user_id,
        kind: notice.kind,
        title: notice.title,
        body: notice.body,
        url: notice.url,
        tree_id: notice.tree_id,
        group_id: notice.group_id,
        object_id: notice.object_id,
        dedupe_key: Some(key),
      })
      .await
      .map_err(Error::store)?;
    if !inserted {
      tracing::debug!(user_id, kind = %notice.kind, "duplicate notification collapsed");
    }
    Ok(inserted)
  }

  /// Fire-and-log variant used by background paths where a failed
  /// notification must not fail the surrounding work.
  pub(crate) async fn notify_quietly(&self, user_id: UserId, notice: Notice) {
    let kind = notice.kind;
    if let Err(e) = self.notify(user_id, notice).await {
      tracing::warn!(user_id, %kind, error = %e, "notification failed");
    }
  }

  pub async fn notifications(
    &self,
    user_id: UserId,
    unread_only: bool,
    limit: usize,
    offset: usize,
  ) -> Result<Vec<Notification>> {
    self
      .store
      .list_notifications(user_id, unread_only, limit, offset)
      .await
      .map_err(Error::store)
  }

  pub async fn unread_count(&self, user_id: UserId) -> Result<u64> {
    self.store.unread_count(user_id).await.map_err(Error::store)
  }

  pub async fn mark_read(&self, user_id: UserId, id: NotificationId) -> Result<()> {
    if self.store.mark_read(user_id, id).await.map_err(Error::store)? {
      Ok(())
    } else {
      Err(Error::NotFound("notification"))
    }
  }

  pub async fn mark_all_read(&self, user_id: UserId) -> Result<u64> {
    self.store.mark_all_read(user_id).await.map_err(Error::store)
  }
}

#[cfg(test)]
mod tests {
  use arxiu_core::{
    notification::{Frequency, KindFamily},
    user::UserRole,
  };
  use chrono::{Duration, TimeZone};

  use super::*;
  use crate::testing;

  fn pending(tree: i64) -> Notice {
    Notice::new(NotificationKind::MatchesPending, "New matches", "3 new").tree(tree).object(tree)
  }

  #[tokio::test]
  async fn same_key_in_one_window_collapses() {
    let engine = testing::engine().await;
    let u = testing::user(&engine, "anna", UserRole::User).await;
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();

    assert!(engine.notify_at(u.id, pending(4), at).await.unwrap());
    assert!(!engine.notify_at(u.id, pending(4), at + Duration::hours(3)).await.unwrap());
    assert!(engine.notify_at(u.id, pending(5), at).await.unwrap());
    assert!(engine.notify_at(u.id, pending(4), at + Duration::days(1)).await.unwrap());

    let rows = engine.notifications(u.id, false, 50, 0).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().any(|n| n.dedupe_key.as_deref() == Some("matches_pending:4:2024-05-01")));
  }

  #[tokio::test]
  async fn weekly_users_collapse_across_days() {
    let engine = testing::engine().await;
    let u = testing::user(&engine, "bernat", UserRole::User).await;
    let weekly = NotificationPrefs { frequency: Frequency::Weekly, enabled_kinds: None };
    engine.set_preferences(u.id, weekly).await.unwrap();
    let monday = Utc.with_ymd_and_hms(2024, 4, 29, 8, 0, 0).unwrap();

    assert!(engine.notify_at(u.id, pending(1), monday).await.unwrap());
    assert!(!engine.notify_at(u.id, pending(1), monday + Duration::days(4)).await.unwrap());
    assert_eq!(engine.unread_count(u.id).await.unwrap(), 1);
  }

  #[tokio::test]
  async fn preferences_drop_disabled_families() {
    let engine = testing::engine().await;
    let u = testing::user(&engine, "carla", UserRole::User).await;
    let groups_only = NotificationPrefs {
      frequency:     Frequency::Instant,
      enabled_kinds: Some(vec![KindFamily::Groups]),
    };
    engine.set_preferences(u.id, groups_only).await.unwrap();

    assert!(!engine.notify(u.id, pending(1)).await.unwrap());
    let invite = Notice::new(NotificationKind::GroupInvite, "Invitation", "").group(3).object(3);
    assert!(engine.notify(u.id, invite).await.unwrap());

    engine
      .set_preferences(u.id, NotificationPrefs { frequency: Frequency::Off, enabled_kinds: None })
      .await
      .unwrap();
    let other = Notice::new(NotificationKind::GroupInvite, "Invitation", "").group(9).object(9);
    assert!(!engine.notify(u.id, other).await.unwrap());
  }

  #[tokio::test]
  async fn read_marking_is_scoped_to_the_user() {
    let engine = testing::engine().await;
    let a = testing::user(&engine, "dani", UserRole::User).await;
    let b = testing::user(&engine, "eva", UserRole::User).await;
    engine.notify(a.id, pending(1)).await.unwrap();
    engine.notify(a.id, pending(2)).await.unwrap();
    let id = engine.notifications(a.id, true, 10, 0).await.unwrap()[0].id;

    assert!(matches!(engine.mark_read(b.id, id).await, Err(Error::NotFound(_))));
    engine.mark_read(a.id, id).await.unwrap();
    assert_eq!(engine.unread_count(a.id).await.unwrap(), 1);
    assert_eq!(engine.mark_all_read(a.id).await.unwrap(), 1);
    assert_eq!(engine.unread_count(a.id).await.unwrap(), 0);
  }
}

use arxiu_core::{
  notification::{
    Frequency, KindFamily, NewNotification, Notification, NotificationId, NotificationPrefs,
    NotificationStatus,
  },
  store::NotificationStore,
  user::UserId,
};
use rusqlite::OptionalExtension as _;

use super::{SqliteStore, page};
use crate::{
  Result,
  encode::{NOTIFICATION_COLUMNS, RawNotification, decode_enum, now},
};

impl NotificationStore for SqliteStore {
  async fn insert_notification(&self, input: NewNotification) -> Result<bool> {
    let at = now();
    let inserted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "INSERT OR IGNORE INTO notifications (
             user_id, kind, title, body, url, status, tree_id, group_id,
             object_id, dedupe_key, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
          rusqlite::params![
            input.user_id,
            input.kind.to_string(),
            input.title,
            input.body,
            input.url,
            NotificationStatus::Unread.to_string(),
            input.tree_id,
            input.group_id,
            input.object_id,
            input.dedupe_key,
            at,
          ],
        )?)
      })
      .await?;
    Ok(inserted > 0)
  }

  async fn list_notifications(
    &self,
    user_id: UserId,
    unread_only: bool,
    limit: usize,
    offset: usize,
  ) -> Result<Vec<Notification>> {
    let (limit, offset) = page(Some(limit), Some(offset));
    let unread = NotificationStatus::Unread.to_string();
    let raws: Vec<RawNotification> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {NOTIFICATION_COLUMNS} FROM notifications
           WHERE user_id = ?1 AND (?2 = 0 OR status = ?3)
           ORDER BY created_at DESC, id DESC LIMIT ?4 OFFSET ?5"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![user_id, unread_only, unread, limit, offset],
            RawNotification::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawNotification::into_notification).collect()
  }

  async fn unread_count(&self, user_id: UserId) -> Result<u64> {
    let unread = NotificationStatus::Unread.to_string();
    let n: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND status = ?2",
          rusqlite::params![user_id, unread],
          |r| r.get(0),
        )?)
      })
      .await?;
    Ok(u64::try_from(n).unwrap_or(0))
  }

  async fn mark_read(&self, user_id: UserId, id: NotificationId) -> Result<bool> {
    let read = NotificationStatus::Read.to_string();
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE notifications SET status = ?3 WHERE id = ?1 AND user_id = ?2",
          rusqlite::params![id, user_id, read],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  async fn mark_all_read(&self, user_id: UserId) -> Result<u64> {
    let (read, unread) =
      (NotificationStatus::Read.to_string(), NotificationStatus::Unread.to_string());
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE notifications SET status = ?2 WHERE user_id = ?1 AND status = ?3",
          rusqlite::params![user_id, read, unread],
        )?)
      })
      .await?;
    Ok(changed as u64)
  }

  async fn get_preferences(&self, user_id: UserId) -> Result<Option<NotificationPrefs>> {
    let row: Option<(String, Option<String>)> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT frequency, enabled_kinds_json FROM notification_prefs WHERE user_id = ?1",
              [user_id],
              |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?,
        )
      })
      .await?;

    let Some((frequency, kinds)) = row else {
      return Ok(None);
    };
    let frequency: Frequency = decode_enum("frequency", &frequency)?;
    let enabled_kinds: Option<Vec<KindFamily>> =
      kinds.as_deref().map(serde_json::from_str).transpose()?;
    Ok(Some(NotificationPrefs { frequency, enabled_kinds }))
  }

  async fn set_preferences(&self, user_id: UserId, prefs: NotificationPrefs) -> Result<()> {
    let frequency = prefs.frequency.to_string();
    let kinds = prefs.enabled_kinds.as_ref().map(serde_json::to_string).transpose()?;
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO notification_prefs (user_id, frequency, enabled_kinds_json)
           VALUES (?1, ?2, ?3)
           ON CONFLICT (user_id) DO UPDATE SET
             frequency = excluded.frequency,
             enabled_kinds_json = excluded.enabled_kinds_json",
          rusqlite::params![user_id, frequency, kinds],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

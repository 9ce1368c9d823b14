use arxiu_core::{
  credit::{
    Conversion, GrantRequest, LedgerEntry, MediaGrant, MediaItemId, NewLedgerEntry,
    REASON_CONVERSION, REASON_MEDIA_VIEW, REASON_REFUND, SpendOutcome,
  },
  store::CreditStore,
  user::UserId,
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension as _, TransactionBehavior};

use super::SqliteStore;
use crate::{
  Result,
  encode::{GRANT_COLUMNS, LEDGER_COLUMNS, RawGrant, RawLedger, encode_dt, now},
};

const MEDIA_REF: &str = "media_item";

fn balance_of(conn: &Connection, table: &str, user_id: UserId) -> rusqlite::Result<i64> {
  conn.query_row(
    &format!("SELECT COALESCE(SUM(delta), 0) FROM {table} WHERE user_id = ?1"),
    [user_id],
    |r| r.get(0),
  )
}

fn live_grant(
  conn: &Connection,
  user_id: UserId,
  item_id: MediaItemId,
  now: &str,
) -> rusqlite::Result<Option<RawGrant>> {
  conn
    .query_row(
      &format!(
        "SELECT {GRANT_COLUMNS} FROM media_grants
         WHERE user_id = ?1 AND item_id = ?2 AND expires_at > ?3
         ORDER BY expires_at DESC LIMIT 1"
      ),
      rusqlite::params![user_id, item_id, now],
      RawGrant::from_row,
    )
    .optional()
}

fn credit_entry(
  conn: &Connection,
  user_id: UserId,
  delta: i64,
  reason: &str,
  ref_id: Option<i64>,
  at: &str,
) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO credit_ledger (user_id, delta, reason, ref_type, ref_id, created_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    rusqlite::params![user_id, delta, reason, ref_id.map(|_| MEDIA_REF), ref_id, at],
  )?;
  Ok(())
}

/// What the spend transaction decided, before decoding.
enum Spend {
  Granted(RawGrant),
  Reused(RawGrant),
  Insufficient { balance: i64 },
  Refunded(String),
}

impl CreditStore for SqliteStore {
  async fn credit_balance(&self, user_id: UserId) -> Result<i64> {
    Ok(self.conn.call(move |conn| Ok(balance_of(conn, "credit_ledger", user_id)?)).await?)
  }

  async fn append_ledger(&self, input: NewLedgerEntry) -> Result<LedgerEntry> {
    let at = now();
    let raw: RawLedger = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO credit_ledger (user_id, delta, reason, ref_type, ref_id, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![
            input.user_id,
            input.delta,
            input.reason,
            input.ref_type,
            input.ref_id,
            at
          ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
          &format!("SELECT {LEDGER_COLUMNS} FROM credit_ledger WHERE id = ?1"),
          [id],
          RawLedger::from_row,
        )?)
      })
      .await?;
    raw.into_entry()
  }

  async fn list_ledger(&self, user_id: UserId) -> Result<Vec<LedgerEntry>> {
    let raws: Vec<RawLedger> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {LEDGER_COLUMNS} FROM credit_ledger WHERE user_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt
          .query_map([user_id], RawLedger::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawLedger::into_entry).collect()
  }

  async fn active_grant(
    &self,
    user_id: UserId,
    item_id: MediaItemId,
    now: DateTime<Utc>,
  ) -> Result<Option<MediaGrant>> {
    let now = encode_dt(now);
    let raw = self
      .conn
      .call(move |conn| Ok(live_grant(conn, user_id, item_id, &now)?))
      .await?;
    raw.map(RawGrant::into_grant).transpose()
  }

  async fn spend_for_grant(&self, request: GrantRequest) -> Result<SpendOutcome> {
    let GrantRequest { user_id, item_id, cost, token, now, expires_at } = request;
    let (now, expires_at) = (encode_dt(now), encode_dt(expires_at));

    let spend = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(raw) = live_grant(&tx, user_id, item_id, &now)? {
          return Ok(Spend::Reused(raw));
        }

        let balance = balance_of(&tx, "credit_ledger", user_id)?;
        if balance < cost {
          return Ok(Spend::Insufficient { balance });
        }
        if cost > 0 {
          credit_entry(&tx, user_id, -cost, REASON_MEDIA_VIEW, Some(item_id), &now)?;
        }

        let inserted = tx.execute(
          "INSERT INTO media_grants (user_id, item_id, token, expires_at, credits_spent, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![user_id, item_id, token, expires_at, cost, now],
        );
        let spend = match inserted {
          Ok(_) => {
            let id = tx.last_insert_rowid();
            Spend::Granted(tx.query_row(
              &format!("SELECT {GRANT_COLUMNS} FROM media_grants WHERE id = ?1"),
              [id],
              RawGrant::from_row,
            )?)
          }
          Err(e) => {
            if cost > 0 {
              credit_entry(&tx, user_id, cost, REASON_REFUND, Some(item_id), &now)?;
            }
            Spend::Refunded(e.to_string())
          }
        };
        tx.commit()?;
        Ok(spend)
      })
      .await?;

    Ok(match spend {
      Spend::Granted(raw) => SpendOutcome::Granted(raw.into_grant()?),
      Spend::Reused(raw) => SpendOutcome::Reused(raw.into_grant()?),
      Spend::Insufficient { balance } => SpendOutcome::Insufficient { balance, cost },
      Spend::Refunded(reason) => {
        tracing::warn!(user_id, item_id, %reason, "media grant insert failed; credits refunded");
        SpendOutcome::Refunded { reason }
      }
    })
  }

  async fn points_balance(&self, user_id: UserId) -> Result<i64> {
    Ok(self.conn.call(move |conn| Ok(balance_of(conn, "points_ledger", user_id)?)).await?)
  }

  async fn award_points(
    &self,
    user_id: UserId,
    points: i64,
    reason: String,
    ref_id: Option<i64>,
  ) -> Result<()> {
    let at = now();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO points_ledger (user_id, delta, reason, ref_id, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![user_id, points, reason, ref_id, at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn convert_points(&self, user_id: UserId, points_per_credit: i64) -> Result<Conversion> {
    let at = now();
    let conversion = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let points = balance_of(&tx, "points_ledger", user_id)?;
        let credits =
          if points_per_credit > 0 && points > 0 { points / points_per_credit } else { 0 };
        if credits == 0 {
          return Ok(Conversion { points_spent: 0, credits_gained: 0 });
        }
        let spent = credits * points_per_credit;
        tx.execute(
          "INSERT INTO points_ledger (user_id, delta, reason, ref_id, created_at)
           VALUES (?1, ?2, ?3, NULL, ?4)",
          rusqlite::params![user_id, -spent, REASON_CONVERSION, at],
        )?;
        credit_entry(&tx, user_id, credits, REASON_CONVERSION, None, &at)?;
        tx.commit()?;
        Ok(Conversion { points_spent: spent, credits_gained: credits })
      })
      .await?;
    Ok(conversion)
  }
}

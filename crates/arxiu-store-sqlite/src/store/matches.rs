use arxiu_core::{
  matching::{Match, MatchDecision, MatchId, MatchQuery, MatchStatus, NewMatch},
  store::MatchStore,
  user::UserId,
};
use rusqlite::{OptionalExtension as _, types::Value};

use super::{SqliteStore, page};
use crate::{
  Result,
  encode::{DECISION_COLUMNS, MATCH_COLUMNS, RawDecision, RawMatch, now},
};

/// `WHERE` clause and parameters shared by listing and counting.
fn match_filter(query: &MatchQuery) -> (String, Vec<Value>) {
  let mut clause = String::from("owner_id = ?");
  let mut params: Vec<Value> = vec![query.owner_id.into()];
  if let Some(tree_id) = query.tree_id {
    clause.push_str(" AND tree_id = ?");
    params.push(tree_id.into());
  }
  if let Some(status) = query.status {
    clause.push_str(" AND status = ?");
    params.push(status.to_string().into());
  }
  (clause, params)
}

impl MatchStore for SqliteStore {
  async fn insert_match_if_absent(&self, input: NewMatch) -> Result<bool> {
    let at = now();
    let reason = serde_json::to_string(&input.reason)?;
    let inserted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "INSERT OR IGNORE INTO matches (
             owner_id, tree_id, person_id, target_type, target_id,
             score, reason_json, status, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
          rusqlite::params![
            input.owner_id,
            input.tree_id,
            input.person_id,
            input.target_type.to_string(),
            input.target_id,
            input.score,
            reason,
            MatchStatus::Pending.to_string(),
            at,
          ],
        )?)
      })
      .await?;
    Ok(inserted > 0)
  }

  async fn get_match(&self, id: MatchId) -> Result<Option<Match>> {
    let raw: Option<RawMatch> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {MATCH_COLUMNS} FROM matches WHERE id = ?1"),
              [id],
              RawMatch::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawMatch::into_match).transpose()
  }

  async fn list_matches(&self, query: MatchQuery) -> Result<Vec<Match>> {
    let (clause, mut params) = match_filter(&query);
    let (limit, offset) = page(query.limit, query.offset);
    params.extend([limit.into(), offset.into()]);

    let raws: Vec<RawMatch> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {MATCH_COLUMNS} FROM matches WHERE {clause}
           ORDER BY score DESC, id ASC LIMIT ? OFFSET ?"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawMatch::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawMatch::into_match).collect()
  }

  async fn count_matches(&self, query: MatchQuery) -> Result<u64> {
    let (clause, params) = match_filter(&query);
    let n: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          &format!("SELECT COUNT(*) FROM matches WHERE {clause}"),
          rusqlite::params_from_iter(params),
          |r| r.get(0),
        )?)
      })
      .await?;
    Ok(u64::try_from(n).unwrap_or(0))
  }

  async fn decide_match(
    &self,
    id: MatchId,
    from: MatchStatus,
    to: MatchStatus,
    user_id: UserId,
  ) -> Result<bool> {
    let (from, to, at) = (from.to_string(), to.to_string(), now());
    let decided = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let changed = tx.execute(
          "UPDATE matches SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
          rusqlite::params![id, from, to, at],
        )?;
        if changed == 0 {
          return Ok(false);
        }
        tx.execute(
          "INSERT INTO match_decisions (match_id, user_id, from_status, to_status, decided_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![id, user_id, from, to, at],
        )?;
        tx.commit()?;
        Ok(true)
      })
      .await?;
    Ok(decided)
  }

  async fn list_decisions(&self, match_id: MatchId) -> Result<Vec<MatchDecision>> {
    let raws: Vec<RawDecision> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {DECISION_COLUMNS} FROM match_decisions WHERE match_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt
          .query_map([match_id], RawDecision::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawDecision::into_decision).collect()
  }
}

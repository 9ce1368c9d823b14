use arxiu_core::{
  group::{
    ConflictId, ConflictStatus, Group, GroupChange, GroupConflict, GroupId, GroupMember,
    GroupRole, GroupTree, LinkStatus, MemberId, MemberStatus, NewConflict, NewGroup,
    NewGroupChange,
  },
  store::GroupStore,
  tree::TreeId,
  user::UserId,
};
use rusqlite::{OptionalExtension as _, TransactionBehavior, types::Value};

use super::SqliteStore;
use crate::{
  Error, Result,
  encode::{
    CHANGE_COLUMNS, CONFLICT_COLUMNS, GROUP_COLUMNS, LINK_COLUMNS, MEMBER_COLUMNS, RawChange,
    RawConflict, RawGroup, RawLink, RawMember, now,
  },
};

impl SqliteStore {
  async fn members_where(
    &self,
    clause: &'static str,
    params: Vec<Value>,
  ) -> Result<Vec<GroupMember>> {
    let raws: Vec<RawMember> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {MEMBER_COLUMNS} FROM group_members WHERE {clause}");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawMember::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawMember::into_member).collect()
  }

  async fn links_where(&self, clause: &'static str, params: Vec<Value>) -> Result<Vec<GroupTree>> {
    let raws: Vec<RawLink> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {LINK_COLUMNS} FROM group_trees WHERE {clause}");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawLink::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawLink::into_link).collect()
  }

  async fn conflicts_where(
    &self,
    clause: &'static str,
    params: Vec<Value>,
  ) -> Result<Vec<GroupConflict>> {
    let raws: Vec<RawConflict> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {CONFLICT_COLUMNS} FROM group_conflicts WHERE {clause}");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawConflict::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawConflict::into_conflict).collect()
  }
}

impl GroupStore for SqliteStore {
  // ── Groups and members ────────────────────────────────────────────────────

  async fn create_group(&self, input: NewGroup) -> Result<(Group, GroupMember)> {
    let at = now();
    let (group_id, member_id) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO research_groups (owner_id, name, description, created_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![input.owner_id, input.name, input.description, at],
        )?;
        let group_id = tx.last_insert_rowid();
        tx.execute(
          "INSERT INTO group_members (
             group_id, user_id, role, status, invited_by, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?5)",
          rusqlite::params![
            group_id,
            input.owner_id,
            GroupRole::Owner.to_string(),
            MemberStatus::Active.to_string(),
            at,
          ],
        )?;
        let member_id = tx.last_insert_rowid();
        tx.commit()?;
        Ok((group_id, member_id))
      })
      .await?;

    let group = self
      .get_group(group_id)
      .await?
      .ok_or(Error::NotFound { entity: "group", id: group_id })?;
    let owner = self
      .get_member_by_id(member_id)
      .await?
      .ok_or(Error::NotFound { entity: "group member", id: member_id })?;
    Ok((group, owner))
  }

  async fn get_group(&self, id: GroupId) -> Result<Option<Group>> {
    let raw: Option<RawGroup> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {GROUP_COLUMNS} FROM research_groups WHERE id = ?1"),
              [id],
              RawGroup::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawGroup::into_group).transpose()
  }

  async fn get_member(&self, group_id: GroupId, user_id: UserId) -> Result<Option<GroupMember>> {
    Ok(
      self
        .members_where("group_id = ?1 AND user_id = ?2", vec![group_id.into(), user_id.into()])
        .await?
        .pop(),
    )
  }

  async fn get_member_by_id(&self, id: MemberId) -> Result<Option<GroupMember>> {
    Ok(self.members_where("id = ?1", vec![id.into()]).await?.pop())
  }

  /// Re-inviting an existing row rewrites its role, status and inviter.
  async fn insert_member(
    &self,
    group_id: GroupId,
    user_id: UserId,
    role: GroupRole,
    status: MemberStatus,
    invited_by: Option<UserId>,
  ) -> Result<GroupMember> {
    let (role, status, at) = (role.to_string(), status.to_string(), now());
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO group_members (
             group_id, user_id, role, status, invited_by, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
           ON CONFLICT (group_id, user_id) DO UPDATE SET
             role = excluded.role,
             status = excluded.status,
             invited_by = excluded.invited_by,
             updated_at = excluded.updated_at",
          rusqlite::params![group_id, user_id, role, status, invited_by, at],
        )?;
        Ok(())
      })
      .await?;

    self
      .get_member(group_id, user_id)
      .await?
      .ok_or(Error::NotFound { entity: "group member", id: user_id })
  }

  async fn update_member(&self, id: MemberId, role: GroupRole, status: MemberStatus) -> Result<()> {
    let (role, status, at) = (role.to_string(), status.to_string(), now());
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE group_members SET role = ?2, status = ?3, updated_at = ?4 WHERE id = ?1",
          rusqlite::params![id, role, status, at],
        )?)
      })
      .await?;
    if changed == 0 {
      return Err(Error::NotFound { entity: "group member", id });
    }
    Ok(())
  }

  async fn transfer_ownership(&self, from: MemberId, to: MemberId) -> Result<()> {
    let at = now();
    let owner = GroupRole::Owner.to_string();
    let admin = GroupRole::Admin.to_string();
    let active = MemberStatus::Active.to_string();
    let promoted = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let promoted = tx.execute(
          "UPDATE group_members SET role = ?2, status = ?3, updated_at = ?4 WHERE id = ?1",
          rusqlite::params![to, owner, active, at],
        )?;
        if promoted == 0 {
          return Ok(false);
        }
        if from != to {
          tx.execute(
            "UPDATE group_members SET role = ?2, updated_at = ?3 WHERE id = ?1",
            rusqlite::params![from, admin, at],
          )?;
        }
        tx.commit()?;
        Ok(true)
      })
      .await?;
    if !promoted {
      return Err(Error::NotFound { entity: "group member", id: to });
    }
    Ok(())
  }

  async fn list_members(&self, group_id: GroupId) -> Result<Vec<GroupMember>> {
    self.members_where("group_id = ?1 ORDER BY id", vec![group_id.into()]).await
  }

  // ── Linked trees ──────────────────────────────────────────────────────────

  async fn get_link(&self, group_id: GroupId, tree_id: TreeId) -> Result<Option<GroupTree>> {
    Ok(
      self
        .links_where("group_id = ?1 AND tree_id = ?2", vec![group_id.into(), tree_id.into()])
        .await?
        .pop(),
    )
  }

  async fn upsert_link(
    &self,
    group_id: GroupId,
    tree_id: TreeId,
    linked_by: UserId,
    status: LinkStatus,
  ) -> Result<GroupTree> {
    let (status, at) = (status.to_string(), now());
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO group_trees (group_id, tree_id, linked_by, status, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?5)
           ON CONFLICT (group_id, tree_id) DO UPDATE SET
             linked_by = excluded.linked_by,
             status = excluded.status,
             updated_at = excluded.updated_at",
          rusqlite::params![group_id, tree_id, linked_by, status, at],
        )?;
        Ok(())
      })
      .await?;

    self
      .get_link(group_id, tree_id)
      .await?
      .ok_or(Error::NotFound { entity: "group tree", id: tree_id })
  }

  async fn list_linked_trees(&self, group_id: GroupId) -> Result<Vec<GroupTree>> {
    self
      .links_where("group_id = ?1 AND status = ?2 ORDER BY tree_id", vec![
        group_id.into(),
        LinkStatus::Active.to_string().into(),
      ])
      .await
  }

  async fn groups_for_tree(&self, tree_id: TreeId) -> Result<Vec<GroupId>> {
    Ok(
      self
        .links_where("tree_id = ?1 AND status = ?2 ORDER BY group_id", vec![
          tree_id.into(),
          LinkStatus::Active.to_string().into(),
        ])
        .await?
        .into_iter()
        .map(|l| l.group_id)
        .collect(),
    )
  }

  // ── Conflicts ─────────────────────────────────────────────────────────────

  /// Summaries of every conflict the group has ever recorded, resolved ones
  /// included.
  async fn conflict_summaries(&self, group_id: GroupId) -> Result<Vec<String>> {
    Ok(
      self
        .conn
        .call(move |conn| {
          let mut stmt =
            conn.prepare("SELECT DISTINCT summary FROM group_conflicts WHERE group_id = ?1")?;
          let rows = stmt
            .query_map([group_id], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
          Ok(rows)
        })
        .await?,
    )
  }

  async fn insert_conflict(&self, input: NewConflict) -> Result<GroupConflict> {
    let at = now();
    let detail = serde_json::to_string(&input.detail)?;
    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO group_conflicts (
             group_id, tree_id, conflict_type, status, summary, detail_json, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![
            input.group_id,
            input.tree_id,
            input.conflict_type.to_string(),
            ConflictStatus::Pending.to_string(),
            input.summary,
            detail,
            at,
          ],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    self
      .get_conflict(id)
      .await?
      .ok_or(Error::NotFound { entity: "group conflict", id })
  }

  async fn get_conflict(&self, id: ConflictId) -> Result<Option<GroupConflict>> {
    Ok(self.conflicts_where("id = ?1", vec![id.into()]).await?.pop())
  }

  async fn resolve_conflict(&self, id: ConflictId, user_id: UserId) -> Result<bool> {
    let at = now();
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE group_conflicts SET status = ?3, resolved_by = ?4, resolved_at = ?5
           WHERE id = ?1 AND status = ?2",
          rusqlite::params![
            id,
            ConflictStatus::Pending.to_string(),
            ConflictStatus::Resolved.to_string(),
            user_id,
            at
          ],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  async fn list_conflicts(
    &self,
    group_id: GroupId,
    status: Option<ConflictStatus>,
  ) -> Result<Vec<GroupConflict>> {
    match status {
      Some(status) => {
        self
          .conflicts_where("group_id = ?1 AND status = ?2 ORDER BY id", vec![
            group_id.into(),
            status.to_string().into(),
          ])
          .await
      }
      None => self.conflicts_where("group_id = ?1 ORDER BY id", vec![group_id.into()]).await,
    }
  }

  // ── Change log ────────────────────────────────────────────────────────────

  async fn append_change(&self, input: NewGroupChange) -> Result<GroupChange> {
    let at = now();
    let payload = serde_json::to_string(&input.payload)?;
    let raw: RawChange = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO group_changes (
             group_id, actor_id, action, object_type, object_id, payload_json, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![
            input.group_id,
            input.actor_id,
            input.action,
            input.object_type,
            input.object_id,
            payload,
            at,
          ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
          &format!("SELECT {CHANGE_COLUMNS} FROM group_changes WHERE id = ?1"),
          [id],
          RawChange::from_row,
        )?)
      })
      .await?;
    raw.into_change()
  }

  async fn list_changes(&self, group_id: GroupId) -> Result<Vec<GroupChange>> {
    let raws: Vec<RawChange> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {CHANGE_COLUMNS} FROM group_changes WHERE group_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt
          .query_map([group_id], RawChange::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawChange::into_change).collect()
  }
}

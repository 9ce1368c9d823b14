//! Collaboration groups.
//!
//! Every mutation names a minimum role; the acting user must be an `active`
//! member whose role ranks at least that high. Callers that are not active
//! members get `NotFound`, so group existence does not leak. Each successful
//! mutation appends one change record.

use std::collections::{BTreeMap, HashSet};

use arxiu_core::{
  group::{
    ConflictDetail, ConflictId, ConflictStatus, ConflictType, Group, GroupChange, GroupConflict,
    GroupId, GroupMember, GroupRole, GroupTree, LinkStatus, MemberId, MemberStatus, NewConflict,
    NewGroup, NewGroupChange,
  },
  notification::NotificationKind,
  store::{GroupStore, Store, TreeStore, UserStore},
  tree::{Person, PersonId, TreeId},
  user::UserId,
};
use serde::Serialize;
use serde_json::{Value, json};

use crate::{Engine, Error, Result, notify::Notice};

/// Prefix of every duplicate-person conflict summary.
pub const DUPLICATE_PREFIX: &str = "Possible duplicat: ";

/// Key under which two persons are suspected duplicates: the lowercased
/// display name, plus the reference year when known. Nameless persons have
/// no key.
pub fn duplicate_key(person: &Person) -> Option<String> {
  let name = person.display_name().trim().to_lowercase();
  if name.is_empty() || name == "-" {
    return None;
  }
  Some(match person.reference_year() {
    Some(year) => format!("{name} {year:04}"),
    None => name,
  })
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupDetail {
  pub group:   Group,
  /// The caller's own membership.
  pub member:  GroupMember,
  pub members: Vec<GroupMember>,
  pub trees:   Vec<GroupTree>,
}

impl<S: Store + 'static> Engine<S> {
  pub async fn create_group(
    &self,
    user_id: UserId,
    name: &str,
    description: &str,
  ) -> Result<(Group, GroupMember)> {
    let name = name.trim();
    if name.is_empty() {
      return Err(Error::validation("name", "must not be empty"));
    }
    let (group, owner) = self
      .store
      .create_group(NewGroup {
        owner_id:    user_id,
        name:        name.to_owned(),
        description: description.trim().to_owned(),
      })
      .await
      .map_err(Error::store)?;
    self.record(group.id, user_id, "create_group", "group", Some(group.id), json!({ "name": name }))
      .await?;
    tracing::info!(group_id = group.id, user_id, "group created");
    Ok((group, owner))
  }

  /// The caller's active membership, checked against `min`.
  async fn acting(
    &self,
    group_id: GroupId,
    user_id: UserId,
    min: GroupRole,
  ) -> Result<GroupMember> {
    let member = self
      .store
      .get_member(group_id, user_id)
      .await
      .map_err(Error::store)?
      .filter(|m| m.status == MemberStatus::Active)
      .ok_or(Error::NotFound("group"))?;
    if !member.may(min) {
      return Err(Error::Forbidden(format!("requires role {min} or higher")));
    }
    Ok(member)
  }

  async fn target(&self, group_id: GroupId, member_id: MemberId) -> Result<GroupMember> {
    self
      .store
      .get_member_by_id(member_id)
      .await
      .map_err(Error::store)?
      .filter(|m| m.group_id == group_id && m.status != MemberStatus::Removed)
      .ok_or(Error::NotFound("group member"))
  }

  async fn record(
    &self,
    group_id: GroupId,
    actor_id: UserId,
    action: &'static str,
    object_type: &'static str,
    object_id: Option<i64>,
    payload: Value,
  ) -> Result<GroupChange> {
    self
      .store
      .append_change(NewGroupChange { group_id, actor_id, action, object_type, object_id, payload })
      .await
      .map_err(Error::store)
  }

  async fn active_owners(&self, group_id: GroupId) -> Result<usize> {
    let members = self.store.list_members(group_id).await.map_err(Error::store)?;
    Ok(
      members
        .iter()
        .filter(|m| m.role == GroupRole::Owner && m.status == MemberStatus::Active)
        .count(),
    )
  }

  pub async fn group(&self, user_id: UserId, group_id: GroupId) -> Result<GroupDetail> {
    let member = self.acting(group_id, user_id, GroupRole::Viewer).await?;
    let group =
      self.store.get_group(group_id).await.map_err(Error::store)?.ok_or(Error::NotFound("group"))?;
    let members = self.store.list_members(group_id).await.map_err(Error::store)?;
    let trees = self.store.list_linked_trees(group_id).await.map_err(Error::store)?;
    Ok(GroupDetail { group, member, members, trees })
  }

  // ─── Membership ────────────────────────────────────────────────────────────

  /// Invite a registered user by email. A previously removed member is
  /// invited again.
  pub async fn invite(
    &self,
    actor_id: UserId,
    group_id: GroupId,
    email: &str,
    role: GroupRole,
  ) -> Result<GroupMember> {
    self.acting(group_id, actor_id, GroupRole::Admin).await?;
    if role == GroupRole::Owner {
      return Err(Error::validation("role", "ownership is transferred, not invited"));
    }
    let email = email.trim();
    let user = self
      .store
      .find_user_by_email(email.to_owned())
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound("user"))?;
    if let Some(existing) = self.store.get_member(group_id, user.id).await.map_err(Error::store)?
      && existing.status != MemberStatus::Removed
    {
      return Err(Error::Conflict(format!("user is already {}", existing.status)));
    }

    let member = self
      .store
      .insert_member(group_id, user.id, role, MemberStatus::Invited, Some(actor_id))
      .await
      .map_err(Error::store)?;
    self
      .record(group_id, actor_id, "invite", "member", Some(member.id), json!({
        "email": email,
        "role": role,
      }))
      .await?;

    let group_name = match self.store.get_group(group_id).await.map_err(Error::store)? {
      Some(g) => g.name,
      None => String::new(),
    };
    let notice = Notice::new(
      NotificationKind::GroupInvite,
      "Group invitation",
      format!("You have been invited to join {group_name}"),
    )
    .group(group_id)
    .object(group_id);
    self.notify_quietly(user.id, notice).await;
    tracing::info!(group_id, actor_id, invitee = user.id, %role, "member invited");
    Ok(member)
  }

  /// Accept or decline a pending invitation.
  pub async fn respond_invite(
    &self,
    user_id: UserId,
    group_id: GroupId,
    accept: bool,
  ) -> Result<GroupMember> {
    let member = self
      .store
      .get_member(group_id, user_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound("invitation"))?;
    if member.status != MemberStatus::Invited {
      return Err(Error::Conflict(format!("membership is {}", member.status)));
    }
    let (status, action) = if accept {
      (MemberStatus::Active, "accept_invite")
    } else {
      (MemberStatus::Removed, "decline_invite")
    };
    self.store.update_member(member.id, member.role, status).await.map_err(Error::store)?;
    self.record(group_id, user_id, action, "member", Some(member.id), json!({})).await?;
    Ok(GroupMember { status, ..member })
  }

  /// Change a member's role. Only an owner may touch an owner or grant
  /// ownership; granting it to someone else hands it over and the acting
  /// owner becomes an admin.
  pub async fn change_role(
    &self,
    actor_id: UserId,
    group_id: GroupId,
    member_id: MemberId,
    role: GroupRole,
  ) -> Result<GroupMember> {
    let actor = self.acting(group_id, actor_id, GroupRole::Admin).await?;
    let target = self.target(group_id, member_id).await?;
    let touches_owner = target.role == GroupRole::Owner || role == GroupRole::Owner;
    if touches_owner && actor.role != GroupRole::Owner {
      return Err(Error::Forbidden("only an owner can change ownership".into()));
    }
    if target.role == role {
      return Ok(target);
    }

    if role == GroupRole::Owner {
      if target.status != MemberStatus::Active {
        return Err(Error::Conflict("ownership needs an active member".into()));
      }
      self.store.transfer_ownership(actor.id, target.id).await.map_err(Error::store)?;
    } else {
      if target.role == GroupRole::Owner && self.active_owners(group_id).await? <= 1 {
        return Err(Error::Conflict("the group must keep an owner".into()));
      }
      self.store.update_member(target.id, role, target.status).await.map_err(Error::store)?;
    }

    self
      .record(group_id, actor_id, "change_role", "member", Some(target.id), json!({
        "from": target.role,
        "to": role,
      }))
      .await?;
    tracing::info!(group_id, actor_id, member_id, from = %target.role, to = %role, "role changed");
    Ok(GroupMember { role, ..target })
  }

  pub async fn remove_member(
    &self,
    actor_id: UserId,
    group_id: GroupId,
    member_id: MemberId,
  ) -> Result<()> {
    let actor = self.acting(group_id, actor_id, GroupRole::Admin).await?;
    let target = self.target(group_id, member_id).await?;
    if target.role == GroupRole::Owner {
      if actor.role != GroupRole::Owner {
        return Err(Error::Forbidden("only an owner can remove an owner".into()));
      }
      if self.active_owners(group_id).await? <= 1 {
        return Err(Error::Conflict("the group must keep an owner".into()));
      }
    }
    self
      .store
      .update_member(target.id, target.role, MemberStatus::Removed)
      .await
      .map_err(Error::store)?;
    self
      .record(group_id, actor_id, "remove_member", "member", Some(target.id), json!({
        "user_id": target.user_id,
      }))
      .await?;
    Ok(())
  }

  pub async fn members(&self, user_id: UserId, group_id: GroupId) -> Result<Vec<GroupMember>> {
    self.acting(group_id, user_id, GroupRole::Viewer).await?;
    self.store.list_members(group_id).await.map_err(Error::store)
  }

  // ─── Trees ─────────────────────────────────────────────────────────────────

  /// Link one of the actor's own trees, then look for new duplicates.
  pub async fn link_tree(
    &self,
    actor_id: UserId,
    group_id: GroupId,
    tree_id: TreeId,
  ) -> Result<GroupTree> {
    self.acting(group_id, actor_id, GroupRole::Member).await?;
    let tree = self.owned_tree(actor_id, tree_id).await?;
    let link = self
      .store
      .upsert_link(group_id, tree_id, actor_id, LinkStatus::Active)
      .await
      .map_err(Error::store)?;
    self
      .record(group_id, actor_id, "link_tree", "tree", Some(tree_id), json!({
        "tree_name": tree.name,
      }))
      .await?;
    if let Err(e) = self.refresh_conflicts(group_id).await {
      tracing::warn!(group_id, tree_id, error = %e, "conflict refresh after link failed");
    }
    Ok(link)
  }

  /// Unlink a tree. Admins may unlink any tree, members only their own.
  pub async fn unlink_tree(
    &self,
    actor_id: UserId,
    group_id: GroupId,
    tree_id: TreeId,
  ) -> Result<GroupTree> {
    let actor = self.acting(group_id, actor_id, GroupRole::Viewer).await?;
    let link = self
      .store
      .get_link(group_id, tree_id)
      .await
      .map_err(Error::store)?
      .filter(|l| l.status == LinkStatus::Active)
      .ok_or(Error::NotFound("linked tree"))?;
    let owns_tree = self
      .store
      .get_tree(tree_id)
      .await
      .map_err(Error::store)?
      .is_some_and(|t| t.owner_id == actor_id);
    if !actor.may(GroupRole::Admin) && !owns_tree {
      return Err(Error::Forbidden("only an admin or the tree owner can unlink".into()));
    }
    let link = self
      .store
      .upsert_link(group_id, tree_id, link.linked_by, LinkStatus::Removed)
      .await
      .map_err(Error::store)?;
    self.record(group_id, actor_id, "unlink_tree", "tree", Some(tree_id), json!({})).await?;
    Ok(link)
  }

  pub async fn linked_trees(&self, user_id: UserId, group_id: GroupId) -> Result<Vec<GroupTree>> {
    self.acting(group_id, user_id, GroupRole::Viewer).await?;
    self.store.list_linked_trees(group_id).await.map_err(Error::store)
  }

  // ─── Conflicts ─────────────────────────────────────────────────────────────

  /// Scan every active person of every linked tree for shared duplicate
  /// keys and store one conflict per new key. Returns how many were created
  /// and notifies active members when there are any.
  pub(crate) async fn refresh_conflicts(&self, group_id: GroupId) -> Result<u64> {
    let links = self.store.list_linked_trees(group_id).await.map_err(Error::store)?;
    let mut by_key: BTreeMap<String, Vec<(TreeId, PersonId)>> = BTreeMap::new();
    for link in &links {
      let persons = self.store.list_active_persons(link.tree_id).await.map_err(Error::store)?;
      for person in &persons {
        if let Some(key) = duplicate_key(person) {
          by_key.entry(key).or_default().push((link.tree_id, person.id));
        }
      }
    }

    let known: HashSet<String> =
      self.store.conflict_summaries(group_id).await.map_err(Error::store)?.into_iter().collect();
    let mut created = 0;
    for (key, people) in by_key {
      let summary = format!("{DUPLICATE_PREFIX}{key}");
      if people.len() < 2 || known.contains(&summary) {
        continue;
      }
      self
        .store
        .insert_conflict(NewConflict {
          group_id,
          tree_id: people[0].0,
          conflict_type: ConflictType::Persona,
          summary,
          detail: ConflictDetail { persona_ids: people.iter().map(|(_, id)| *id).collect(), key },
        })
        .await
        .map_err(Error::store)?;
      created += 1;
    }

    if created > 0 {
      tracing::info!(group_id, created, "duplicate conflicts found");
      let members = self.store.list_members(group_id).await.map_err(Error::store)?;
      for member in members.iter().filter(|m| m.status == MemberStatus::Active) {
        let notice = Notice::new(
          NotificationKind::GroupConflicts,
          "Possible duplicates",
          format!("{created} new possible duplicates to review"),
        )
        .group(group_id)
        .object(group_id);
        self.notify_quietly(member.user_id, notice).await;
      }
    }
    Ok(created)
  }

  pub async fn rebuild_conflicts(&self, actor_id: UserId, group_id: GroupId) -> Result<u64> {
    self.acting(group_id, actor_id, GroupRole::Admin).await?;
    let created = self.refresh_conflicts(group_id).await?;
    self
      .record(group_id, actor_id, "rebuild_conflicts", "group", Some(group_id), json!({
        "created": created,
      }))
      .await?;
    Ok(created)
  }

  pub async fn resolve_conflict(
    &self,
    actor_id: UserId,
    group_id: GroupId,
    conflict_id: ConflictId,
  ) -> Result<GroupConflict> {
    self.acting(group_id, actor_id, GroupRole::Admin).await?;
    let conflict = self
      .store
      .get_conflict(conflict_id)
      .await
      .map_err(Error::store)?
      .filter(|c| c.group_id == group_id)
      .ok_or(Error::NotFound("conflict"))?;
    if !self.store.resolve_conflict(conflict_id, actor_id).await.map_err(Error::store)? {
      return Err(Error::Conflict(format!("conflict is {}", conflict.status)));
    }
    self
      .record(group_id, actor_id, "resolve_conflict", "conflict", Some(conflict_id), json!({
        "summary": conflict.summary,
      }))
      .await?;
    self
      .store
      .get_conflict(conflict_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound("conflict"))
  }

  pub async fn conflicts(
    &self,
    user_id: UserId,
    group_id: GroupId,
    status: Option<ConflictStatus>,
  ) -> Result<Vec<GroupConflict>> {
    self.acting(group_id, user_id, GroupRole::Viewer).await?;
    self.store.list_conflicts(group_id, status).await.map_err(Error::store)
  }

  pub async fn changes(&self, user_id: UserId, group_id: GroupId) -> Result<Vec<GroupChange>> {
    self.acting(group_id, user_id, GroupRole::Viewer).await?;
    self.store.list_changes(group_id).await.map_err(Error::store)
  }
}

#[cfg(test)]
mod tests {
  use arxiu_core::user::{User, UserRole};

  use super::*;
  use crate::testing;

  type TestEngine = std::sync::Arc<Engine<arxiu_store_sqlite::SqliteStore>>;

  /// Group owned by anna with pau as an active member of `role`.
  async fn group_with(engine: &TestEngine, role: GroupRole) -> (GroupId, User, User, GroupMember) {
    let anna = testing::user(engine, "anna", UserRole::User).await;
    let pau = testing::user(engine, "pau", UserRole::User).await;
    let (group, _) = engine.create_group(anna.id, "Puig research", "").await.unwrap();
    engine.invite(anna.id, group.id, "PAU@example.org", role).await.unwrap();
    let member = engine.respond_invite(pau.id, group.id, true).await.unwrap();
    (group.id, anna, pau, member)
  }

  #[tokio::test]
  async fn shared_person_yields_one_conflict() {
    let engine = testing::engine().await;
    let (group, anna, pau, _) = group_with(&engine, GroupRole::Member).await;
    let t1 = testing::tree(&engine, &anna, "T1").await;
    let t2 = testing::tree(&engine, &pau, "T2").await;
    testing::person(&engine, &t1, "Maria", "Soler", Some("1905")).await;
    testing::person(&engine, &t2, "Maria", "Soler", Some("3 MAR 1905")).await;
    testing::person(&engine, &t2, "", "", None).await;

    engine.link_tree(anna.id, group, t1.id).await.unwrap();
    assert!(engine.conflicts(anna.id, group, None).await.unwrap().is_empty());
    engine.link_tree(pau.id, group, t2.id).await.unwrap();

    let conflicts = engine.conflicts(pau.id, group, None).await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].summary, "Possible duplicat: maria soler 1905");
    assert_eq!(conflicts[0].detail.persona_ids.len(), 2);
    assert_eq!(engine.rebuild_conflicts(anna.id, group).await.unwrap(), 0);

    for user in [&anna, &pau] {
      let inbox = engine.notifications(user.id, false, 10, 0).await.unwrap();
      assert!(inbox.iter().any(|n| n.kind == NotificationKind::GroupConflicts));
    }

    let resolved = engine.resolve_conflict(anna.id, group, conflicts[0].id).await.unwrap();
    assert_eq!(resolved.status, ConflictStatus::Resolved);
    assert!(matches!(
      engine.resolve_conflict(anna.id, group, conflicts[0].id).await,
      Err(Error::Conflict(_))
    ));
    // Resolved summaries stay known, so a rebuild does not reopen them.
    assert_eq!(engine.rebuild_conflicts(anna.id, group).await.unwrap(), 0);
  }

  #[tokio::test]
  async fn roles_gate_actions() {
    let engine = testing::engine().await;
    let (group, anna, pau, member) = group_with(&engine, GroupRole::Viewer).await;
    let outsider = testing::user(&engine, "carla", UserRole::User).await;
    let tree = testing::tree(&engine, &pau, "Pau").await;

    assert!(matches!(engine.group(outsider.id, group).await, Err(Error::NotFound("group"))));
    assert!(matches!(
      engine.link_tree(pau.id, group, tree.id).await,
      Err(Error::Forbidden(_))
    ));
    assert!(matches!(
      engine.invite(pau.id, group, "carla@example.org", GroupRole::Viewer).await,
      Err(Error::Forbidden(_))
    ));
    assert!(matches!(
      engine.invite(anna.id, group, "nobody@example.org", GroupRole::Viewer).await,
      Err(Error::NotFound("user"))
    ));
    assert!(matches!(
      engine.invite(anna.id, group, "pau@example.org", GroupRole::Viewer).await,
      Err(Error::Conflict(_))
    ));

    let admin = engine.change_role(anna.id, group, member.id, GroupRole::Admin).await.unwrap();
    assert_eq!(admin.role, GroupRole::Admin);
    let owner_member = engine.group(anna.id, group).await.unwrap().member;
    assert!(matches!(
      engine.change_role(pau.id, group, owner_member.id, GroupRole::Member).await,
      Err(Error::Forbidden(_))
    ));
    assert!(matches!(
      engine.remove_member(anna.id, group, owner_member.id).await,
      Err(Error::Conflict(_))
    ));

    let detail = engine.group(pau.id, group).await.unwrap();
    assert_eq!(detail.members.len(), 2);
    let changes = engine.changes(pau.id, group).await.unwrap();
    let actions: Vec<_> = changes.iter().map(|c| c.action.as_str()).collect();
    assert_eq!(actions, ["create_group", "invite", "accept_invite", "change_role"]);
    assert!(changes.windows(2).all(|w| w[0].created_at <= w[1].created_at));
  }

  #[tokio::test]
  async fn ownership_transfer_and_reinvite() {
    let engine = testing::engine().await;
    let (group, anna, pau, member) = group_with(&engine, GroupRole::Admin).await;

    engine.change_role(anna.id, group, member.id, GroupRole::Owner).await.unwrap();
    let anna_member = engine.group(anna.id, group).await.unwrap().member;
    assert_eq!(anna_member.role, GroupRole::Admin);
    assert_eq!(engine.group(pau.id, group).await.unwrap().member.role, GroupRole::Owner);

    engine.remove_member(pau.id, group, anna_member.id).await.unwrap();
    assert!(matches!(engine.group(anna.id, group).await, Err(Error::NotFound(_))));
    engine.invite(pau.id, group, "anna@example.org", GroupRole::Member).await.unwrap();
    assert!(matches!(
      engine.respond_invite(pau.id, group, true).await,
      Err(Error::Conflict(_))
    ));
    let declined = engine.respond_invite(anna.id, group, false).await.unwrap();
    assert_eq!(declined.status, MemberStatus::Removed);
  }

  #[tokio::test]
  async fn members_unlink_only_their_own_trees() {
    let engine = testing::engine().await;
    let (group, anna, pau, _) = group_with(&engine, GroupRole::Member).await;
    let anna_tree = testing::tree(&engine, &anna, "Anna").await;
    let pau_tree = testing::tree(&engine, &pau, "Pau").await;
    engine.link_tree(anna.id, group, anna_tree.id).await.unwrap();
    engine.link_tree(pau.id, group, pau_tree.id).await.unwrap();
    assert!(matches!(
      engine.link_tree(pau.id, group, anna_tree.id).await,
      Err(Error::NotFound("tree"))
    ));

    assert!(matches!(
      engine.unlink_tree(pau.id, group, anna_tree.id).await,
      Err(Error::Forbidden(_))
    ));
    let link = engine.unlink_tree(pau.id, group, pau_tree.id).await.unwrap();
    assert_eq!(link.status, LinkStatus::Removed);
    engine.unlink_tree(anna.id, group, anna_tree.id).await.unwrap();
    assert!(engine.linked_trees(anna.id, group).await.unwrap().is_empty());

    let relinked = engine.link_tree(pau.id, group, pau_tree.id).await.unwrap();
    assert_eq!(relinked.status, LinkStatus::Active);
  }

  #[test]
  fn nameless_persons_have_no_key() {
    let now = chrono::Utc::now();
    let mut p = Person {
      id:          1,
      tree_id:     1,
      external_id: None,
      given:       String::new(),
      surname1:    String::new(),
      surname2:    String::new(),
      full_name:   String::new(),
      sex:         Default::default(),
      birth_date:  Some("1905".into()),
      birth_place: None,
      death_date:  None,
      death_place: None,
      visibility:  Default::default(),
      status:      Default::default(),
      created_at:  now,
      updated_at:  now,
    };
    assert_eq!(duplicate_key(&p), None);
    p.full_name = " Maria SOLER ".into();
    assert_eq!(duplicate_key(&p).as_deref(), Some("maria soler 1905"));
    p.birth_date = None;
    assert_eq!(duplicate_key(&p).as_deref(), Some("maria soler"));
  }
}

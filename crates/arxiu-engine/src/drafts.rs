//! Moderated drafts.
//!
//! Authors and editors (moderators) edit `draft` versions under an optimistic
//! lock and submit them; moderators approve or reject. Approval swaps the
//! entity's published pointer in the same transaction. Admins may point it
//! back at any earlier published version.

use arxiu_core::{
  draft::{
    DraftContent, DraftQuery, DraftStatus, DraftUpdate, DraftVersion, EntityId, EntityKind,
    LockOutcome, Moderation, ModeratedEntity, VersionId,
  },
  store::{DraftStore, Store},
  user::User,
};
use serde::Serialize;

use crate::{Engine, Error, Result};

/// One page of the moderation queue.
#[derive(Debug, Clone, Serialize)]
pub struct DraftPage {
  pub items: Vec<DraftVersion>,
  pub total: u64,
}

fn notes(raw: Option<&str>) -> Option<String> {
  raw.map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned)
}

fn may_edit(user: &User, version: &DraftVersion) -> bool {
  version.created_by == user.id || user.can_moderate()
}

impl<S: Store + 'static> Engine<S> {
  /// Create an entity together with its first draft.
  pub async fn create_entity(
    &self,
    user: &User,
    content: DraftContent,
  ) -> Result<(ModeratedEntity, DraftVersion)> {
    let entity =
      self.store.create_entity(content.kind(), user.id).await.map_err(Error::store)?;
    let draft =
      self.store.create_draft(entity.id, user.id, true, content).await.map_err(Error::store)?;
    tracing::info!(entity_id = entity.id, kind = %entity.kind, user_id = user.id, "entity created");
    Ok((entity, draft))
  }

  pub async fn entity(&self, id: EntityId) -> Result<ModeratedEntity> {
    self.store.get_entity(id).await.map_err(Error::store)?.ok_or(Error::NotFound("entity"))
  }

  /// Published content of an entity, if it has any.
  pub async fn published(&self, id: EntityId) -> Result<Option<DraftVersion>> {
    let entity = self.entity(id).await?;
    match entity.current_version_id {
      Some(version_id) => self.store.get_version(version_id).await.map_err(Error::store),
      None => Ok(None),
    }
  }

  /// Open a draft on an existing entity, seeded from the published content.
  /// Without `force_new` the caller's open draft is returned instead.
  pub async fn start_draft(
    &self,
    user: &User,
    entity_id: EntityId,
    force_new: bool,
  ) -> Result<DraftVersion> {
    let entity = self.entity(entity_id).await?;
    let content = match self.published(entity_id).await? {
      Some(version) => version.content,
      None => DraftContent::empty(entity.kind),
    };
    self
      .store
      .create_draft(entity_id, user.id, force_new, content)
      .await
      .map_err(Error::store)
  }

  /// A version the caller may see: published ones, their own, or any for
  /// moderators.
  pub async fn draft(&self, user: &User, id: VersionId) -> Result<DraftVersion> {
    self
      .store
      .get_version(id)
      .await
      .map_err(Error::store)?
      .filter(|v| v.status == DraftStatus::Published || may_edit(user, v))
      .ok_or(Error::NotFound("draft"))
  }

  async fn editable(&self, user: &User, id: VersionId) -> Result<DraftVersion> {
    let version = self.draft(user, id).await?;
    if !may_edit(user, &version) {
      return Err(Error::Forbidden("only the author or an editor may change a draft".into()));
    }
    Ok(version)
  }

  /// Optimistic save. `lock_version` is the value the caller loaded; a
  /// mismatch means someone else saved in between.
  pub async fn save_draft(
    &self,
    user: &User,
    id: VersionId,
    lock_version: i64,
    content: DraftContent,
  ) -> Result<DraftVersion> {
    let version = self.editable(user, id).await?;
    if version.status != DraftStatus::Draft {
      return Err(Error::Conflict(format!("version is {}", version.status)));
    }
    let entity = self.entity(version.entity_id).await?;
    if content.kind() != entity.kind {
      return Err(Error::validation("content", format!("expected {} content", entity.kind)));
    }

    let outcome = self
      .store
      .update_draft(DraftUpdate { version_id: id, lock_version, content })
      .await
      .map_err(Error::store)?;
    match outcome {
      LockOutcome::Saved { lock_version } => {
        tracing::debug!(version_id = id, lock_version, "draft saved");
      }
      LockOutcome::Stale { current } => {
        tracing::debug!(version_id = id, lock_version, current, "stale draft save");
        return Err(Error::Conflict("another edit happened".into()));
      }
      LockOutcome::Missing => return Err(Error::NotFound("draft")),
    }
    self.store.get_version(id).await.map_err(Error::store)?.ok_or(Error::NotFound("draft"))
  }

  async fn transition(
    &self,
    version: &DraftVersion,
    to: DraftStatus,
    moderation: Moderation,
  ) -> Result<DraftVersion> {
    version.status.check_transition(to)?;
    let moved = match to {
      DraftStatus::Published => {
        self.store.approve_version(version.id, moderation).await.map_err(Error::store)?
      }
      _ => self
        .store
        .set_draft_status(version.id, version.status, to, moderation)
        .await
        .map_err(Error::store)?,
    };
    if !moved {
      return Err(Error::Conflict("the version changed status concurrently".into()));
    }
    tracing::info!(version_id = version.id, from = %version.status, %to, "draft status changed");
    self
      .store
      .get_version(version.id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound("draft"))
  }

  /// `draft → pendent`, after full validation of the content.
  pub async fn submit_draft(&self, user: &User, id: VersionId) -> Result<DraftVersion> {
    let version = self.editable(user, id).await?;
    version.status.check_transition(DraftStatus::Pending)?;
    version.content.validate()?;
    self.transition(&version, DraftStatus::Pending, Moderation::default()).await
  }

  /// `pendent → draft`.
  pub async fn withdraw_draft(&self, user: &User, id: VersionId) -> Result<DraftVersion> {
    let version = self.editable(user, id).await?;
    self.transition(&version, DraftStatus::Draft, Moderation::default()).await
  }

  async fn moderate(
    &self,
    moderator: &User,
    id: VersionId,
    to: DraftStatus,
    note: Option<&str>,
  ) -> Result<DraftVersion> {
    if !moderator.can_moderate() {
      return Err(Error::Forbidden("moderator role required".into()));
    }
    let version = self.draft(moderator, id).await?;
    let moderation = Moderation { moderator_id: Some(moderator.id), notes: notes(note) };
    self.transition(&version, to, moderation).await
  }

  /// `pendent → publicat`; the entity now shows this version.
  pub async fn approve_draft(
    &self,
    moderator: &User,
    id: VersionId,
    note: Option<&str>,
  ) -> Result<DraftVersion> {
    self.moderate(moderator, id, DraftStatus::Published, note).await
  }

  pub async fn reject_draft(
    &self,
    moderator: &User,
    id: VersionId,
    note: Option<&str>,
  ) -> Result<DraftVersion> {
    self.moderate(moderator, id, DraftStatus::Rejected, note).await
  }

  /// Point the entity back at an earlier published version. No row is
  /// created.
  pub async fn rollback(
    &self,
    admin: &User,
    entity_id: EntityId,
    version_id: VersionId,
  ) -> Result<ModeratedEntity> {
    if !admin.is_admin() {
      return Err(Error::Forbidden("admin role required".into()));
    }
    let entity = self.entity(entity_id).await?;
    let version = self
      .store
      .get_version(version_id)
      .await
      .map_err(Error::store)?
      .filter(|v| v.entity_id == entity_id)
      .ok_or(Error::NotFound("draft"))?;
    if version.status != DraftStatus::Published {
      return Err(Error::Conflict(format!("version is {}, not publicat", version.status)));
    }
    self.store.set_current_version(entity_id, version_id).await.map_err(Error::store)?;
    tracing::info!(entity_id, version_id, admin_id = admin.id, "entity rolled back");
    Ok(ModeratedEntity { current_version_id: Some(version_id), ..entity })
  }

  /// Versions of one entity visible to the caller, oldest first.
  pub async fn versions(&self, user: &User, entity_id: EntityId) -> Result<Vec<DraftVersion>> {
    self.entity(entity_id).await?;
    let mut versions = self.store.list_versions(entity_id).await.map_err(Error::store)?;
    versions.retain(|v| v.status == DraftStatus::Published || may_edit(user, v));
    Ok(versions)
  }

  /// Drafts awaiting review (or any status the moderator asks for).
  pub async fn moderation_queue(
    &self,
    moderator: &User,
    status: Option<DraftStatus>,
    kind: Option<EntityKind>,
    limit: Option<usize>,
    offset: Option<usize>,
  ) -> Result<DraftPage> {
    if !moderator.can_moderate() {
      return Err(Error::Forbidden("moderator role required".into()));
    }
    let query = DraftQuery {
      status: Some(status.unwrap_or(DraftStatus::Pending)),
      kind,
      created_by: None,
      limit,
      offset,
    };
    let total = self.store.count_drafts(query.clone()).await.map_err(Error::store)?;
    let items = self.store.list_drafts(query).await.map_err(Error::store)?;
    Ok(DraftPage { items, total })
  }

  /// The caller's own versions in any status.
  pub async fn my_drafts(
    &self,
    user: &User,
    status: Option<DraftStatus>,
  ) -> Result<Vec<DraftVersion>> {
    let query = DraftQuery { status, created_by: Some(user.id), ..Default::default() };
    self.store.list_drafts(query).await.map_err(Error::store)
  }
}

#[cfg(test)]
mod tests {
  use arxiu_core::{
    draft::{EventContent, FactContent, SectionContent},
    user::UserRole,
  };

  use super::*;
  use crate::testing;

  fn section(title: &str, body: &str) -> DraftContent {
    DraftContent::HistorySection(SectionContent { title: title.into(), body: body.into() })
  }

  #[tokio::test]
  async fn stale_save_is_rejected() {
    let engine = testing::engine().await;
    let anna = testing::user(&engine, "anna", UserRole::User).await;
    let editor = testing::user(&engine, "pau", UserRole::Moderator).await;
    let (_, draft) = engine.create_entity(&anna, section("Origen", "v0")).await.unwrap();
    for i in 0..3 {
      let content = section("Origen", &format!("v{}", i + 1));
      engine.save_draft(&anna, draft.id, i, content).await.unwrap();
    }

    let loaded_by_a = engine.draft(&anna, draft.id).await.unwrap();
    let loaded_by_b = engine.draft(&editor, draft.id).await.unwrap();
    assert_eq!(loaded_by_a.lock_version, 3);
    assert_eq!(loaded_by_b.lock_version, 3);

    let saved = engine.save_draft(&editor, draft.id, 3, section("Origen", "B")).await.unwrap();
    assert_eq!(saved.lock_version, 4);
    let stale = engine.save_draft(&anna, draft.id, 3, section("Origen", "A")).await;
    let Err(Error::Conflict(message)) = stale else { panic!("expected conflict, got {stale:?}") };
    assert_eq!(message, "another edit happened");

    let stored = engine.draft(&anna, draft.id).await.unwrap();
    assert_eq!(stored.lock_version, 4);
    assert_eq!(stored.content, section("Origen", "B"));
  }

  #[tokio::test]
  async fn lifecycle_publishes_and_rolls_back() {
    let engine = testing::engine().await;
    let anna = testing::user(&engine, "anna", UserRole::User).await;
    let moderator = testing::user(&engine, "mod", UserRole::Moderator).await;
    let admin = testing::user(&engine, "admin", UserRole::Admin).await;

    let (entity, v1) = engine.create_entity(&anna, section("", "")).await.unwrap();
    assert!(matches!(
      engine.submit_draft(&anna, v1.id).await,
      Err(Error::Validation { field, .. }) if field == "title"
    ));
    let fact = DraftContent::HistoryFact(FactContent::default());
    assert!(matches!(
      engine.save_draft(&anna, v1.id, 0, fact).await,
      Err(Error::Validation { .. })
    ));
    engine.save_draft(&anna, v1.id, 0, section("Origen", "Primer text")).await.unwrap();
    engine.submit_draft(&anna, v1.id).await.unwrap();
    assert!(matches!(
      engine.save_draft(&anna, v1.id, 1, section("Origen", "x")).await,
      Err(Error::Conflict(_))
    ));
    engine.withdraw_draft(&anna, v1.id).await.unwrap();
    engine.submit_draft(&anna, v1.id).await.unwrap();

    assert!(matches!(engine.approve_draft(&anna, v1.id, None).await, Err(Error::Forbidden(_))));
    let approved = engine.approve_draft(&moderator, v1.id, Some(" ok ")).await.unwrap();
    assert_eq!(approved.status, DraftStatus::Published);
    assert_eq!(approved.moderator_id, Some(moderator.id));
    assert_eq!(approved.moderation_notes.as_deref(), Some("ok"));
    assert_eq!(engine.entity(entity.id).await.unwrap().current_version_id, Some(v1.id));
    assert!(matches!(
      engine.approve_draft(&moderator, v1.id, None).await,
      Err(Error::Conflict(_))
    ));

    let v2 = engine.start_draft(&anna, entity.id, false).await.unwrap();
    assert_eq!(v2.content, section("Origen", "Primer text"));
    assert_eq!(engine.start_draft(&anna, entity.id, false).await.unwrap().id, v2.id);
    engine.save_draft(&anna, v2.id, 0, section("Origen", "Segon text")).await.unwrap();
    engine.submit_draft(&anna, v2.id).await.unwrap();
    engine.approve_draft(&moderator, v2.id, None).await.unwrap();
    assert_eq!(engine.entity(entity.id).await.unwrap().current_version_id, Some(v2.id));

    assert!(matches!(
      engine.rollback(&moderator, entity.id, v1.id).await,
      Err(Error::Forbidden(_))
    ));
    let rolled = engine.rollback(&admin, entity.id, v1.id).await.unwrap();
    assert_eq!(rolled.current_version_id, Some(v1.id));
    assert_eq!(engine.published(entity.id).await.unwrap().unwrap().id, v1.id);
    assert_eq!(engine.versions(&admin, entity.id).await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn rejection_and_queue() {
    let engine = testing::engine().await;
    let anna = testing::user(&engine, "anna", UserRole::User).await;
    let carla = testing::user(&engine, "carla", UserRole::User).await;
    let moderator = testing::user(&engine, "mod", UserRole::Moderator).await;

    let event = DraftContent::Event(EventContent {
      title: "Fira".into(),
      tags: vec!["fira".into()],
      sources: vec!["https://example.org/fira".into()],
      ..Default::default()
    });
    let (entity, draft) = engine.create_entity(&anna, event).await.unwrap();
    engine.submit_draft(&anna, draft.id).await.unwrap();
    assert!(matches!(engine.draft(&carla, draft.id).await, Err(Error::NotFound(_))));
    assert!(matches!(
      engine.moderation_queue(&anna, None, None, None, None).await,
      Err(Error::Forbidden(_))
    ));

    let queue = engine.moderation_queue(&moderator, None, None, Some(10), None).await.unwrap();
    assert_eq!(queue.total, 1);
    assert_eq!(queue.items[0].id, draft.id);

    let rejected = engine.reject_draft(&moderator, draft.id, Some("cal font")).await.unwrap();
    assert_eq!(rejected.status, DraftStatus::Rejected);
    let admin = testing::user(&engine, "admin", UserRole::Admin).await;
    assert!(matches!(engine.rollback(&admin, entity.id, draft.id).await, Err(Error::Conflict(_))));
    let queue = engine.moderation_queue(&moderator, None, None, None, None).await.unwrap();
    assert_eq!(queue.total, 0);
    assert!(engine.versions(&carla, entity.id).await.unwrap().is_empty());
    assert_eq!(engine.my_drafts(&anna, Some(DraftStatus::Rejected)).await.unwrap().len(), 1);
  }
}

//! Owner-scoped access to trees and their persons.

use arxiu_core::{
  store::{Store, TreeStore},
  tree::{NewTree, Person, Relation, Tree, TreeId, TreeStatus, TreeVisibility},
  user::UserId,
};

use crate::{Engine, Error, Result};

impl<S: Store + 'static> Engine<S> {
  pub async fn create_tree(
    &self,
    owner_id: UserId,
    name: &str,
    visibility: TreeVisibility,
  ) -> Result<Tree> {
    let name = name.trim();
    if name.is_empty() {
      return Err(Error::validation("name", "must not be empty"));
    }
    let tree = self
      .store
      .create_tree(NewTree { owner_id, name: name.to_owned(), visibility })
      .await
      .map_err(Error::store)?;
    tracing::info!(owner_id, tree_id = tree.id, "tree created");
    Ok(tree)
  }

  pub async fn trees(&self, owner_id: UserId) -> Result<Vec<Tree>> {
    self.store.list_trees(owner_id).await.map_err(Error::store)
  }

  /// The tree, if `owner_id` owns it. Someone else's tree is `NotFound`.
  pub async fn owned_tree(&self, owner_id: UserId, tree_id: TreeId) -> Result<Tree> {
    self
      .store
      .get_tree(tree_id)
      .await
      .map_err(Error::store)?
      .filter(|t| t.owner_id == owner_id)
      .ok_or(Error::NotFound("tree"))
  }

  pub async fn update_tree(
    &self,
    owner_id: UserId,
    tree_id: TreeId,
    name: &str,
    visibility: TreeVisibility,
    status: TreeStatus,
  ) -> Result<Tree> {
    self.owned_tree(owner_id, tree_id).await?;
    let name = name.trim();
    if name.is_empty() {
      return Err(Error::validation("name", "must not be empty"));
    }
    self
      .store
      .update_tree(tree_id, name.to_owned(), visibility, status)
      .await
      .map_err(Error::store)?;
    self.owned_tree(owner_id, tree_id).await
  }

  pub async fn persons(&self, owner_id: UserId, tree_id: TreeId) -> Result<Vec<Person>> {
    self.owned_tree(owner_id, tree_id).await?;
    self.store.list_active_persons(tree_id).await.map_err(Error::store)
  }

  pub async fn relations(&self, owner_id: UserId, tree_id: TreeId) -> Result<Vec<Relation>> {
    self.owned_tree(owner_id, tree_id).await?;
    self.store.list_relations(tree_id).await.map_err(Error::store)
  }
}

#[cfg(test)]
mod tests {
  use arxiu_core::user::UserRole;

  use super::*;
  use crate::testing;

  #[tokio::test]
  async fn trees_are_private_to_their_owner() {
    let engine = testing::engine().await;
    let anna = testing::user(&engine, "anna", UserRole::User).await;
    let pau = testing::user(&engine, "pau", UserRole::User).await;

    let tree = engine.create_tree(anna.id, " Puig ", TreeVisibility::Private).await.unwrap();
    assert_eq!(tree.name, "Puig");
    assert!(matches!(engine.owned_tree(pau.id, tree.id).await, Err(Error::NotFound("tree"))));
    assert!(matches!(
      engine.create_tree(anna.id, "  ", TreeVisibility::Private).await,
      Err(Error::Validation { .. })
    ));

    let renamed = engine
      .update_tree(anna.id, tree.id, "Puig i Soler", TreeVisibility::Public, TreeStatus::Active)
      .await
      .unwrap();
    assert_eq!(renamed.visibility, TreeVisibility::Public);
    assert_eq!(engine.trees(anna.id).await.unwrap().len(), 1);
  }
}

//! Orchestration services for Arxiu, generic over any [`Store`].
//!
//! [`Engine`] owns the process-wide state the services share: the import
//! worker's per-owner gate, the sync scheduler's single-flight set and
//! failure counters, and the maintenance-banner cache. Each concern lives in
//! its own module as an `impl Engine<S>` block:
//!
//! | Module | Concern |
//! |--------|---------|
//! | [`trees`] | trees, persons, relations |
//! | [`imports`] | uploads, job queue |
//! | [`worker`] | polling import worker |
//! | [`normalize`] | parse result → persons and relations |
//! | [`sync`] | external connections and the sync scheduler |
//! | [`search`] | archival record index |
//! | [`matching`] | candidate scoring and match decisions |
//! | [`groups`] | collaboration groups |
//! | [`notify`] | notification fan-out |
//! | [`drafts`] | moderated content versions |
//! | [`credits`] | credit ledger and media grants |
//! | [`media`] | media originals on disk |
//! | [`banner`] | maintenance banner |
//! | [`users`] | accounts |

pub mod banner;
pub mod config;
pub mod credits;
pub mod drafts;
pub mod error;
mod gate;
pub mod groups;
pub mod imports;
pub mod matching;
pub mod media;
pub mod normalize;
pub mod notify;
pub mod search;
pub mod sync;
pub mod trees;
pub mod users;
pub mod worker;

use std::sync::Arc;

use arxiu_core::store::Store;
use arxiu_gramps::SecretBox;

pub use config::EngineConfig;
pub use error::{Error, Result};

/// Shared service handle. Wrap in an [`Arc`] and clone freely.
pub struct Engine<S> {
  store:   Arc<S>,
  config:  EngineConfig,
  secrets: SecretBox,
  gate:    gate::Gate,
  sync:    sync::SyncState,
  banner:  banner::BannerCache,
}

impl<S: Store + 'static> Engine<S> {
  pub fn new(store: Arc<S>, config: EngineConfig, secrets: SecretBox) -> Self {
    Self {
      store,
      config,
      secrets,
      gate: gate::Gate::default(),
      sync: sync::SyncState::default(),
      banner: banner::BannerCache::default(),
    }
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn config(&self) -> &EngineConfig { &self.config }
}

#[cfg(test)]
pub(crate) mod testing {
  use std::sync::Arc;

  use arxiu_core::{
    store::{TreeStore, UserStore},
    tree::{NewPerson, NewTree, Person, Tree, TreeVisibility},
    user::{NewUser, User, UserRole},
  };
  use arxiu_gramps::SecretBox;
  use arxiu_store_sqlite::SqliteStore;

  use crate::{Engine, EngineConfig};

  pub async fn engine_with(config: EngineConfig) -> Arc<Engine<SqliteStore>> {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let secrets = SecretBox::from_secret("test secret").unwrap();
    Arc::new(Engine::new(Arc::new(store), config, secrets))
  }

  pub async fn engine() -> Arc<Engine<SqliteStore>> { engine_with(EngineConfig::default()).await }

  pub async fn user(engine: &Engine<SqliteStore>, name: &str, role: UserRole) -> User {
    engine
      .store()
      .create_user(NewUser {
        username:      name.into(),
        email:         format!("{name}@example.org"),
        password_hash: String::new(),
        role,
      })
      .await
      .unwrap()
  }

  pub async fn tree(engine: &Engine<SqliteStore>, owner: &User, name: &str) -> Tree {
    engine
      .store()
      .create_tree(NewTree {
        owner_id:   owner.id,
        name:       name.into(),
        visibility: TreeVisibility::Private,
      })
      .await
      .unwrap()
  }

  pub async fn person(
    engine: &Engine<SqliteStore>,
    tree: &Tree,
    given: &str,
    surname: &str,
    birth: Option<&str>,
  ) -> Person {
    engine
      .store()
      .create_person(NewPerson {
        given: given.into(),
        surname1: surname.into(),
        birth_date: birth.map(str::to_owned),
        ..NewPerson::new(tree.id, None)
      })
      .await
      .unwrap()
  }
}

//! JSON REST API for the arxiu engine.
//!
//! Every route except `GET /banner` authenticates with HTTP Basic against
//! the users table. Errors are JSON bodies of the form `{"error": "…"}`.
//!
//! # Mounting
//!
//! ```rust,ignore
//! let app = Router::new().nest("/api", arxiu_api::router(state));
//! ```

pub mod auth;
pub mod banner;
pub mod connections;
pub mod drafts;
pub mod error;
pub mod groups;
pub mod imports;
pub mod matches;
pub mod media;
pub mod notifications;
pub mod records;
pub mod trees;

use std::sync::Arc;

use arxiu_core::store::Store;
use arxiu_engine::Engine;
use axum::{
  Router,
  extract::DefaultBodyLimit,
  routing::{delete, get, patch, post, put},
};
use tokio_util::sync::CancellationToken;

pub use error::ApiError;

const MIB: usize = 1024 * 1024;

/// Shared handler state.
pub struct AppState<S> {
  pub engine:   Arc<Engine<S>>,
  /// Cancelled on shutdown; outbound calls made for a request use a child.
  pub shutdown: CancellationToken,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self { engine: self.engine.clone(), shutdown: self.shutdown.clone() }
  }
}

/// Raw-body routes get the configured limit plus headroom, so the engine
/// can answer an oversized upload with its own 413 body.
fn body_limit(limit_mb: u64) -> DefaultBodyLimit {
  let limit = usize::try_from(limit_mb).unwrap_or(usize::MAX / MIB).saturating_add(1);
  DefaultBodyLimit::max(limit.saturating_mul(MIB))
}

/// Build the API router for `state`.
pub fn router<S: Store + 'static>(state: AppState<S>) -> Router {
  let gedcom_limit = body_limit(state.engine.config().upload.gedcom_max_upload_mb);
  let media_limit = body_limit(state.engine.config().media.max_upload_mb);

  Router::new()
    // Trees
    .route("/trees", get(trees::list::<S>).post(trees::create::<S>))
    .route("/trees/{id}", get(trees::get_one::<S>).patch(trees::update::<S>))
    .route("/trees/{id}/persons", get(trees::persons::<S>))
    .route("/trees/{id}/relations", get(trees::relations::<S>))
    .route("/trees/{id}/matches/rebuild", post(trees::rebuild_matches::<S>))
    // Imports
    .route("/trees/{id}/imports", post(imports::upload::<S>).layer(gedcom_limit))
    .route("/jobs", get(imports::jobs::<S>))
    .route("/jobs/{id}", get(imports::job::<S>))
    // External connections
    .route(
      "/trees/{id}/connection",
      get(connections::for_tree::<S>).post(connections::create::<S>),
    )
    .route(
      "/connections/{id}",
      put(connections::update_credentials::<S>).patch(connections::set_enabled::<S>),
    )
    .route("/connections/{id}/test", post(connections::test::<S>))
    .route("/connections/{id}/sync", post(connections::sync::<S>))
    .route("/connections/{id}/log", get(connections::log::<S>))
    // Matches
    .route("/matches", get(matches::list::<S>))
    .route("/matches/decisions", post(matches::decide_many::<S>))
    .route("/matches/{id}/decision", post(matches::decide::<S>))
    .route("/matches/{id}/decisions", get(matches::decisions::<S>))
    // Groups
    .route("/groups", post(groups::create::<S>))
    .route("/groups/{id}", get(groups::get_one::<S>))
    .route("/groups/{id}/invites", post(groups::invite::<S>))
    .route("/groups/{id}/invitation", post(groups::respond::<S>))
    .route("/groups/{id}/members", get(groups::members::<S>))
    .route(
      "/groups/{id}/members/{member_id}",
      patch(groups::change_role::<S>).delete(groups::remove_member::<S>),
    )
    .route("/groups/{id}/trees", get(groups::trees::<S>).post(groups::link_tree::<S>))
    .route("/groups/{id}/trees/{tree_id}", delete(groups::unlink_tree::<S>))
    .route("/groups/{id}/conflicts", get(groups::conflicts::<S>))
    .route("/groups/{id}/conflicts/rebuild", post(groups::rebuild_conflicts::<S>))
    .route(
      "/groups/{id}/conflicts/{conflict_id}/resolve",
      post(groups::resolve_conflict::<S>),
    )
    .route("/groups/{id}/changes", get(groups::changes::<S>))
    // Notifications
    .route("/notifications", get(notifications::list::<S>))
    .route("/notifications/unread", get(notifications::unread::<S>))
    .route("/notifications/read-all", post(notifications::mark_all_read::<S>))
    .route("/notifications/{id}/read", post(notifications::mark_read::<S>))
    .route(
      "/notifications/preferences",
      get(notifications::preferences::<S>).put(notifications::set_preferences::<S>),
    )
    // Moderated content
    .route("/entities", post(drafts::create_entity::<S>))
    .route("/entities/{id}", get(drafts::entity::<S>))
    .route("/entities/{id}/versions", get(drafts::versions::<S>))
    .route("/entities/{id}/drafts", post(drafts::start_draft::<S>))
    .route("/entities/{id}/rollback", post(drafts::rollback::<S>))
    .route("/drafts", get(drafts::mine::<S>))
    .route("/drafts/{id}", get(drafts::get_one::<S>).put(drafts::save::<S>))
    .route("/drafts/{id}/submit", post(drafts::submit::<S>))
    .route("/drafts/{id}/withdraw", post(drafts::withdraw::<S>))
    .route("/drafts/{id}/approve", post(drafts::approve::<S>))
    .route("/drafts/{id}/reject", post(drafts::reject::<S>))
    .route("/moderation", get(drafts::queue::<S>))
    // Media and credits
    .route("/media/{id}/original", put(media::upload::<S>).layer(media_limit))
    .route("/media/{id}/view", post(media::view::<S>))
    .route("/media/{id}/grant", get(media::grant::<S>))
    .route("/credits", get(media::balances::<S>))
    .route("/credits/ledger", get(media::ledger::<S>))
    .route("/credits/convert", post(media::convert::<S>))
    // Archival records
    .route("/records/search", get(records::search::<S>))
    .route("/records/{id}", put(records::put::<S>).delete(records::delete::<S>))
    // Banner
    .route("/banner", get(banner::get::<S>))
    .route("/admin/banner", put(banner::set::<S>))
    .with_state(state)
}

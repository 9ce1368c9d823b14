//! Handlers for `/trees` endpoints.
//!
//! | Method  | Path | Notes |
//! |---------|------|-------|
//! | `GET`   | `/trees` | The caller's trees |
//! | `POST`  | `/trees` | Body: `{"name":"…","visibility":"private"}` |
//! | `GET`   | `/trees/{id}` | 404 for someone else's tree |
//! | `PATCH` | `/trees/{id}` | Name, visibility, status |
//! | `GET`   | `/trees/{id}/persons` | Active persons |
//! | `GET`   | `/trees/{id}/relations` | |
//! | `POST`  | `/trees/{id}/matches/rebuild` | Returns `{"created":n}` |

use arxiu_core::{
  store::Store,
  tree::{Person, Relation, Tree, TreeId, TreeStatus, TreeVisibility},
};
use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{AppState, auth::CurrentUser, error::ApiError};

// ─── List / create ───────────────────────────────────────────────────────────

/// `GET /trees`
pub async fn list<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Tree>>, ApiError> {
  Ok(Json(state.engine.trees(user.id).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateBody {
  pub name:       String,
  #[serde(default)]
  pub visibility: TreeVisibility,
}

/// `POST /trees`
pub async fn create<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError> {
  let tree = state.engine.create_tree(user.id, &body.name, body.visibility).await?;
  Ok((StatusCode::CREATED, Json(tree)))
}

// ─── One tree ────────────────────────────────────────────────────────────────

/// `GET /trees/{id}`
pub async fn get_one<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<TreeId>,
) -> Result<Json<Tree>, ApiError> {
  Ok(Json(state.engine.owned_tree(user.id, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateBody {
  pub name:       Option<String>,
  pub visibility: Option<TreeVisibility>,
  pub status:     Option<TreeStatus>,
}

/// `PATCH /trees/{id}`; absent fields keep their value.
pub async fn update<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<TreeId>,
  Json(body): Json<UpdateBody>,
) -> Result<Json<Tree>, ApiError> {
  let current = state.engine.owned_tree(user.id, id).await?;
  let tree = state
    .engine
    .update_tree(
      user.id,
      id,
      body.name.as_deref().unwrap_or(&current.name),
      body.visibility.unwrap_or(current.visibility),
      body.status.unwrap_or(current.status),
    )
    .await?;
  Ok(Json(tree))
}

/// `GET /trees/{id}/persons`
pub async fn persons<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<TreeId>,
) -> Result<Json<Vec<Person>>, ApiError> {
  Ok(Json(state.engine.persons(user.id, id).await?))
}

/// `GET /trees/{id}/relations`
pub async fn relations<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<TreeId>,
) -> Result<Json<Vec<Relation>>, ApiError> {
  Ok(Json(state.engine.relations(user.id, id).await?))
}

/// `POST /trees/{id}/matches/rebuild`
pub async fn rebuild_matches<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<TreeId>,
) -> Result<Json<Value>, ApiError> {
  let created = state.engine.rebuild_matches(user.id, id).await?;
  Ok(Json(json!({ "created": created })))
}

//! Moderated entities and their versions.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/entities` | Body: tagged content; creates entity + first draft |
//! | `GET`  | `/entities/{id}` | Entity with its published version |
//! | `GET`  | `/entities/{id}/versions` | |
//! | `POST` | `/entities/{id}/drafts?new=true` | Open a draft |
//! | `POST` | `/entities/{id}/rollback` | Admin; body `{"version_id":n}` |
//! | `GET`  | `/drafts?status` | The caller's drafts |
//! | `GET`  | `/drafts/{id}` | |
//! | `PUT`  | `/drafts/{id}` | Body: `{"lock_version":n,"content":{…}}`; 409 when stale |
//! | `POST` | `/drafts/{id}/submit` | |
//! | `POST` | `/drafts/{id}/withdraw` | |
//! | `POST` | `/drafts/{id}/approve` | Moderator; body `{"note":"…"}` |
//! | `POST` | `/drafts/{id}/reject` | Moderator |
//! | `GET`  | `/moderation?status&kind&limit&offset` | Moderator |

use arxiu_core::{
  draft::{
    DraftContent, DraftStatus, DraftVersion, EntityId, EntityKind, ModeratedEntity, VersionId,
  },
  store::Store,
};
use arxiu_engine::drafts::DraftPage;
use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{AppState, auth::CurrentUser, error::ApiError};

// ─── Entities ────────────────────────────────────────────────────────────────

/// `POST /entities`
pub async fn create_entity<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Json(content): Json<DraftContent>,
) -> Result<impl IntoResponse, ApiError> {
  let (entity, draft) = state.engine.create_entity(&user, content).await?;
  Ok((StatusCode::CREATED, Json(json!({ "entity": entity, "draft": draft }))))
}

#[derive(Debug, Serialize)]
pub struct EntityView {
  pub entity:    ModeratedEntity,
  pub published: Option<DraftVersion>,
}

/// `GET /entities/{id}`
pub async fn entity<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(_user): CurrentUser,
  Path(id): Path<EntityId>,
) -> Result<Json<EntityView>, ApiError> {
  let entity = state.engine.entity(id).await?;
  let published = state.engine.published(id).await?;
  Ok(Json(EntityView { entity, published }))
}

/// `GET /entities/{id}/versions`
pub async fn versions<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<EntityId>,
) -> Result<Json<Vec<DraftVersion>>, ApiError> {
  Ok(Json(state.engine.versions(&user, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct StartParams {
  #[serde(default)]
  pub new: bool,
}

/// `POST /entities/{id}/drafts`
pub async fn start_draft<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<EntityId>,
  Query(params): Query<StartParams>,
) -> Result<impl IntoResponse, ApiError> {
  let draft = state.engine.start_draft(&user, id, params.new).await?;
  Ok((StatusCode::CREATED, Json(draft)))
}

#[derive(Debug, Deserialize)]
pub struct RollbackBody {
  pub version_id: VersionId,
}

/// `POST /entities/{id}/rollback`
pub async fn rollback<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<EntityId>,
  Json(body): Json<RollbackBody>,
) -> Result<Json<ModeratedEntity>, ApiError> {
  Ok(Json(state.engine.rollback(&user, id, body.version_id).await?))
}

// ─── Drafts ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MineParams {
  pub status: Option<DraftStatus>,
}

/// `GET /drafts`
pub async fn mine<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Query(params): Query<MineParams>,
) -> Result<Json<Vec<DraftVersion>>, ApiError> {
  Ok(Json(state.engine.my_drafts(&user, params.status).await?))
}

/// `GET /drafts/{id}`
pub async fn get_one<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<VersionId>,
) -> Result<Json<DraftVersion>, ApiError> {
  Ok(Json(state.engine.draft(&user, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct SaveBody {
  pub lock_version: i64,
  pub content:      DraftContent,
}

/// `PUT /drafts/{id}`
pub async fn save<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<VersionId>,
  Json(body): Json<SaveBody>,
) -> Result<Json<DraftVersion>, ApiError> {
  Ok(Json(state.engine.save_draft(&user, id, body.lock_version, body.content).await?))
}

/// `POST /drafts/{id}/submit`
pub async fn submit<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<VersionId>,
) -> Result<Json<DraftVersion>, ApiError> {
  Ok(Json(state.engine.submit_draft(&user, id).await?))
}

/// `POST /drafts/{id}/withdraw`
pub async fn withdraw<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<VersionId>,
) -> Result<Json<DraftVersion>, ApiError> {
  Ok(Json(state.engine.withdraw_draft(&user, id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct NoteBody {
  pub note: Option<String>,
}

/// `POST /drafts/{id}/approve`
pub async fn approve<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<VersionId>,
  body: Option<Json<NoteBody>>,
) -> Result<Json<DraftVersion>, ApiError> {
  let body = body.map(|Json(b)| b).unwrap_or_default();
  Ok(Json(state.engine.approve_draft(&user, id, body.note.as_deref()).await?))
}

/// `POST /drafts/{id}/reject`
pub async fn reject<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<VersionId>,
  body: Option<Json<NoteBody>>,
) -> Result<Json<DraftVersion>, ApiError> {
  let body = body.map(|Json(b)| b).unwrap_or_default();
  Ok(Json(state.engine.reject_draft(&user, id, body.note.as_deref()).await?))
}

#[derive(Debug, Deserialize)]
pub struct QueueParams {
  pub status: Option<DraftStatus>,
  pub kind:   Option<EntityKind>,
  pub limit:  Option<usize>,
  pub offset: Option<usize>,
}

/// `GET /moderation`
pub async fn queue<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Query(params): Query<QueueParams>,
) -> Result<Json<DraftPage>, ApiError> {
  let page = state
    .engine
    .moderation_queue(&user, params.status, params.kind, params.limit, params.offset)
    .await?;
  Ok(Json(page))
}

//! Collaboration groups.
//!
//! | Method   | Path | Min role |
//! |----------|------|----------|
//! | `POST`   | `/groups` | any user |
//! | `GET`    | `/groups/{id}` | viewer |
//! | `POST`   | `/groups/{id}/invites` | admin |
//! | `POST`   | `/groups/{id}/invitation` | invitee; body `{"accept":bool}` |
//! | `GET`    | `/groups/{id}/members` | viewer |
//! | `PATCH`  | `/groups/{id}/members/{member_id}` | admin |
//! | `DELETE` | `/groups/{id}/members/{member_id}` | admin |
//! | `GET`    | `/groups/{id}/trees` | viewer |
//! | `POST`   | `/groups/{id}/trees` | member, tree owner |
//! | `DELETE` | `/groups/{id}/trees/{tree_id}` | admin or tree owner |
//! | `GET`    | `/groups/{id}/conflicts?status` | viewer |
//! | `POST`   | `/groups/{id}/conflicts/rebuild` | admin |
//! | `POST`   | `/groups/{id}/conflicts/{conflict_id}/resolve` | admin |
//! | `GET`    | `/groups/{id}/changes` | viewer |

use arxiu_core::{
  group::{
    ConflictId, ConflictStatus, GroupChange, GroupConflict, GroupId, GroupMember, GroupRole,
    GroupTree, MemberId,
  },
  store::Store,
  tree::TreeId,
};
use arxiu_engine::groups::GroupDetail;
use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{AppState, auth::CurrentUser, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct CreateBody {
  pub name:        String,
  #[serde(default)]
  pub description: String,
}

/// `POST /groups`
pub async fn create<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError> {
  let (group, _) = state.engine.create_group(user.id, &body.name, &body.description).await?;
  Ok((StatusCode::CREATED, Json(group)))
}

/// `GET /groups/{id}`
pub async fn get_one<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<GroupId>,
) -> Result<Json<GroupDetail>, ApiError> {
  Ok(Json(state.engine.group(user.id, id).await?))
}

// ─── Members ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct InviteBody {
  pub email: String,
  #[serde(default = "default_role")]
  pub role:  GroupRole,
}

fn default_role() -> GroupRole { GroupRole::Member }

/// `POST /groups/{id}/invites`
pub async fn invite<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<GroupId>,
  Json(body): Json<InviteBody>,
) -> Result<impl IntoResponse, ApiError> {
  let member = state.engine.invite(user.id, id, &body.email, body.role).await?;
  Ok((StatusCode::CREATED, Json(member)))
}

#[derive(Debug, Deserialize)]
pub struct RespondBody {
  pub accept: bool,
}

/// `POST /groups/{id}/invitation`
pub async fn respond<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<GroupId>,
  Json(body): Json<RespondBody>,
) -> Result<Json<GroupMember>, ApiError> {
  Ok(Json(state.engine.respond_invite(user.id, id, body.accept).await?))
}

/// `GET /groups/{id}/members`
pub async fn members<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<GroupId>,
) -> Result<Json<Vec<GroupMember>>, ApiError> {
  Ok(Json(state.engine.members(user.id, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct RoleBody {
  pub role: GroupRole,
}

/// `PATCH /groups/{id}/members/{member_id}`
pub async fn change_role<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path((id, member_id)): Path<(GroupId, MemberId)>,
  Json(body): Json<RoleBody>,
) -> Result<Json<GroupMember>, ApiError> {
  Ok(Json(state.engine.change_role(user.id, id, member_id, body.role).await?))
}

/// `DELETE /groups/{id}/members/{member_id}`
pub async fn remove_member<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path((id, member_id)): Path<(GroupId, MemberId)>,
) -> Result<StatusCode, ApiError> {
  state.engine.remove_member(user.id, id, member_id).await?;
  Ok(StatusCode::NO_CONTENT)
}

// ─── Trees ───────────────────────────────────────────────────────────────────

/// `GET /groups/{id}/trees`
pub async fn trees<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<GroupId>,
) -> Result<Json<Vec<GroupTree>>, ApiError> {
  Ok(Json(state.engine.linked_trees(user.id, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct LinkBody {
  pub tree_id: TreeId,
}

/// `POST /groups/{id}/trees`
pub async fn link_tree<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<GroupId>,
  Json(body): Json<LinkBody>,
) -> Result<Json<GroupTree>, ApiError> {
  Ok(Json(state.engine.link_tree(user.id, id, body.tree_id).await?))
}

/// `DELETE /groups/{id}/trees/{tree_id}`
pub async fn unlink_tree<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path((id, tree_id)): Path<(GroupId, TreeId)>,
) -> Result<StatusCode, ApiError> {
  state.engine.unlink_tree(user.id, id, tree_id).await?;
  Ok(StatusCode::NO_CONTENT)
}

// ─── Conflicts and changes ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ConflictParams {
  pub status: Option<ConflictStatus>,
}

/// `GET /groups/{id}/conflicts`
pub async fn conflicts<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<GroupId>,
  Query(params): Query<ConflictParams>,
) -> Result<Json<Vec<GroupConflict>>, ApiError> {
  Ok(Json(state.engine.conflicts(user.id, id, params.status).await?))
}

/// `POST /groups/{id}/conflicts/rebuild`
pub async fn rebuild_conflicts<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<GroupId>,
) -> Result<Json<Value>, ApiError> {
  let created = state.engine.rebuild_conflicts(user.id, id).await?;
  Ok(Json(json!({ "created": created })))
}

/// `POST /groups/{id}/conflicts/{conflict_id}/resolve`
pub async fn resolve_conflict<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path((id, conflict_id)): Path<(GroupId, ConflictId)>,
) -> Result<Json<GroupConflict>, ApiError> {
  Ok(Json(state.engine.resolve_conflict(user.id, id, conflict_id).await?))
}

/// `GET /groups/{id}/changes`
pub async fn changes<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<GroupId>,
) -> Result<Json<Vec<GroupChange>>, ApiError> {
  Ok(Json(state.engine.changes(user.id, id).await?))
}

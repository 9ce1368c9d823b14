//! External-server connections.
//!
//! | Method  | Path | Notes |
//! |---------|------|-------|
//! | `GET`   | `/trees/{id}/connection` | `null` when the tree has none |
//! | `POST`  | `/trees/{id}/connection` | Body: `{"base_url","username"?,"token"}` |
//! | `PUT`   | `/connections/{id}` | Replace credentials |
//! | `PATCH` | `/connections/{id}` | Body: `{"enabled":bool}` |
//! | `POST`  | `/connections/{id}/test` | Pings the server |
//! | `POST`  | `/connections/{id}/sync` | Queues a sync job |
//! | `GET`   | `/connections/{id}/log` | Latest log lines |

use arxiu_core::{
  connection::{ConnectionId, ExternalConnection, SyncLogEntry},
  import::ImportJob,
  store::Store,
  tree::TreeId,
};
use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;

use crate::{AppState, auth::CurrentUser, error::ApiError};

const DEFAULT_LOG_LINES: usize = 50;

#[derive(Debug, Deserialize)]
pub struct CredentialsBody {
  pub base_url: String,
  pub username: Option<String>,
  pub token:    String,
}

/// `GET /trees/{id}/connection`
pub async fn for_tree<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(tree_id): Path<TreeId>,
) -> Result<Json<Option<ExternalConnection>>, ApiError> {
  Ok(Json(state.engine.connection_for_tree(user.id, tree_id).await?))
}

/// `POST /trees/{id}/connection`
pub async fn create<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(tree_id): Path<TreeId>,
  Json(body): Json<CredentialsBody>,
) -> Result<impl IntoResponse, ApiError> {
  let conn = state
    .engine
    .create_connection(user.id, tree_id, &body.base_url, body.username.as_deref(), &body.token)
    .await?;
  Ok((StatusCode::CREATED, Json(conn)))
}

/// `PUT /connections/{id}`
pub async fn update_credentials<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<ConnectionId>,
  Json(body): Json<CredentialsBody>,
) -> Result<Json<ExternalConnection>, ApiError> {
  let conn = state
    .engine
    .update_credentials(user.id, id, &body.base_url, body.username.as_deref(), &body.token)
    .await?;
  Ok(Json(conn))
}

#[derive(Debug, Deserialize)]
pub struct EnabledBody {
  pub enabled: bool,
}

/// `PATCH /connections/{id}`
pub async fn set_enabled<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<ConnectionId>,
  Json(body): Json<EnabledBody>,
) -> Result<Json<ExternalConnection>, ApiError> {
  Ok(Json(state.engine.set_connection_enabled(user.id, id, body.enabled).await?))
}

/// `POST /connections/{id}/test`
pub async fn test<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<ConnectionId>,
) -> Result<StatusCode, ApiError> {
  let cancel = state.shutdown.child_token();
  state.engine.test_connection(user.id, id, &cancel).await?;
  Ok(StatusCode::NO_CONTENT)
}

/// `POST /connections/{id}/sync`
pub async fn sync<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<ConnectionId>,
) -> Result<(StatusCode, Json<ImportJob>), ApiError> {
  let job = state.engine.enqueue_sync(user.id, id).await?;
  Ok((StatusCode::ACCEPTED, Json(job)))
}

#[derive(Debug, Deserialize)]
pub struct LogParams {
  pub limit: Option<usize>,
}

/// `GET /connections/{id}/log`
pub async fn log<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<ConnectionId>,
  Query(params): Query<LogParams>,
) -> Result<Json<Vec<SyncLogEntry>>, ApiError> {
  let limit = params.limit.unwrap_or(DEFAULT_LOG_LINES);
  Ok(Json(state.engine.sync_log(user.id, id, limit).await?))
}

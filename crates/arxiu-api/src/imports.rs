//! GEDCOM uploads and the job queue.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/trees/{id}/imports?filename=…&mode=replace` | Raw GEDCOM body |
//! | `GET`  | `/jobs` | The caller's jobs |
//! | `GET`  | `/jobs/{id}` | |
//!
//! An upload only stores the file and queues a job; the worker does the
//! parsing. A duplicate upload answers `200` with `"duplicate": true`.

use arxiu_core::{
  import::{ImportJob, ImportMode, JobId},
  store::Store,
  tree::TreeId,
};
use arxiu_engine::imports::UploadReceipt;
use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
};
use bytes::Bytes;
use serde::Deserialize;

use crate::{AppState, auth::CurrentUser, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct UploadParams {
  pub filename: Option<String>,
  pub mode:     Option<ImportMode>,
}

/// `POST /trees/{id}/imports`
pub async fn upload<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(tree_id): Path<TreeId>,
  Query(params): Query<UploadParams>,
  body: Bytes,
) -> Result<(StatusCode, Json<UploadReceipt>), ApiError> {
  let filename = params.filename.as_deref().unwrap_or("arbre.ged");
  let mode = params.mode.unwrap_or(ImportMode::Replace);
  let receipt = state.engine.upload_gedcom(user.id, tree_id, filename, &body, mode).await?;
  let status = if receipt.duplicate { StatusCode::OK } else { StatusCode::ACCEPTED };
  Ok((status, Json(receipt)))
}

/// `GET /jobs`
pub async fn jobs<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<ImportJob>>, ApiError> {
  Ok(Json(state.engine.jobs(user.id).await?))
}

/// `GET /jobs/{id}`
pub async fn job<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<JobId>,
) -> Result<Json<ImportJob>, ApiError> {
  Ok(Json(state.engine.job(user.id, id).await?))
}

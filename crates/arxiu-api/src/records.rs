//! Archival record search and indexing.

use arxiu_core::{
  search::{ArchivalRecord, RecordId, SearchDoc, SearchPage},
  store::Store,
};
use arxiu_engine::search::RecordQuery;
use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
};

use crate::{AppState, auth::CurrentUser, error::ApiError};

/// `GET /records/search?q=…&year_from=…&municipality_id=…`
pub async fn search<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(_user): CurrentUser,
  Query(query): Query<RecordQuery>,
) -> Result<Json<SearchPage>, ApiError> {
  Ok(Json(state.engine.search_records(&query).await?))
}

/// `PUT /records/{id}`; the path id wins over any id in the body.
pub async fn put<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<RecordId>,
  Json(record): Json<ArchivalRecord>,
) -> Result<Json<SearchDoc>, ApiError> {
  let record = ArchivalRecord { id, ..record };
  Ok(Json(state.engine.index_record(&user, record).await?))
}

/// `DELETE /records/{id}`
pub async fn delete<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<RecordId>,
) -> Result<StatusCode, ApiError> {
  state.engine.unindex_record(&user, id).await?;
  Ok(StatusCode::NO_CONTENT)
}

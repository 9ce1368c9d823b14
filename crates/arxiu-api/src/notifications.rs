//! Notification inbox and delivery preferences.

use arxiu_core::{
  notification::{Notification, NotificationId, NotificationPrefs},
  store::Store,
};
use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{AppState, auth::CurrentUser, error::ApiError};

const DEFAULT_PAGE: usize = 20;

#[derive(Debug, Deserialize)]
pub struct ListParams {
  #[serde(default)]
  pub unread: bool,
  pub limit:  Option<usize>,
  pub offset: Option<usize>,
}

/// `GET /notifications?unread=true&limit&offset`
pub async fn list<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Notification>>, ApiError> {
  let items = state
    .engine
    .notifications(
      user.id,
      params.unread,
      params.limit.unwrap_or(DEFAULT_PAGE),
      params.offset.unwrap_or_default(),
    )
    .await?;
  Ok(Json(items))
}

/// `GET /notifications/unread`
pub async fn unread<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
) -> Result<Json<Value>, ApiError> {
  let count = state.engine.unread_count(user.id).await?;
  Ok(Json(json!({ "unread": count })))
}

/// `POST /notifications/{id}/read`
pub async fn mark_read<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<NotificationId>,
) -> Result<StatusCode, ApiError> {
  state.engine.mark_read(user.id, id).await?;
  Ok(StatusCode::NO_CONTENT)
}

/// `POST /notifications/read-all`
pub async fn mark_all_read<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
) -> Result<Json<Value>, ApiError> {
  let marked = state.engine.mark_all_read(user.id).await?;
  Ok(Json(json!({ "marked": marked })))
}

/// `GET /notifications/preferences`
pub async fn preferences<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
) -> Result<Json<NotificationPrefs>, ApiError> {
  Ok(Json(state.engine.preferences(user.id).await?))
}

/// `PUT /notifications/preferences`
pub async fn set_preferences<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Json(prefs): Json<NotificationPrefs>,
) -> Result<Json<NotificationPrefs>, ApiError> {
  state.engine.set_preferences(user.id, prefs).await?;
  Ok(Json(state.engine.preferences(user.id).await?))
}

//! Maintenance banner. Reading needs no credentials.

use arxiu_core::{banner::MaintenanceBanner, store::Store};
use axum::{Json, extract::State, http::StatusCode};

use crate::{AppState, auth::CurrentUser, error::ApiError};

/// `GET /banner`; `null` when nothing is active.
pub async fn get<S: Store + 'static>(
  State(state): State<AppState<S>>,
) -> Result<Json<Option<MaintenanceBanner>>, ApiError> {
  Ok(Json(state.engine.maintenance_banner().await?))
}

/// `PUT /admin/banner`; a `null` body clears the banner.
pub async fn set<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Json(banner): Json<Option<MaintenanceBanner>>,
) -> Result<StatusCode, ApiError> {
  state.engine.set_maintenance_banner(&user, banner).await?;
  Ok(StatusCode::NO_CONTENT)
}

//! Match review.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/matches?tree_id&status&limit&offset` | `{"items":[…],"total":n}` |
//! | `POST` | `/matches/decisions` | Body: `{"ids":[…],"status":"accepted"}` |
//! | `POST` | `/matches/{id}/decision` | Body: `{"status":"ignored"}` |
//! | `GET`  | `/matches/{id}/decisions` | Audit trail |

use arxiu_core::{
  matching::{Match, MatchDecision, MatchId, MatchQuery, MatchStatus},
  store::Store,
  tree::TreeId,
};
use axum::{
  Json,
  extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{AppState, auth::CurrentUser, error::ApiError};

const DEFAULT_PAGE: usize = 50;

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub tree_id: Option<TreeId>,
  pub status:  Option<MatchStatus>,
  pub limit:   Option<usize>,
  pub offset:  Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct MatchPage {
  pub items: Vec<Match>,
  pub total: u64,
}

/// `GET /matches`
pub async fn list<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Query(params): Query<ListParams>,
) -> Result<Json<MatchPage>, ApiError> {
  let query = MatchQuery {
    owner_id: user.id,
    tree_id:  params.tree_id,
    status:   params.status,
    limit:    Some(params.limit.unwrap_or(DEFAULT_PAGE)),
    offset:   params.offset,
  };
  let total = state.engine.count_matches(user.id, query.clone()).await?;
  let items = state.engine.matches(user.id, query).await?;
  Ok(Json(MatchPage { items, total }))
}

#[derive(Debug, Deserialize)]
pub struct DecisionBody {
  pub status: MatchStatus,
}

/// `POST /matches/{id}/decision`
pub async fn decide<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<MatchId>,
  Json(body): Json<DecisionBody>,
) -> Result<Json<Match>, ApiError> {
  Ok(Json(state.engine.decide_match(user.id, id, body.status).await?))
}

#[derive(Debug, Deserialize)]
pub struct BulkBody {
  pub ids:    Vec<MatchId>,
  pub status: MatchStatus,
}

/// `POST /matches/decisions`
pub async fn decide_many<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Json(body): Json<BulkBody>,
) -> Result<Json<Value>, ApiError> {
  let changed = state.engine.decide_matches(user.id, &body.ids, body.status).await?;
  Ok(Json(json!({ "changed": changed })))
}

/// `GET /matches/{id}/decisions`
pub async fn decisions<S: Store + 'static>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<MatchId>,
) -> Result<Json<Vec<MatchDecision>>, ApiError> {
  Ok(Json(state.engine.match_decisions(user.id, id).await?))
}

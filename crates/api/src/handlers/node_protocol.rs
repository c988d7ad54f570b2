//! Handlers for the node protocol: heartbeat, poll, log, complete.
//!
//! Every handler takes [`AuthNode`], so a missing or unknown key is rejected
//! with 401 before any registry or queue state is touched.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use forge_core::types::DbId;

use crate::engine::dispatch::{AppendLogRequest, PollResponse};
use crate::engine::outcome::CompleteRunRequest;
use crate::error::AppResult;
use crate::middleware::node_auth::AuthNode;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// POST /node/heartbeat
// ---------------------------------------------------------------------------

pub async fn heartbeat(
    AuthNode(node): AuthNode,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let ack = state.engine.heartbeat(&node).await?;
    Ok(Json(DataResponse { data: ack }))
}

// ---------------------------------------------------------------------------
// POST /node/poll
// ---------------------------------------------------------------------------

/// Claim at most one request. "Nothing for you" is a 200 with
/// `available: false`, never an error status.
pub async fn poll(
    AuthNode(node): AuthNode,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let outcome = state.engine.poll(&node).await?;
    Ok(Json(DataResponse {
        data: PollResponse::from(outcome),
    }))
}

// ---------------------------------------------------------------------------
// POST /node/runs/{id}/logs
// ---------------------------------------------------------------------------

pub async fn append_log(
    AuthNode(node): AuthNode,
    State(state): State<AppState>,
    Path(run_id): Path<DbId>,
    Json(input): Json<AppendLogRequest>,
) -> AppResult<impl IntoResponse> {
    let entry = state.engine.append_log(&node, run_id, input).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: entry })))
}

// ---------------------------------------------------------------------------
// POST /node/runs/{id}/complete
// ---------------------------------------------------------------------------

/// Report a terminal outcome. Repeating it is safe: the stored run comes
/// back with `applied: false`.
pub async fn complete_run(
    AuthNode(node): AuthNode,
    State(state): State<AppState>,
    Path(run_id): Path<DbId>,
    Json(input): Json<CompleteRunRequest>,
) -> AppResult<impl IntoResponse> {
    let completion = state.engine.complete_run(&node, run_id, input).await?;
    Ok(Json(DataResponse { data: completion }))
}

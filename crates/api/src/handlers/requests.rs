//! Handlers for the execution request queue (admin only).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use forge_core::types::DbId;
use forge_db::models::execution_request::{ExecutionRequestFilter, SubmitExecutionRequest};
use serde::Deserialize;

use crate::error::AppResult;
use crate::middleware::rbac::RequireAdmin;
use crate::response::DataResponse;
use crate::state::AppState;

/// `GET /admin/requests` query parameters.
#[derive(Debug, Deserialize)]
pub struct ListRequestsParams {
    #[serde(default)]
    pub unclaimed_only: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// ---------------------------------------------------------------------------
// POST /admin/requests
// ---------------------------------------------------------------------------

pub async fn submit_request(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    Json(input): Json<SubmitExecutionRequest>,
) -> AppResult<impl IntoResponse> {
    let request = state
        .engine
        .submit_request(input, Some(admin.user_id))
        .await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: request })))
}

// ---------------------------------------------------------------------------
// GET /admin/requests
// ---------------------------------------------------------------------------

pub async fn list_requests(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
    Query(params): Query<ListRequestsParams>,
) -> AppResult<impl IntoResponse> {
    let filter = ExecutionRequestFilter {
        unclaimed_only: params.unclaimed_only,
        limit: params.limit.unwrap_or_default(),
        offset: params.offset.unwrap_or_default(),
    };
    let requests = state.engine.list_requests(&filter).await?;
    Ok(Json(DataResponse { data: requests }))
}

// ---------------------------------------------------------------------------
// GET /admin/requests/{id}
// ---------------------------------------------------------------------------

/// A request plus its run, if one was ever started.
pub async fn get_request(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let detail = state.engine.get_request(id).await?;
    Ok(Json(DataResponse { data: detail }))
}

// ---------------------------------------------------------------------------
// POST /admin/requests/{id}/requeue
// ---------------------------------------------------------------------------

/// Queue a new copy of a request whose run finished. The original stays
/// closed.
pub async fn requeue_request(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let request = state
        .engine
        .requeue_request(id, Some(admin.user_id))
        .await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: request })))
}

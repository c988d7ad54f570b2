//! Handlers for run inspection and operator cancellation (admin only).

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use forge_core::error::CoreError;
use forge_core::types::DbId;
use forge_db::models::run::RunFilter;
use forge_db::models::status::RunStatus;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::middleware::rbac::RequireAdmin;
use crate::response::DataResponse;
use crate::state::AppState;

/// `GET /admin/runs` query parameters.
#[derive(Debug, Deserialize)]
pub struct ListRunsParams {
    /// Status name, e.g. `running`.
    pub status: Option<String>,
    pub node_id: Option<DbId>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Body of `POST /admin/runs/{id}/cancel`.
#[derive(Debug, Deserialize)]
pub struct CancelRunRequest {
    pub summary: Option<String>,
}

// ---------------------------------------------------------------------------
// GET /admin/runs
// ---------------------------------------------------------------------------

pub async fn list_runs(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
    Query(params): Query<ListRunsParams>,
) -> AppResult<impl IntoResponse> {
    let status = params
        .status
        .as_deref()
        .map(|name| {
            RunStatus::from_name(&name.trim().to_ascii_lowercase()).ok_or_else(|| {
                AppError::Core(CoreError::Validation(format!("Unknown run status '{name}'")))
            })
        })
        .transpose()?;

    let filter = RunFilter {
        status,
        node_id: params.node_id,
        limit: params.limit.unwrap_or_default(),
        offset: params.offset.unwrap_or_default(),
    };
    let runs = state.engine.list_runs(&filter).await?;
    Ok(Json(DataResponse { data: runs }))
}

// ---------------------------------------------------------------------------
// GET /admin/runs/{id}
// ---------------------------------------------------------------------------

pub async fn get_run(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let detail = state.engine.get_run(id).await?;
    Ok(Json(DataResponse { data: detail }))
}

// ---------------------------------------------------------------------------
// GET /admin/runs/{id}/logs
// ---------------------------------------------------------------------------

pub async fn list_logs(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let logs = state.engine.list_logs(id).await?;
    Ok(Json(DataResponse { data: logs }))
}

// ---------------------------------------------------------------------------
// POST /admin/runs/{id}/cancel
// ---------------------------------------------------------------------------

/// Cancel a pending or running run. The `{summary}` body is optional.
/// Canceling a finished run returns it unchanged with `applied: false`.
pub async fn cancel_run(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let summary = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<CancelRunRequest>(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid cancel body: {e}")))?
            .summary
    };
    let completion = state.engine.cancel_run(id, summary).await?;

    tracing::info!(
        run_id = id,
        admin_id = admin.user_id,
        applied = completion.applied,
        "Run cancel requested by admin",
    );

    Ok(Json(DataResponse { data: completion }))
}

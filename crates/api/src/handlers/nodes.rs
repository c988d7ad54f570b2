//! Handlers for node registry management (admin only).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use forge_core::types::DbId;

use crate::engine::dispatch::RegisterNode;
use crate::error::AppResult;
use crate::middleware::rbac::RequireAdmin;
use crate::query::{ForceParams, IncludeDeregisteredParams};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// POST /admin/nodes
// ---------------------------------------------------------------------------

/// Register a node. The response carries the plaintext API key; it is not
/// retrievable afterwards.
pub async fn register_node(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    Json(input): Json<RegisterNode>,
) -> AppResult<impl IntoResponse> {
    let registered = state.engine.register_node(input).await?;

    tracing::info!(
        node_id = registered.node.id,
        admin_id = admin.user_id,
        "Node registered by admin",
    );

    Ok((StatusCode::CREATED, Json(DataResponse { data: registered })))
}

// ---------------------------------------------------------------------------
// GET /admin/nodes
// ---------------------------------------------------------------------------

pub async fn list_nodes(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
    Query(params): Query<IncludeDeregisteredParams>,
) -> AppResult<impl IntoResponse> {
    let nodes = state.engine.list_nodes(params.include_deregistered).await?;
    Ok(Json(DataResponse { data: nodes }))
}

// ---------------------------------------------------------------------------
// GET /admin/nodes/stats
// ---------------------------------------------------------------------------

pub async fn fleet_stats(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let stats = state.engine.fleet_stats().await?;
    Ok(Json(DataResponse { data: stats }))
}

// ---------------------------------------------------------------------------
// GET /admin/nodes/{id}
// ---------------------------------------------------------------------------

pub async fn get_node(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let node = state.engine.get_node(id).await?;
    Ok(Json(DataResponse { data: node }))
}

// ---------------------------------------------------------------------------
// DELETE /admin/nodes/{id}?force=true
// ---------------------------------------------------------------------------

/// Soft-deregister a node. Refused with 409 while it holds a run unless
/// `force=true`, which cancels the run first.
pub async fn deregister_node(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Query(params): Query<ForceParams>,
) -> AppResult<impl IntoResponse> {
    let result = state.engine.deregister_node(id, params.force).await?;

    tracing::info!(
        node_id = id,
        admin_id = admin.user_id,
        force = params.force,
        "Node deregistered by admin",
    );

    Ok(Json(DataResponse { data: result }))
}

//! Route definitions for `/admin/runs`.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::runs;
use crate::state::AppState;

/// Routes mounted at `/admin/runs`.
///
/// ```text
/// GET    /               -> list_runs
/// GET    /{id}           -> get_run
/// GET    /{id}/logs      -> list_logs
/// POST   /{id}/cancel    -> cancel_run
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(runs::list_runs))
        .route("/{id}", get(runs::get_run))
        .route("/{id}/logs", get(runs::list_logs))
        .route("/{id}/cancel", post(runs::cancel_run))
}

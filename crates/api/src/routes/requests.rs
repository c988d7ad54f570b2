//! Route definitions for `/admin/requests`.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::requests;
use crate::state::AppState;

/// Routes mounted at `/admin/requests`.
///
/// ```text
/// GET    /                -> list_requests
/// POST   /                -> submit_request
/// GET    /{id}            -> get_request
/// POST   /{id}/requeue    -> requeue_request
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(requests::list_requests).post(requests::submit_request))
        .route("/{id}", get(requests::get_request))
        .route("/{id}/requeue", post(requests::requeue_request))
}

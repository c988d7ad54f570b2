//! Route definitions for the node protocol.

use axum::routing::post;
use axum::Router;

use crate::handlers::node_protocol;
use crate::state::AppState;

/// Routes mounted at `/node`.
///
/// ```text
/// POST   /heartbeat              -> heartbeat
/// POST   /poll                   -> poll
/// POST   /runs/{id}/logs         -> append_log
/// POST   /runs/{id}/complete     -> complete_run
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/heartbeat", post(node_protocol::heartbeat))
        .route("/poll", post(node_protocol::poll))
        .route("/runs/{id}/logs", post(node_protocol::append_log))
        .route("/runs/{id}/complete", post(node_protocol::complete_run))
}

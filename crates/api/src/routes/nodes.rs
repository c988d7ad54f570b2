//! Route definitions for `/admin/nodes`.

use axum::routing::get;
use axum::Router;

use crate::handlers::nodes;
use crate::state::AppState;

/// Routes mounted at `/admin/nodes`.
///
/// ```text
/// GET    /            -> list_nodes
/// POST   /            -> register_node
/// GET    /stats       -> fleet_stats
/// GET    /{id}        -> get_node
/// DELETE /{id}        -> deregister_node
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(nodes::list_nodes).post(nodes::register_node))
        .route("/stats", get(nodes::fleet_stats))
        .route("/{id}", get(nodes::get_node).delete(nodes::deregister_node))
}

pub mod health;
pub mod node_protocol;
pub mod nodes;
pub mod requests;
pub mod runs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /node/heartbeat                         stamp liveness (POST, node key)
/// /node/poll                              claim work (POST, node key)
/// /node/runs/{id}/logs                    append progress (POST, node key)
/// /node/runs/{id}/complete                report outcome (POST, node key)
///
/// /admin/nodes                            list, register (admin only)
/// /admin/nodes/stats                      fleet counts
/// /admin/nodes/{id}                       get, deregister (?force=true)
///
/// /admin/requests                         list, submit
/// /admin/requests/{id}                    get (with run)
/// /admin/requests/{id}/requeue            requeue finished request (POST)
///
/// /admin/runs                             list (?status=&node_id=)
/// /admin/runs/{id}                        get (with request)
/// /admin/runs/{id}/logs                   log trail
/// /admin/runs/{id}/cancel                 operator cancel (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Node protocol, authenticated by node API key.
        .nest("/node", node_protocol::router())
        // Operator endpoints, authenticated by admin JWT.
        .nest("/admin/nodes", nodes::router())
        .nest("/admin/requests", requests::router())
        .nest("/admin/runs", runs::router())
}

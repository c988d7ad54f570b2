use std::sync::Arc;

use crate::config::ServerConfig;
use crate::engine::DispatchEngine;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: everything sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Dispatch engine wrapping the configured store backend.
    pub engine: Arc<DispatchEngine>,
    /// Server configuration (JWT settings are read by the auth extractors).
    pub config: Arc<ServerConfig>,
}

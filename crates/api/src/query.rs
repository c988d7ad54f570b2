//! Shared query parameter types for API handlers.

use serde::Deserialize;

/// `?include_deregistered=true` for node listings.
#[derive(Debug, Deserialize)]
pub struct IncludeDeregisteredParams {
    #[serde(default)]
    pub include_deregistered: bool,
}

/// `?force=true` for destructive operations that would otherwise refuse.
#[derive(Debug, Deserialize)]
pub struct ForceParams {
    #[serde(default)]
    pub force: bool,
}

//! Node registry entity models and DTOs.

use forge_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

use crate::models::run::Run;
use crate::models::status::StatusId;

// ---------------------------------------------------------------------------
// Entity structs (match database tables)
// ---------------------------------------------------------------------------

/// A node row from the `nodes` table.
///
/// `api_key_hash` is never serialized; only the display suffix leaves the
/// server.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Node {
    pub id: DbId,
    pub name: String,
    pub node_type: String,
    pub status_id: StatusId,
    pub capabilities: serde_json::Value,
    #[serde(skip_serializing)]
    pub api_key_hash: String,
    pub api_key_suffix: String,
    pub last_heartbeat_at: Option<Timestamp>,
    pub current_run_id: Option<DbId>,
    pub deregistered_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Node {
    /// Whether the node has been removed from the registry.
    pub fn is_deregistered(&self) -> bool {
        self.deregistered_at.is_some()
    }
}

// ---------------------------------------------------------------------------
// Create DTOs
// ---------------------------------------------------------------------------

/// Insert payload for a new node. Built by the engine after key generation;
/// never deserialized from a request body.
#[derive(Debug, Clone)]
pub struct CreateNode {
    pub name: String,
    pub node_type: String,
    pub capabilities: serde_json::Value,
    pub api_key_hash: String,
    pub api_key_suffix: String,
}

// ---------------------------------------------------------------------------
// Operation outcomes
// ---------------------------------------------------------------------------

/// Result of an attempt to create a node.
#[derive(Debug, Clone)]
pub enum NodeCreation {
    Created(Node),
    /// An active node already uses that name.
    NameTaken,
}

/// Result of an attempt to deregister a node.
#[derive(Debug, Clone)]
pub enum Deregistration {
    /// No active node with that id.
    NotFound,
    /// The node holds an active run and `force` was not requested.
    HoldsRun { run_id: DbId },
    /// The node was soft-deregistered. `canceled_run` is the run that was
    /// canceled to detach it, if any.
    Deregistered {
        node: Node,
        canceled_run: Option<Run>,
    },
}

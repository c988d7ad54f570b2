//! Run log (append-only progress trail) models.

use forge_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

use crate::models::status::RunStatus;

/// A row from the `run_logs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RunLogEntry {
    pub id: DbId,
    pub run_id: DbId,
    pub level: String,
    pub message: String,
    pub logged_at: Timestamp,
}

/// Result of appending a log line on behalf of a node.
#[derive(Debug, Clone)]
pub enum LogAppend {
    NotFound,
    NotOwner,
    /// The run already reached the given terminal status.
    RunTerminal(RunStatus),
    Appended(RunLogEntry),
}

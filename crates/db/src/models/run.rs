//! Run tracker entity models and DTOs.

use forge_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

use crate::models::status::{RunStatus, StatusId};

/// A row from the `runs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Run {
    pub id: DbId,
    pub execution_request_id: DbId,
    pub node_id: DbId,
    pub status_id: StatusId,
    pub started_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub artifact_url: Option<String>,
    pub summary: Option<String>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Run {
    /// The typed status, if the stored ID is known.
    pub fn status(&self) -> Option<RunStatus> {
        RunStatus::from_id(self.status_id)
    }

    /// Whether the run has reached DONE, FAILED, or CANCELED.
    pub fn is_terminal(&self) -> bool {
        crate::models::status::is_terminal_run_status(self.status_id)
    }
}

/// A validated terminal outcome for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Done {
        artifact_url: String,
        summary: Option<String>,
    },
    Failed {
        error_message: String,
        summary: Option<String>,
    },
    Canceled {
        summary: Option<String>,
    },
}

impl RunOutcome {
    /// The terminal status this outcome moves a run to.
    pub fn status(&self) -> RunStatus {
        match self {
            RunOutcome::Done { .. } => RunStatus::Done,
            RunOutcome::Failed { .. } => RunStatus::Failed,
            RunOutcome::Canceled { .. } => RunStatus::Canceled,
        }
    }

    pub fn artifact_url(&self) -> Option<&str> {
        match self {
            RunOutcome::Done { artifact_url, .. } => Some(artifact_url),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            RunOutcome::Failed { error_message, .. } => Some(error_message),
            _ => None,
        }
    }

    pub fn summary(&self) -> Option<&str> {
        match self {
            RunOutcome::Done { summary, .. }
            | RunOutcome::Failed { summary, .. }
            | RunOutcome::Canceled { summary } => summary.as_deref(),
        }
    }
}

/// Who is asking to move a run to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// The node that owns the run.
    Node(DbId),
    /// A privileged operator (no ownership check).
    Operator,
}

/// Result of a terminal transition attempt.
#[derive(Debug, Clone)]
pub enum RunTransition {
    NotFound,
    /// The calling node does not own the run.
    NotOwner,
    /// The transition was applied and the owning node was released.
    Applied(Run),
    /// The run was already terminal; stored fields are unchanged.
    AlreadyTerminal(Run),
}

/// Filter for listing runs.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub status: Option<RunStatus>,
    pub node_id: Option<DbId>,
    pub limit: i64,
    pub offset: i64,
}

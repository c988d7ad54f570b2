//! Execution request (task queue) entity models and DTOs.

use forge_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::run::Run;

/// A row from the `execution_requests` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ExecutionRequest {
    pub id: DbId,
    /// The originating business task (e.g. a to-do item).
    pub source_task_id: DbId,
    pub title: String,
    pub instructions: Option<String>,
    pub repository_url: String,
    pub branch_name: String,
    pub base_branch: Option<String>,
    pub priority: i32,
    /// JSON array of capability names a node must have enabled.
    pub required_capabilities: serde_json::Value,
    pub claimed_by: Option<DbId>,
    pub claimed_at: Option<Timestamp>,
    pub requeued_from_id: Option<DbId>,
    pub submitted_by: Option<DbId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ExecutionRequest {
    /// Whether the request is still waiting in the queue.
    pub fn is_claimable(&self) -> bool {
        self.claimed_by.is_none()
    }
}

/// DTO for submitting a new execution request.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitExecutionRequest {
    pub source_task_id: DbId,
    pub title: String,
    pub instructions: Option<String>,
    pub repository_url: String,
    pub branch_name: String,
    pub base_branch: Option<String>,
    pub priority: Option<i32>,
    pub required_capabilities: Option<Vec<String>>,
}

/// Filter for listing execution requests.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequestFilter {
    /// Only requests that have not been claimed yet.
    pub unclaimed_only: bool,
    pub limit: i64,
    pub offset: i64,
}

/// A request that was atomically claimed together with its new run.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimedWork {
    pub request: ExecutionRequest,
    pub run: Run,
}

/// Result of an operator asking to requeue a request.
#[derive(Debug, Clone)]
pub enum Requeue {
    NotFound,
    /// The request has no run yet, or its run has not finished.
    NotFinished,
    /// The request was already requeued once; `request_id` is the copy.
    AlreadyRequeued { request_id: DbId },
    /// A new request was created with `requeued_from_id` set.
    Requeued(ExecutionRequest),
}

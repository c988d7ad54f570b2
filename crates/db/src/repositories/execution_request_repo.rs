//! Repository for the `execution_requests` table, including the atomic claim.

use forge_core::capabilities;
use forge_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::execution_request::{
    ClaimedWork, ExecutionRequest, ExecutionRequestFilter, Requeue, SubmitExecutionRequest,
};
use crate::models::node::Node;
use crate::models::run::Run;
use crate::models::status::{NodeStatus, RunStatus};
use crate::repositories::{node_repo, run_repo};

/// Column list for `execution_requests` queries.
const COLUMNS: &str = "\
    id, source_task_id, title, instructions, repository_url, branch_name, base_branch, \
    priority, required_capabilities, claimed_by, claimed_at, requeued_from_id, submitted_by, \
    created_at, updated_at";

/// Provides submission, listing, claiming, and requeueing of execution requests.
pub struct ExecutionRequestRepo;

impl ExecutionRequestRepo {
    /// Insert a new unclaimed request.
    pub async fn submit(
        pool: &PgPool,
        input: &SubmitExecutionRequest,
        submitted_by: Option<DbId>,
    ) -> Result<ExecutionRequest, sqlx::Error> {
        let required = serde_json::json!(input.required_capabilities.clone().unwrap_or_default());
        let query = format!(
            "INSERT INTO execution_requests \
                 (source_task_id, title, instructions, repository_url, branch_name, \
                  base_branch, priority, required_capabilities, submitted_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ExecutionRequest>(&query)
            .bind(input.source_task_id)
            .bind(&input.title)
            .bind(&input.instructions)
            .bind(&input.repository_url)
            .bind(&input.branch_name)
            .bind(&input.base_branch)
            .bind(input.priority.unwrap_or(0))
            .bind(&required)
            .bind(submitted_by)
            .fetch_one(pool)
            .await
    }

    /// Find a request by its ID.
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<ExecutionRequest>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM execution_requests WHERE id = $1");
        sqlx::query_as::<_, ExecutionRequest>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List requests, newest first.
    pub async fn list(
        pool: &PgPool,
        filter: &ExecutionRequestFilter,
    ) -> Result<Vec<ExecutionRequest>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM execution_requests \
             WHERE (NOT $1 OR claimed_by IS NULL) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, ExecutionRequest>(&query)
            .bind(filter.unclaimed_only)
            .bind(run_repo::clamp_limit(filter.limit))
            .bind(filter.offset.max(0))
            .fetch_all(pool)
            .await
    }

    /// Atomically claim the best eligible request for a node.
    ///
    /// The node row is locked first. It must be active, hold no run, and
    /// have heartbeated at or after `fresh_since`. The candidate is picked
    /// with `FOR UPDATE SKIP LOCKED` so concurrent pollers move on to the
    /// next row instead of waiting, then a RUNNING run is inserted and the
    /// node is marked busy, all in one transaction.
    ///
    /// Returns `None` when the node is ineligible or nothing matches.
    pub async fn claim_next(
        pool: &PgPool,
        node_id: DbId,
        fresh_since: Timestamp,
    ) -> Result<Option<ClaimedWork>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "SELECT {} FROM nodes WHERE id = $1 AND deregistered_at IS NULL FOR UPDATE",
            node_repo::COLUMNS
        );
        let Some(node) = sqlx::query_as::<_, Node>(&query)
            .bind(node_id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let fresh = node.last_heartbeat_at.is_some_and(|at| at >= fresh_since);
        if node.current_run_id.is_some() || !fresh {
            return Ok(None);
        }

        let enabled = serde_json::json!(capabilities::enabled_capabilities(&node.capabilities));

        let query = format!(
            "UPDATE execution_requests SET claimed_by = $1, claimed_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM execution_requests \
                 WHERE claimed_by IS NULL \
                   AND required_capabilities <@ $2::jsonb \
                 ORDER BY priority DESC, created_at ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        let Some(request) = sqlx::query_as::<_, ExecutionRequest>(&query)
            .bind(node_id)
            .bind(&enabled)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let query = format!(
            "INSERT INTO runs (execution_request_id, node_id, status_id) \
             VALUES ($1, $2, $3) \
             RETURNING {}",
            run_repo::COLUMNS
        );
        let run = sqlx::query_as::<_, Run>(&query)
            .bind(request.id)
            .bind(node_id)
            .bind(RunStatus::Running.id())
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query("UPDATE nodes SET current_run_id = $2, status_id = $3 WHERE id = $1")
            .bind(node_id)
            .bind(run.id)
            .bind(NodeStatus::Busy.id())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(ClaimedWork { request, run }))
    }

    /// Create a fresh copy of a finished request. The original is untouched.
    ///
    /// The original row is locked for the duration, so concurrent requeues
    /// of the same request produce one copy.
    pub async fn requeue(
        pool: &PgPool,
        id: DbId,
        submitted_by: Option<DbId>,
    ) -> Result<Requeue, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!("SELECT {COLUMNS} FROM execution_requests WHERE id = $1 FOR UPDATE");
        let Some(original) = sqlx::query_as::<_, ExecutionRequest>(&query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(Requeue::NotFound);
        };

        let finished: bool = sqlx::query_scalar(
            "SELECT EXISTS (\
                 SELECT 1 FROM runs \
                 WHERE execution_request_id = $1 AND status_id IN ($2, $3, $4))",
        )
        .bind(id)
        .bind(RunStatus::Done.id())
        .bind(RunStatus::Failed.id())
        .bind(RunStatus::Canceled.id())
        .fetch_one(&mut *tx)
        .await?;
        if !finished {
            return Ok(Requeue::NotFinished);
        }

        let existing: Option<DbId> =
            sqlx::query_scalar("SELECT id FROM execution_requests WHERE requeued_from_id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        if let Some(request_id) = existing {
            return Ok(Requeue::AlreadyRequeued { request_id });
        }

        let query = format!(
            "INSERT INTO execution_requests \
                 (source_task_id, title, instructions, repository_url, branch_name, \
                  base_branch, priority, required_capabilities, requeued_from_id, submitted_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {COLUMNS}"
        );
        let requeued = sqlx::query_as::<_, ExecutionRequest>(&query)
            .bind(original.source_task_id)
            .bind(&original.title)
            .bind(&original.instructions)
            .bind(&original.repository_url)
            .bind(&original.branch_name)
            .bind(&original.base_branch)
            .bind(original.priority)
            .bind(&original.required_capabilities)
            .bind(original.id)
            .bind(submitted_by.or(original.submitted_by))
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Requeue::Requeued(requeued))
    }
}

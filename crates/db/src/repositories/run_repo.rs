//! Repository for the `runs` table.
//!
//! Every multi-row transition locks the owning node row before the run row,
//! the same order used by the claim path, so concurrent claim, complete,
//! cancel, and reap operations cannot deadlock.

use forge_core::types::{DbId, Timestamp};
use sqlx::{PgConnection, PgPool};

use crate::models::run::{Actor, Run, RunFilter, RunOutcome, RunTransition};
use crate::models::status::{NodeStatus, RunStatus, ACTIVE_RUN_STATUSES};

/// Column list for `runs` queries.
pub(crate) const COLUMNS: &str = "\
    id, execution_request_id, node_id, status_id, started_at, completed_at, \
    artifact_url, summary, error_message, created_at, updated_at";

/// Maximum page size for run listing.
const MAX_LIMIT: i64 = 200;

/// Default page size for run listing.
const DEFAULT_LIMIT: i64 = 50;

/// Provides queries and lifecycle transitions for runs.
pub struct RunRepo;

impl RunRepo {
    /// Find a run by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Run>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM runs WHERE id = $1");
        sqlx::query_as::<_, Run>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find the run created for an execution request, if it was claimed.
    pub async fn find_by_request(
        pool: &PgPool,
        execution_request_id: DbId,
    ) -> Result<Option<Run>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM runs WHERE execution_request_id = $1");
        sqlx::query_as::<_, Run>(&query)
            .bind(execution_request_id)
            .fetch_optional(pool)
            .await
    }

    /// List runs, newest first, optionally filtered by status and node.
    pub async fn list(pool: &PgPool, filter: &RunFilter) -> Result<Vec<Run>, sqlx::Error> {
        let limit = clamp_limit(filter.limit);
        let query = format!(
            "SELECT {COLUMNS} FROM runs \
             WHERE ($1::SMALLINT IS NULL OR status_id = $1) \
               AND ($2::BIGINT IS NULL OR node_id = $2) \
             ORDER BY started_at DESC, id DESC \
             LIMIT $3 OFFSET $4"
        );
        sqlx::query_as::<_, Run>(&query)
            .bind(filter.status.map(RunStatus::id))
            .bind(filter.node_id)
            .bind(limit)
            .bind(filter.offset.max(0))
            .fetch_all(pool)
            .await
    }

    /// Move a run to a terminal state and release its node.
    ///
    /// Idempotent: a run that is already terminal is returned unchanged as
    /// [`RunTransition::AlreadyTerminal`].
    pub async fn complete(
        pool: &PgPool,
        run_id: DbId,
        actor: Actor,
        outcome: &RunOutcome,
    ) -> Result<RunTransition, sqlx::Error> {
        // `node_id` never changes, so it is safe to read before locking.
        let Some(snapshot) = Self::find_by_id(pool, run_id).await? else {
            return Ok(RunTransition::NotFound);
        };
        if let Actor::Node(node_id) = actor {
            if snapshot.node_id != node_id {
                return Ok(RunTransition::NotOwner);
            }
        }

        let mut tx = pool.begin().await?;
        lock_node(&mut tx, snapshot.node_id).await?;

        let query = format!("SELECT {COLUMNS} FROM runs WHERE id = $1 FOR UPDATE");
        let run = sqlx::query_as::<_, Run>(&query)
            .bind(run_id)
            .fetch_one(&mut *tx)
            .await?;

        if run.is_terminal() {
            return Ok(RunTransition::AlreadyTerminal(run));
        }

        let query = format!(
            "UPDATE runs SET \
                 status_id = $2, completed_at = NOW(), \
                 artifact_url = $3, error_message = $4, \
                 summary = COALESCE($5, summary) \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        let run = sqlx::query_as::<_, Run>(&query)
            .bind(run_id)
            .bind(outcome.status().id())
            .bind(outcome.artifact_url())
            .bind(outcome.error_message())
            .bind(outcome.summary())
            .fetch_one(&mut *tx)
            .await?;

        release_node(&mut tx, run.node_id, run.id).await?;
        tx.commit().await?;

        Ok(RunTransition::Applied(run))
    }

    /// Fail every active run whose owning node has not heartbeated since
    /// `stale_before`, releasing those nodes.
    ///
    /// Nodes locked by a concurrent transaction are skipped and picked up on
    /// the next sweep.
    pub async fn fail_for_stale_nodes(
        pool: &PgPool,
        stale_before: Timestamp,
        error_message: &str,
    ) -> Result<Vec<Run>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let held: Vec<(DbId, DbId)> = sqlx::query_as(
            "SELECT id, current_run_id FROM nodes \
             WHERE current_run_id IS NOT NULL \
               AND (last_heartbeat_at IS NULL OR last_heartbeat_at < $1) \
             FOR UPDATE SKIP LOCKED",
        )
        .bind(stale_before)
        .fetch_all(&mut *tx)
        .await?;

        if held.is_empty() {
            return Ok(Vec::new());
        }

        let node_ids: Vec<DbId> = held.iter().map(|(node_id, _)| *node_id).collect();
        let run_ids: Vec<DbId> = held.iter().map(|(_, run_id)| *run_id).collect();

        let query = format!(
            "UPDATE runs SET status_id = $2, completed_at = NOW(), error_message = $3 \
             WHERE id = ANY($1) AND status_id IN ($4, $5) \
             RETURNING {COLUMNS}"
        );
        let failed = sqlx::query_as::<_, Run>(&query)
            .bind(&run_ids)
            .bind(RunStatus::Failed.id())
            .bind(error_message)
            .bind(ACTIVE_RUN_STATUSES[0].id())
            .bind(ACTIVE_RUN_STATUSES[1].id())
            .fetch_all(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE nodes SET current_run_id = NULL, status_id = $2 \
             WHERE id = ANY($1)",
        )
        .bind(&node_ids)
        .bind(NodeStatus::Online.id())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(failed)
    }
}

/// Clamp a requested page size to `1..=MAX_LIMIT`, defaulting when unset.
pub(crate) fn clamp_limit(limit: i64) -> i64 {
    if limit <= 0 {
        DEFAULT_LIMIT
    } else {
        limit.min(MAX_LIMIT)
    }
}

/// Take a row lock on a node for the rest of the transaction.
pub(crate) async fn lock_node(conn: &mut PgConnection, node_id: DbId) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT id FROM nodes WHERE id = $1 FOR UPDATE")
        .bind(node_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Clear a node's current run pointer if it still points at `run_id`.
///
/// Completing a job is evidence of liveness, so an active node returns to
/// `online`. A deregistered node keeps its `offline` status.
pub(crate) async fn release_node(
    conn: &mut PgConnection,
    node_id: DbId,
    run_id: DbId,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE nodes SET current_run_id = NULL, \
             status_id = CASE WHEN deregistered_at IS NULL THEN $3 ELSE status_id END \
         WHERE id = $1 AND current_run_id = $2",
    )
    .bind(node_id)
    .bind(run_id)
    .bind(NodeStatus::Online.id())
    .execute(conn)
    .await?;
    Ok(())
}

//! Repository for the append-only `run_logs` table.

use forge_core::types::DbId;
use sqlx::PgPool;

use crate::models::run::Run;
use crate::models::run_log::{LogAppend, RunLogEntry};
use crate::repositories::run_repo;

/// Column list for `run_logs` queries.
const COLUMNS: &str = "id, run_id, level, message, logged_at";

/// Provides append and ordered listing for run logs.
pub struct RunLogRepo;

impl RunLogRepo {
    /// Append a log line on behalf of `node_id`.
    ///
    /// The run row is held `FOR SHARE` so a concurrent terminal transition
    /// cannot interleave between the state check and the insert.
    pub async fn append(
        pool: &PgPool,
        run_id: DbId,
        node_id: DbId,
        level: &str,
        message: &str,
    ) -> Result<LogAppend, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "SELECT {} FROM runs WHERE id = $1 FOR SHARE",
            run_repo::COLUMNS
        );
        let Some(run) = sqlx::query_as::<_, Run>(&query)
            .bind(run_id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(LogAppend::NotFound);
        };

        if run.node_id != node_id {
            return Ok(LogAppend::NotOwner);
        }
        if let Some(status) = run.status().filter(|status| status.is_terminal()) {
            return Ok(LogAppend::RunTerminal(status));
        }

        let query = format!(
            "INSERT INTO run_logs (run_id, level, message) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        let entry = sqlx::query_as::<_, RunLogEntry>(&query)
            .bind(run_id)
            .bind(level)
            .bind(message)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(LogAppend::Appended(entry))
    }

    /// List all entries for a run, oldest first, ties broken by insertion order.
    pub async fn list_for_run(
        pool: &PgPool,
        run_id: DbId,
    ) -> Result<Vec<RunLogEntry>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM run_logs WHERE run_id = $1 ORDER BY logged_at ASC, id ASC"
        );
        sqlx::query_as::<_, RunLogEntry>(&query)
            .bind(run_id)
            .fetch_all(pool)
            .await
    }
}

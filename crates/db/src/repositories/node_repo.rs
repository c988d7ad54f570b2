//! Repository for the `nodes` table.

use forge_core::types::DbId;
use sqlx::PgPool;

use crate::models::node::{CreateNode, Deregistration, Node};
use crate::models::run::Run;
use crate::models::status::{NodeStatus, RunStatus};
use crate::repositories::run_repo;

/// Column list for `nodes` queries.
pub(crate) const COLUMNS: &str = "\
    id, name, node_type, status_id, capabilities, api_key_hash, api_key_suffix, \
    last_heartbeat_at, current_run_id, deregistered_at, created_at, updated_at";

/// Provides CRUD, heartbeat, and deregistration for nodes.
pub struct NodeRepo;

impl NodeRepo {
    /// Register a new node. It starts `offline` until its first heartbeat.
    pub async fn create(pool: &PgPool, input: &CreateNode) -> Result<Node, sqlx::Error> {
        let query = format!(
            "INSERT INTO nodes \
             (name, node_type, status_id, capabilities, api_key_hash, api_key_suffix) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Node>(&query)
            .bind(&input.name)
            .bind(&input.node_type)
            .bind(NodeStatus::Offline.id())
            .bind(&input.capabilities)
            .bind(&input.api_key_hash)
            .bind(&input.api_key_suffix)
            .fetch_one(pool)
            .await
    }

    /// Find a node by ID, including deregistered nodes.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Node>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM nodes WHERE id = $1");
        sqlx::query_as::<_, Node>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Look up the active node owning a credential hash.
    pub async fn find_active_by_key_hash(
        pool: &PgPool,
        key_hash: &str,
    ) -> Result<Option<Node>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM nodes WHERE api_key_hash = $1 AND deregistered_at IS NULL"
        );
        sqlx::query_as::<_, Node>(&query)
            .bind(key_hash)
            .fetch_optional(pool)
            .await
    }

    /// List nodes ordered by name.
    pub async fn list(pool: &PgPool, include_deregistered: bool) -> Result<Vec<Node>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM nodes \
             WHERE ($1 OR deregistered_at IS NULL) \
             ORDER BY name ASC, id ASC"
        );
        sqlx::query_as::<_, Node>(&query)
            .bind(include_deregistered)
            .fetch_all(pool)
            .await
    }

    /// Record a heartbeat for an active node.
    ///
    /// `last_heartbeat_at` never moves backwards. A `busy` node stays busy;
    /// any other node becomes `online`.
    pub async fn record_heartbeat(pool: &PgPool, id: DbId) -> Result<Option<Node>, sqlx::Error> {
        let query = format!(
            "UPDATE nodes SET \
                 last_heartbeat_at = GREATEST(last_heartbeat_at, NOW()), \
                 status_id = CASE WHEN status_id = $2 THEN status_id ELSE $3 END \
             WHERE id = $1 AND deregistered_at IS NULL \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Node>(&query)
            .bind(id)
            .bind(NodeStatus::Busy.id())
            .bind(NodeStatus::Online.id())
            .fetch_optional(pool)
            .await
    }

    /// Soft-deregister a node.
    ///
    /// A node holding an active run is refused unless `force` is set, in which
    /// case the run is canceled inside the same transaction first.
    pub async fn deregister(
        pool: &PgPool,
        id: DbId,
        force: bool,
    ) -> Result<Deregistration, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "SELECT {COLUMNS} FROM nodes WHERE id = $1 AND deregistered_at IS NULL FOR UPDATE"
        );
        let Some(node) = sqlx::query_as::<_, Node>(&query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(Deregistration::NotFound);
        };

        let mut canceled_run = None;
        if let Some(run_id) = node.current_run_id {
            if !force {
                return Ok(Deregistration::HoldsRun { run_id });
            }
            let query = format!(
                "UPDATE runs SET status_id = $2, completed_at = NOW() \
                 WHERE id = $1 AND status_id IN ($3, $4) \
                 RETURNING {}",
                run_repo::COLUMNS
            );
            canceled_run = sqlx::query_as::<_, Run>(&query)
                .bind(run_id)
                .bind(RunStatus::Canceled.id())
                .bind(RunStatus::Pending.id())
                .bind(RunStatus::Running.id())
                .fetch_optional(&mut *tx)
                .await?;
        }

        let query = format!(
            "UPDATE nodes SET deregistered_at = NOW(), status_id = $2, current_run_id = NULL \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        let node = sqlx::query_as::<_, Node>(&query)
            .bind(id)
            .bind(NodeStatus::Offline.id())
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Deregistration::Deregistered { node, canceled_run })
    }
}

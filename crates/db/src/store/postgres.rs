//! PostgreSQL-backed [`DispatchStore`].

use async_trait::async_trait;
use forge_core::types::{DbId, Timestamp};

use crate::models::execution_request::{
    ClaimedWork, ExecutionRequest, ExecutionRequestFilter, Requeue, SubmitExecutionRequest,
};
use crate::models::node::{CreateNode, Deregistration, Node, NodeCreation};
use crate::models::run::{Actor, Run, RunFilter, RunOutcome, RunTransition};
use crate::models::run_log::{LogAppend, RunLogEntry};
use crate::repositories::{ExecutionRequestRepo, NodeRepo, RunLogRepo, RunRepo};
use crate::store::{DispatchStore, StoreResult};
use crate::DbPool;

/// Store backed by a shared connection pool.
#[derive(Clone)]
pub struct PgDispatchStore {
    pool: DbPool,
}

impl PgDispatchStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl DispatchStore for PgDispatchStore {
    async fn health_check(&self) -> StoreResult<()> {
        crate::health_check(&self.pool).await
    }

    async fn create_node(&self, input: &CreateNode) -> StoreResult<NodeCreation> {
        match NodeRepo::create(&self.pool, input).await {
            Ok(node) => Ok(NodeCreation::Created(node)),
            Err(sqlx::Error::Database(e)) if e.constraint() == Some("uq_nodes_active_name") => {
                Ok(NodeCreation::NameTaken)
            }
            Err(e) => Err(e),
        }
    }

    async fn find_node(&self, id: DbId) -> StoreResult<Option<Node>> {
        NodeRepo::find_by_id(&self.pool, id).await
    }

    async fn find_active_node_by_key_hash(&self, key_hash: &str) -> StoreResult<Option<Node>> {
        NodeRepo::find_active_by_key_hash(&self.pool, key_hash).await
    }

    async fn list_nodes(&self, include_deregistered: bool) -> StoreResult<Vec<Node>> {
        NodeRepo::list(&self.pool, include_deregistered).await
    }

    async fn record_heartbeat(&self, node_id: DbId) -> StoreResult<Option<Node>> {
        NodeRepo::record_heartbeat(&self.pool, node_id).await
    }

    async fn deregister_node(&self, node_id: DbId, force: bool) -> StoreResult<Deregistration> {
        NodeRepo::deregister(&self.pool, node_id, force).await
    }

    async fn submit_request(
        &self,
        input: &SubmitExecutionRequest,
        submitted_by: Option<DbId>,
    ) -> StoreResult<ExecutionRequest> {
        ExecutionRequestRepo::submit(&self.pool, input, submitted_by).await
    }

    async fn find_request(&self, id: DbId) -> StoreResult<Option<ExecutionRequest>> {
        ExecutionRequestRepo::find_by_id(&self.pool, id).await
    }

    async fn list_requests(
        &self,
        filter: &ExecutionRequestFilter,
    ) -> StoreResult<Vec<ExecutionRequest>> {
        ExecutionRequestRepo::list(&self.pool, filter).await
    }

    async fn requeue_request(&self, id: DbId, submitted_by: Option<DbId>) -> StoreResult<Requeue> {
        ExecutionRequestRepo::requeue(&self.pool, id, submitted_by).await
    }

    async fn claim_next(
        &self,
        node_id: DbId,
        fresh_since: Timestamp,
    ) -> StoreResult<Option<ClaimedWork>> {
        ExecutionRequestRepo::claim_next(&self.pool, node_id, fresh_since).await
    }

    async fn find_run(&self, id: DbId) -> StoreResult<Option<Run>> {
        RunRepo::find_by_id(&self.pool, id).await
    }

    async fn find_run_by_request(&self, request_id: DbId) -> StoreResult<Option<Run>> {
        RunRepo::find_by_request(&self.pool, request_id).await
    }

    async fn list_runs(&self, filter: &RunFilter) -> StoreResult<Vec<Run>> {
        RunRepo::list(&self.pool, filter).await
    }

    async fn complete_run(
        &self,
        run_id: DbId,
        actor: Actor,
        outcome: &RunOutcome,
    ) -> StoreResult<RunTransition> {
        RunRepo::complete(&self.pool, run_id, actor, outcome).await
    }

    async fn fail_runs_of_stale_nodes(
        &self,
        stale_before: Timestamp,
        error_message: &str,
    ) -> StoreResult<Vec<Run>> {
        RunRepo::fail_for_stale_nodes(&self.pool, stale_before, error_message).await
    }

    async fn append_log(
        &self,
        run_id: DbId,
        node_id: DbId,
        level: &str,
        message: &str,
    ) -> StoreResult<LogAppend> {
        RunLogRepo::append(&self.pool, run_id, node_id, level, message).await
    }

    async fn list_logs(&self, run_id: DbId) -> StoreResult<Vec<RunLogEntry>> {
        RunLogRepo::list_for_run(&self.pool, run_id).await
    }
}

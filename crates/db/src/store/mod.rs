//! Storage port for the dispatch engine.
//!
//! [`DispatchStore`] exposes coarse, individually atomic operations. Every
//! method that touches more than one row (claim, complete, deregister,
//! log append, reap) is a single unit: either all of its writes land or
//! none do.
//!
//! - [`PgDispatchStore`] delegates to the repositories over a `PgPool`.
//! - [`MemoryDispatchStore`] keeps the same state behind one mutex for local
//!   development and tests.

mod memory;
mod postgres;

pub use memory::MemoryDispatchStore;
pub use postgres::PgDispatchStore;

use async_trait::async_trait;
use forge_core::types::{DbId, Timestamp};

use crate::models::execution_request::{
    ClaimedWork, ExecutionRequest, ExecutionRequestFilter, Requeue, SubmitExecutionRequest,
};
use crate::models::node::{CreateNode, Deregistration, Node, NodeCreation};
use crate::models::run::{Actor, Run, RunFilter, RunOutcome, RunTransition};
use crate::models::run_log::{LogAppend, RunLogEntry};

/// Result type shared by every store backend.
pub type StoreResult<T> = Result<T, sqlx::Error>;

#[async_trait]
pub trait DispatchStore: Send + Sync {
    /// Verify the backing storage is reachable.
    async fn health_check(&self) -> StoreResult<()>;

    // -- Node registry --

    async fn create_node(&self, input: &CreateNode) -> StoreResult<NodeCreation>;

    async fn find_node(&self, id: DbId) -> StoreResult<Option<Node>>;

    /// Resolve a credential hash to the active node that owns it.
    async fn find_active_node_by_key_hash(&self, key_hash: &str) -> StoreResult<Option<Node>>;

    async fn list_nodes(&self, include_deregistered: bool) -> StoreResult<Vec<Node>>;

    /// Stamp a heartbeat. `None` when the node is unknown or deregistered.
    async fn record_heartbeat(&self, node_id: DbId) -> StoreResult<Option<Node>>;

    async fn deregister_node(&self, node_id: DbId, force: bool) -> StoreResult<Deregistration>;

    // -- Task queue --

    async fn submit_request(
        &self,
        input: &SubmitExecutionRequest,
        submitted_by: Option<DbId>,
    ) -> StoreResult<ExecutionRequest>;

    async fn find_request(&self, id: DbId) -> StoreResult<Option<ExecutionRequest>>;

    async fn list_requests(
        &self,
        filter: &ExecutionRequestFilter,
    ) -> StoreResult<Vec<ExecutionRequest>>;

    async fn requeue_request(&self, id: DbId, submitted_by: Option<DbId>) -> StoreResult<Requeue>;

    /// Claim at most one request for the node. See
    /// [`ExecutionRequestRepo::claim_next`](crate::repositories::ExecutionRequestRepo::claim_next)
    /// for the eligibility rules every backend follows.
    async fn claim_next(
        &self,
        node_id: DbId,
        fresh_since: Timestamp,
    ) -> StoreResult<Option<ClaimedWork>>;

    // -- Run tracker --

    async fn find_run(&self, id: DbId) -> StoreResult<Option<Run>>;

    async fn find_run_by_request(&self, request_id: DbId) -> StoreResult<Option<Run>>;

    async fn list_runs(&self, filter: &RunFilter) -> StoreResult<Vec<Run>>;

    async fn complete_run(
        &self,
        run_id: DbId,
        actor: Actor,
        outcome: &RunOutcome,
    ) -> StoreResult<RunTransition>;

    /// Operator cancellation. Shares the terminal-transition path with
    /// [`complete_run`](Self::complete_run).
    async fn cancel_run(
        &self,
        run_id: DbId,
        summary: Option<String>,
    ) -> StoreResult<RunTransition> {
        self.complete_run(run_id, Actor::Operator, &RunOutcome::Canceled { summary })
            .await
    }

    /// Fail active runs held by nodes whose last heartbeat predates
    /// `stale_before`, and release those nodes.
    async fn fail_runs_of_stale_nodes(
        &self,
        stale_before: Timestamp,
        error_message: &str,
    ) -> StoreResult<Vec<Run>>;

    // -- Log sink --

    async fn append_log(
        &self,
        run_id: DbId,
        node_id: DbId,
        level: &str,
        message: &str,
    ) -> StoreResult<LogAppend>;

    async fn list_logs(&self, run_id: DbId) -> StoreResult<Vec<RunLogEntry>>;
}

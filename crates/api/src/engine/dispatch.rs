//! The dispatch engine: every node-protocol and operator operation.
//!
//! Handlers stay thin and call into [`DispatchEngine`], which validates input,
//! calls the atomic [`DispatchStore`] operations, and maps their outcomes onto
//! [`CoreError`] variants.

use std::sync::Arc;

use chrono::{Duration, Utc};
use forge_core::error::CoreError;
use forge_core::types::{DbId, Timestamp};
use forge_core::{capabilities, health, log_levels, node_keys, node_pool, submission};
use forge_db::models::execution_request::{
    ClaimedWork, ExecutionRequest, ExecutionRequestFilter, Requeue, SubmitExecutionRequest,
};
use forge_db::models::node::{CreateNode, Deregistration, Node, NodeCreation};
use forge_db::models::run::{Actor, Run, RunFilter, RunTransition};
use forge_db::models::run_log::{LogAppend, RunLogEntry};
use forge_db::store::DispatchStore;
use serde::{Deserialize, Serialize};

use crate::engine::fleet::{FleetStats, NodeSummary};
use crate::engine::outcome::{CompleteRunRequest, Completion};
use crate::error::{AppError, AppResult};

/// Error message recorded on runs failed by the stale-run reaper.
pub const REAPED_RUN_ERROR: &str =
    "Owning node stopped heartbeating; run failed by the stale-run reaper";

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

/// Body of `POST /admin/nodes`.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterNode {
    pub name: String,
    pub node_type: String,
    /// Object of boolean capability flags; omitted means none.
    pub capabilities: Option<serde_json::Value>,
}

/// Registration result. `api_key` is the only time the plaintext leaves
/// the server.
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredNode {
    pub node: NodeSummary,
    pub api_key: String,
}

/// Body of `POST /node/runs/{id}/logs`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppendLogRequest {
    pub level: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatAck {
    pub node_id: DbId,
    pub status: &'static str,
    pub last_heartbeat_at: Option<Timestamp>,
    pub server_time: Timestamp,
}

/// Why a poll handed out nothing. None of these is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    /// No eligible request is waiting.
    NoWork,
    /// The node already holds a run.
    NodeBusy,
    /// The node's last heartbeat is older than the staleness threshold.
    NodeStale,
}

#[derive(Debug, Clone)]
pub enum PollOutcome {
    Claimed(ClaimedWork),
    Unavailable(UnavailableReason),
}

/// Wire form of a poll result: `{available:false, reason}` or
/// `{available:true, request, run}`.
#[derive(Debug, Clone, Serialize)]
pub struct PollResponse {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<UnavailableReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<ExecutionRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<Run>,
}

impl From<PollOutcome> for PollResponse {
    fn from(outcome: PollOutcome) -> Self {
        match outcome {
            PollOutcome::Claimed(ClaimedWork { request, run }) => Self {
                available: true,
                reason: None,
                request: Some(request),
                run: Some(run),
            },
            PollOutcome::Unavailable(reason) => Self {
                available: false,
                reason: Some(reason),
                request: None,
                run: None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeregisteredNode {
    pub node: NodeSummary,
    pub canceled_run: Option<Run>,
}

/// A request together with its run, if it was claimed.
#[derive(Debug, Clone, Serialize)]
pub struct RequestDetail {
    pub request: ExecutionRequest,
    pub run: Option<Run>,
}

/// A run together with the request it executes.
#[derive(Debug, Clone, Serialize)]
pub struct RunDetail {
    pub run: Run,
    pub request: Option<ExecutionRequest>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Orchestrates the node registry, task queue, run tracker, and log sink
/// over a [`DispatchStore`].
pub struct DispatchEngine {
    store: Arc<dyn DispatchStore>,
    stale_threshold: Duration,
}

impl DispatchEngine {
    pub fn new(store: Arc<dyn DispatchStore>, stale_threshold: Duration) -> Self {
        Self {
            store,
            stale_threshold,
        }
    }

    pub fn stale_threshold(&self) -> Duration {
        self.stale_threshold
    }

    /// Whether the backing store answers.
    pub async fn storage_healthy(&self) -> bool {
        self.store.health_check().await.is_ok()
    }

    fn summarize(&self, node: Node, now: Timestamp) -> NodeSummary {
        NodeSummary::from_node(node, now, self.stale_threshold)
    }

    // -- Node registry & credentials --

    /// Register a node and mint its API key. The plaintext key is returned
    /// here and never again.
    pub async fn register_node(&self, input: RegisterNode) -> AppResult<RegisteredNode> {
        let name = input.name.trim().to_string();
        let node_type = input.node_type.trim().to_string();
        node_pool::validate_node_name(&name)?;
        node_pool::validate_node_type(&node_type)?;
        let capabilities = capabilities::normalize(input.capabilities);
        capabilities::validate_capability_set(&capabilities)?;

        let key = node_keys::generate_node_key();
        let created = self
            .store
            .create_node(&CreateNode {
                name: name.clone(),
                node_type,
                capabilities,
                api_key_hash: key.hash,
                api_key_suffix: key.suffix,
            })
            .await?;
        let node = match created {
            NodeCreation::Created(node) => node,
            NodeCreation::NameTaken => {
                return Err(
                    CoreError::Conflict(format!("A node named '{name}' already exists")).into(),
                );
            }
        };

        tracing::info!(node_id = node.id, node_name = %node.name, "Node registered");

        Ok(RegisteredNode {
            node: self.summarize(node, Utc::now()),
            api_key: key.plaintext,
        })
    }

    /// Resolve a bearer credential to its active node.
    pub async fn authenticate(&self, api_key: &str) -> AppResult<Node> {
        let hash = node_keys::hash_node_key(api_key.trim());
        self.store
            .find_active_node_by_key_hash(&hash)
            .await?
            .ok_or_else(|| CoreError::Unauthorized("Invalid node API key".into()).into())
    }

    /// Soft-deregister a node. Refused with `Conflict` while it holds a run
    /// unless `force` is set, in which case the run is canceled first.
    pub async fn deregister_node(&self, node_id: DbId, force: bool) -> AppResult<DeregisteredNode> {
        match self.store.deregister_node(node_id, force).await? {
            Deregistration::NotFound => Err(not_found("Node", node_id)),
            Deregistration::HoldsRun { run_id } => Err(CoreError::Conflict(format!(
                "Node {node_id} holds active run {run_id}; cancel it first or pass force=true"
            ))
            .into()),
            Deregistration::Deregistered { node, canceled_run } => {
                tracing::info!(
                    node_id,
                    canceled_run_id = canceled_run.as_ref().map(|r| r.id),
                    "Node deregistered",
                );
                Ok(DeregisteredNode {
                    node: self.summarize(node, Utc::now()),
                    canceled_run,
                })
            }
        }
    }

    pub async fn get_node(&self, node_id: DbId) -> AppResult<NodeSummary> {
        let node = self
            .store
            .find_node(node_id)
            .await?
            .ok_or_else(|| not_found("Node", node_id))?;
        Ok(self.summarize(node, Utc::now()))
    }

    pub async fn list_nodes(&self, include_deregistered: bool) -> AppResult<Vec<NodeSummary>> {
        let now = Utc::now();
        let nodes = self.store.list_nodes(include_deregistered).await?;
        Ok(nodes.into_iter().map(|n| self.summarize(n, now)).collect())
    }

    pub async fn fleet_stats(&self) -> AppResult<FleetStats> {
        let summaries = self.list_nodes(false).await?;
        Ok(FleetStats::from_summaries(&summaries))
    }

    // -- Heartbeat --

    /// Stamp a heartbeat. A busy node stays busy; anything else goes online.
    pub async fn heartbeat(&self, node: &Node) -> AppResult<HeartbeatAck> {
        let node = self
            .store
            .record_heartbeat(node.id)
            .await?
            .ok_or_else(|| AppError::from(CoreError::Unauthorized("Node is deregistered".into())))?;

        tracing::debug!(node_id = node.id, "Heartbeat recorded");

        let now = Utc::now();
        let summary = self.summarize(node, now);
        Ok(HeartbeatAck {
            node_id: summary.id,
            status: summary.status,
            last_heartbeat_at: summary.last_heartbeat_at,
            server_time: now,
        })
    }

    // -- Claim dispatcher --

    /// Hand out at most one eligible request to `node`.
    ///
    /// A busy or stale node gets an explicit unavailable reason. A claim that
    /// loses a race to another node is indistinguishable from an empty queue.
    pub async fn poll(&self, node: &Node) -> AppResult<PollOutcome> {
        if node.current_run_id.is_some() {
            return Ok(PollOutcome::Unavailable(UnavailableReason::NodeBusy));
        }
        let now = Utc::now();
        if health::is_stale(node.last_heartbeat_at, now, self.stale_threshold) {
            tracing::debug!(node_id = node.id, "Poll from stale node refused");
            return Ok(PollOutcome::Unavailable(UnavailableReason::NodeStale));
        }

        match self.store.claim_next(node.id, now - self.stale_threshold).await? {
            Some(work) => {
                tracing::info!(
                    node_id = node.id,
                    request_id = work.request.id,
                    run_id = work.run.id,
                    "Execution request claimed",
                );
                Ok(PollOutcome::Claimed(work))
            }
            None => Ok(PollOutcome::Unavailable(UnavailableReason::NoWork)),
        }
    }

    // -- Run tracker & log sink --

    /// Append a progress line to a run owned by `node`.
    ///
    /// A terminal run refuses with `InvalidState`; this is how a worker
    /// learns that an operator canceled its run.
    pub async fn append_log(
        &self,
        node: &Node,
        run_id: DbId,
        input: AppendLogRequest,
    ) -> AppResult<RunLogEntry> {
        let level = input.level.trim().to_ascii_lowercase();
        log_levels::validate_log_entry(&level, &input.message)?;

        match self
            .store
            .append_log(run_id, node.id, &level, &input.message)
            .await?
        {
            LogAppend::NotFound => Err(not_found("Run", run_id)),
            LogAppend::NotOwner => Err(not_owner(node.id, run_id)),
            LogAppend::RunTerminal(status) => Err(CoreError::InvalidState(format!(
                "Run {run_id} is already {}; no further log entries are accepted",
                status.name()
            ))
            .into()),
            LogAppend::Appended(entry) => Ok(entry),
        }
    }

    /// Report a run's terminal outcome. Idempotent: a repeat call returns the
    /// stored result with `applied = false`.
    pub async fn complete_run(
        &self,
        node: &Node,
        run_id: DbId,
        input: CompleteRunRequest,
    ) -> AppResult<Completion> {
        let outcome = input.into_outcome()?;
        let transition = self
            .store
            .complete_run(run_id, Actor::Node(node.id), &outcome)
            .await?;
        let completion = completion_from(transition, run_id, node.id)?;
        if completion.applied {
            tracing::info!(
                node_id = node.id,
                run_id,
                status = outcome.status().name(),
                "Run completed",
            );
        } else {
            tracing::debug!(node_id = node.id, run_id, "Completion on terminal run ignored");
        }
        Ok(completion)
    }

    /// Operator cancellation. The owning node finds out on its next log or
    /// complete call.
    pub async fn cancel_run(&self, run_id: DbId, summary: Option<String>) -> AppResult<Completion> {
        let summary = summary.filter(|s| !s.trim().is_empty());
        if let Some(text) = &summary {
            submission::validate_outcome_text("summary", text)?;
        }
        let transition = self.store.cancel_run(run_id, summary).await?;
        let completion = completion_from(transition, run_id, 0)?;
        if completion.applied {
            tracing::info!(run_id, node_id = completion.run.node_id, "Run canceled by operator");
        }
        Ok(completion)
    }

    pub async fn get_run(&self, run_id: DbId) -> AppResult<RunDetail> {
        let run = self
            .store
            .find_run(run_id)
            .await?
            .ok_or_else(|| not_found("Run", run_id))?;
        let request = self.store.find_request(run.execution_request_id).await?;
        Ok(RunDetail { run, request })
    }

    pub async fn list_runs(&self, filter: &RunFilter) -> AppResult<Vec<Run>> {
        Ok(self.store.list_runs(filter).await?)
    }

    /// All log entries for a run in timestamp order.
    pub async fn list_logs(&self, run_id: DbId) -> AppResult<Vec<RunLogEntry>> {
        if self.store.find_run(run_id).await?.is_none() {
            return Err(not_found("Run", run_id));
        }
        Ok(self.store.list_logs(run_id).await?)
    }

    /// Fail runs whose owning node has been silent for longer than `grace`.
    pub async fn reap_stale_runs(&self, grace: Duration) -> AppResult<Vec<Run>> {
        let stale_before = Utc::now() - grace;
        let failed = self
            .store
            .fail_runs_of_stale_nodes(stale_before, REAPED_RUN_ERROR)
            .await?;
        for run in &failed {
            tracing::warn!(run_id = run.id, node_id = run.node_id, "Stale run failed by reaper");
        }
        Ok(failed)
    }

    // -- Task queue --

    pub async fn submit_request(
        &self,
        input: SubmitExecutionRequest,
        submitted_by: Option<DbId>,
    ) -> AppResult<ExecutionRequest> {
        validate_submission(&input)?;
        let request = self.store.submit_request(&input, submitted_by).await?;
        tracing::info!(
            request_id = request.id,
            source_task_id = request.source_task_id,
            priority = request.priority,
            "Execution request submitted",
        );
        Ok(request)
    }

    pub async fn get_request(&self, request_id: DbId) -> AppResult<RequestDetail> {
        let request = self
            .store
            .find_request(request_id)
            .await?
            .ok_or_else(|| not_found("ExecutionRequest", request_id))?;
        let run = self.store.find_run_by_request(request_id).await?;
        Ok(RequestDetail { request, run })
    }

    pub async fn list_requests(
        &self,
        filter: &ExecutionRequestFilter,
    ) -> AppResult<Vec<ExecutionRequest>> {
        Ok(self.store.list_requests(filter).await?)
    }

    /// Queue a fresh copy of a finished request.
    pub async fn requeue_request(
        &self,
        request_id: DbId,
        submitted_by: Option<DbId>,
    ) -> AppResult<ExecutionRequest> {
        match self.store.requeue_request(request_id, submitted_by).await? {
            Requeue::NotFound => Err(not_found("ExecutionRequest", request_id)),
            Requeue::NotFinished => Err(CoreError::InvalidState(format!(
                "Execution request {request_id} has no finished run to requeue"
            ))
            .into()),
            Requeue::AlreadyRequeued { request_id: copy_id } => Err(CoreError::Conflict(format!(
                "Execution request {request_id} was already requeued as request {copy_id}"
            ))
            .into()),
            Requeue::Requeued(request) => {
                tracing::info!(
                    request_id = request.id,
                    requeued_from_id = request_id,
                    "Execution request requeued",
                );
                Ok(request)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn not_found(entity: &'static str, id: DbId) -> AppError {
    CoreError::NotFound { entity, id }.into()
}

fn not_owner(node_id: DbId, run_id: DbId) -> AppError {
    CoreError::Forbidden(format!("Run {run_id} is not owned by node {node_id}")).into()
}

fn completion_from(
    transition: RunTransition,
    run_id: DbId,
    node_id: DbId,
) -> AppResult<Completion> {
    match transition {
        RunTransition::NotFound => Err(not_found("Run", run_id)),
        RunTransition::NotOwner => Err(not_owner(node_id, run_id)),
        RunTransition::Applied(run) => Ok(Completion { run, applied: true }),
        RunTransition::AlreadyTerminal(run) => Ok(Completion { run, applied: false }),
    }
}

fn validate_submission(input: &SubmitExecutionRequest) -> Result<(), CoreError> {
    submission::validate_title(&input.title)?;
    submission::validate_repository_url(&input.repository_url)?;
    submission::validate_branch_name(&input.branch_name)?;
    if let Some(base) = &input.base_branch {
        submission::validate_branch_name(base)?;
    }
    if let Some(priority) = input.priority {
        submission::validate_priority(priority)?;
    }
    if let Some(required) = &input.required_capabilities {
        capabilities::validate_requirements(required)?;
    }
    Ok(())
}

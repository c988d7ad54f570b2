//! In-memory [`DispatchStore`] for local development and tests.
//!
//! All state sits behind a single `tokio::sync::Mutex`, so each trait method
//! is atomic with respect to every other one, which gives the same
//! at-most-one-claim guarantee the PostgreSQL transactions provide.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use forge_core::capabilities;
use forge_core::types::{DbId, Timestamp};
use tokio::sync::Mutex;

use crate::models::execution_request::{
    ClaimedWork, ExecutionRequest, ExecutionRequestFilter, Requeue, SubmitExecutionRequest,
};
use crate::models::node::{CreateNode, Deregistration, Node, NodeCreation};
use crate::models::run::{Actor, Run, RunFilter, RunOutcome, RunTransition};
use crate::models::run_log::{LogAppend, RunLogEntry};
use crate::models::status::{NodeStatus, RunStatus};
use crate::repositories::run_repo::clamp_limit;
use crate::store::{DispatchStore, StoreResult};

#[derive(Default)]
struct MemoryState {
    nodes: BTreeMap<DbId, Node>,
    requests: BTreeMap<DbId, ExecutionRequest>,
    runs: BTreeMap<DbId, Run>,
    logs: Vec<RunLogEntry>,
    last_id: DbId,
}

impl MemoryState {
    /// Allocate the next identifier. One sequence is shared by all tables.
    fn allocate_id(&mut self) -> DbId {
        self.last_id += 1;
        self.last_id
    }

    /// Clear a node's run pointer if it still points at `run_id`.
    fn release_node(&mut self, node_id: DbId, run_id: DbId, now: Timestamp) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            if node.current_run_id == Some(run_id) {
                node.current_run_id = None;
                if !node.is_deregistered() {
                    node.status_id = NodeStatus::Online.id();
                }
                node.updated_at = now;
            }
        }
    }

    /// Move an active run to the outcome's terminal status.
    fn finish_run(&mut self, run_id: DbId, outcome: &RunOutcome, now: Timestamp) -> Option<Run> {
        let run = self.runs.get_mut(&run_id)?;
        if run.is_terminal() {
            return None;
        }
        run.status_id = outcome.status().id();
        run.completed_at = Some(now);
        run.artifact_url = outcome.artifact_url().map(str::to_string);
        run.error_message = outcome.error_message().map(str::to_string);
        if let Some(summary) = outcome.summary() {
            run.summary = Some(summary.to_string());
        }
        run.updated_at = now;
        Some(run.clone())
    }

    fn insert_request(&mut self, request: ExecutionRequest) -> ExecutionRequest {
        self.requests.insert(request.id, request.clone());
        request
    }
}

/// Mutex-guarded store with the same semantics as [`super::PgDispatchStore`].
#[derive(Default)]
pub struct MemoryDispatchStore {
    state: Mutex<MemoryState>,
}

impl MemoryDispatchStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DispatchStore for MemoryDispatchStore {
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn create_node(&self, input: &CreateNode) -> StoreResult<NodeCreation> {
        let mut state = self.state.lock().await;
        let name_taken = state
            .nodes
            .values()
            .any(|n| n.name == input.name && !n.is_deregistered());
        if name_taken {
            return Ok(NodeCreation::NameTaken);
        }
        let now = Utc::now();
        let node = Node {
            id: state.allocate_id(),
            name: input.name.clone(),
            node_type: input.node_type.clone(),
            status_id: NodeStatus::Offline.id(),
            capabilities: input.capabilities.clone(),
            api_key_hash: input.api_key_hash.clone(),
            api_key_suffix: input.api_key_suffix.clone(),
            last_heartbeat_at: None,
            current_run_id: None,
            deregistered_at: None,
            created_at: now,
            updated_at: now,
        };
        state.nodes.insert(node.id, node.clone());
        Ok(NodeCreation::Created(node))
    }

    async fn find_node(&self, id: DbId) -> StoreResult<Option<Node>> {
        Ok(self.state.lock().await.nodes.get(&id).cloned())
    }

    async fn find_active_node_by_key_hash(&self, key_hash: &str) -> StoreResult<Option<Node>> {
        let state = self.state.lock().await;
        Ok(state
            .nodes
            .values()
            .find(|n| n.api_key_hash == key_hash && !n.is_deregistered())
            .cloned())
    }

    async fn list_nodes(&self, include_deregistered: bool) -> StoreResult<Vec<Node>> {
        let state = self.state.lock().await;
        let mut nodes: Vec<Node> = state
            .nodes
            .values()
            .filter(|n| include_deregistered || !n.is_deregistered())
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(nodes)
    }

    async fn record_heartbeat(&self, node_id: DbId) -> StoreResult<Option<Node>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let Some(node) = state
            .nodes
            .get_mut(&node_id)
            .filter(|n| !n.is_deregistered())
        else {
            return Ok(None);
        };
        node.last_heartbeat_at = Some(node.last_heartbeat_at.map_or(now, |last| last.max(now)));
        if node.status_id != NodeStatus::Busy.id() {
            node.status_id = NodeStatus::Online.id();
        }
        node.updated_at = now;
        Ok(Some(node.clone()))
    }

    async fn deregister_node(&self, node_id: DbId, force: bool) -> StoreResult<Deregistration> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let Some(node) = state.nodes.get(&node_id).filter(|n| !n.is_deregistered()) else {
            return Ok(Deregistration::NotFound);
        };

        let mut canceled_run = None;
        if let Some(run_id) = node.current_run_id {
            if !force {
                return Ok(Deregistration::HoldsRun { run_id });
            }
            canceled_run = state.finish_run(run_id, &RunOutcome::Canceled { summary: None }, now);
        }

        let Some(node) = state.nodes.get_mut(&node_id) else {
            return Ok(Deregistration::NotFound);
        };
        node.deregistered_at = Some(now);
        node.status_id = NodeStatus::Offline.id();
        node.current_run_id = None;
        node.updated_at = now;
        Ok(Deregistration::Deregistered {
            node: node.clone(),
            canceled_run,
        })
    }

    async fn submit_request(
        &self,
        input: &SubmitExecutionRequest,
        submitted_by: Option<DbId>,
    ) -> StoreResult<ExecutionRequest> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let request = ExecutionRequest {
            id: state.allocate_id(),
            source_task_id: input.source_task_id,
            title: input.title.clone(),
            instructions: input.instructions.clone(),
            repository_url: input.repository_url.clone(),
            branch_name: input.branch_name.clone(),
            base_branch: input.base_branch.clone(),
            priority: input.priority.unwrap_or(0),
            required_capabilities: serde_json::json!(input
                .required_capabilities
                .clone()
                .unwrap_or_default()),
            claimed_by: None,
            claimed_at: None,
            requeued_from_id: None,
            submitted_by,
            created_at: now,
            updated_at: now,
        };
        Ok(state.insert_request(request))
    }

    async fn find_request(&self, id: DbId) -> StoreResult<Option<ExecutionRequest>> {
        Ok(self.state.lock().await.requests.get(&id).cloned())
    }

    async fn list_requests(
        &self,
        filter: &ExecutionRequestFilter,
    ) -> StoreResult<Vec<ExecutionRequest>> {
        let state = self.state.lock().await;
        Ok(state
            .requests
            .values()
            .rev()
            .filter(|r| !filter.unclaimed_only || r.is_claimable())
            .skip(filter.offset.max(0) as usize)
            .take(clamp_limit(filter.limit) as usize)
            .cloned()
            .collect())
    }

    async fn requeue_request(&self, id: DbId, submitted_by: Option<DbId>) -> StoreResult<Requeue> {
        let mut state = self.state.lock().await;
        let Some(original) = state.requests.get(&id).cloned() else {
            return Ok(Requeue::NotFound);
        };
        let finished = state
            .runs
            .values()
            .any(|run| run.execution_request_id == id && run.is_terminal());
        if !finished {
            return Ok(Requeue::NotFinished);
        }
        if let Some(copy) = state.requests.values().find(|r| r.requeued_from_id == Some(id)) {
            return Ok(Requeue::AlreadyRequeued {
                request_id: copy.id,
            });
        }

        let now = Utc::now();
        let request = ExecutionRequest {
            id: state.allocate_id(),
            claimed_by: None,
            claimed_at: None,
            requeued_from_id: Some(original.id),
            submitted_by: submitted_by.or(original.submitted_by),
            created_at: now,
            updated_at: now,
            ..original
        };
        Ok(Requeue::Requeued(state.insert_request(request)))
    }

    async fn claim_next(
        &self,
        node_id: DbId,
        fresh_since: Timestamp,
    ) -> StoreResult<Option<ClaimedWork>> {
        let mut state = self.state.lock().await;
        let Some(node) = state.nodes.get(&node_id).filter(|n| !n.is_deregistered()) else {
            return Ok(None);
        };
        let fresh = node.last_heartbeat_at.is_some_and(|at| at >= fresh_since);
        if node.current_run_id.is_some() || !fresh {
            return Ok(None);
        }
        let enabled = capabilities::enabled_capabilities(&node.capabilities);

        let candidate = state
            .requests
            .values()
            .filter(|r| r.is_claimable())
            .filter(|r| {
                let required = capabilities::requirements_from_value(&r.required_capabilities);
                capabilities::satisfies(&enabled, &required)
            })
            .max_by_key(|r| (r.priority, Reverse(r.created_at), Reverse(r.id)))
            .map(|r| r.id);
        let Some(request_id) = candidate else {
            return Ok(None);
        };

        let now = Utc::now();
        let run = Run {
            id: state.allocate_id(),
            execution_request_id: request_id,
            node_id,
            status_id: RunStatus::Running.id(),
            started_at: now,
            completed_at: None,
            artifact_url: None,
            summary: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        state.runs.insert(run.id, run.clone());

        let Some(request) = state.requests.get_mut(&request_id) else {
            return Ok(None);
        };
        request.claimed_by = Some(node_id);
        request.claimed_at = Some(now);
        request.updated_at = now;
        let request = request.clone();

        if let Some(node) = state.nodes.get_mut(&node_id) {
            node.current_run_id = Some(run.id);
            node.status_id = NodeStatus::Busy.id();
            node.updated_at = now;
        }

        Ok(Some(ClaimedWork { request, run }))
    }

    async fn find_run(&self, id: DbId) -> StoreResult<Option<Run>> {
        Ok(self.state.lock().await.runs.get(&id).cloned())
    }

    async fn find_run_by_request(&self, request_id: DbId) -> StoreResult<Option<Run>> {
        let state = self.state.lock().await;
        Ok(state
            .runs
            .values()
            .find(|run| run.execution_request_id == request_id)
            .cloned())
    }

    async fn list_runs(&self, filter: &RunFilter) -> StoreResult<Vec<Run>> {
        let state = self.state.lock().await;
        let mut runs: Vec<Run> = state
            .runs
            .values()
            .filter(|run| filter.status.map_or(true, |s| run.status_id == s.id()))
            .filter(|run| filter.node_id.map_or(true, |id| run.node_id == id))
            .cloned()
            .collect();
        runs.sort_by_key(|run| Reverse((run.started_at, run.id)));
        Ok(runs
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(clamp_limit(filter.limit) as usize)
            .collect())
    }

    async fn complete_run(
        &self,
        run_id: DbId,
        actor: Actor,
        outcome: &RunOutcome,
    ) -> StoreResult<RunTransition> {
        let mut state = self.state.lock().await;
        let Some(run) = state.runs.get(&run_id) else {
            return Ok(RunTransition::NotFound);
        };
        if let Actor::Node(node_id) = actor {
            if run.node_id != node_id {
                return Ok(RunTransition::NotOwner);
            }
        }
        if run.is_terminal() {
            return Ok(RunTransition::AlreadyTerminal(run.clone()));
        }

        let now = Utc::now();
        let Some(run) = state.finish_run(run_id, outcome, now) else {
            return Ok(RunTransition::NotFound);
        };
        state.release_node(run.node_id, run.id, now);
        Ok(RunTransition::Applied(run))
    }

    async fn fail_runs_of_stale_nodes(
        &self,
        stale_before: Timestamp,
        error_message: &str,
    ) -> StoreResult<Vec<Run>> {
        let mut state = self.state.lock().await;
        let held: Vec<(DbId, DbId)> = state
            .nodes
            .values()
            .filter(|n| n.last_heartbeat_at.map_or(true, |at| at < stale_before))
            .filter_map(|n| n.current_run_id.map(|run_id| (n.id, run_id)))
            .collect();

        let now = Utc::now();
        let outcome = RunOutcome::Failed {
            error_message: error_message.to_string(),
            summary: None,
        };
        let mut failed = Vec::with_capacity(held.len());
        for (node_id, run_id) in held {
            if let Some(run) = state.finish_run(run_id, &outcome, now) {
                failed.push(run);
            }
            state.release_node(node_id, run_id, now);
        }
        Ok(failed)
    }

    async fn append_log(
        &self,
        run_id: DbId,
        node_id: DbId,
        level: &str,
        message: &str,
    ) -> StoreResult<LogAppend> {
        let mut state = self.state.lock().await;
        let Some(run) = state.runs.get(&run_id) else {
            return Ok(LogAppend::NotFound);
        };
        if run.node_id != node_id {
            return Ok(LogAppend::NotOwner);
        }
        if let Some(status) = run.status().filter(|status| status.is_terminal()) {
            return Ok(LogAppend::RunTerminal(status));
        }

        // Keep per-run timestamps non-decreasing even if the clock steps back.
        let now = Utc::now();
        let logged_at = state
            .logs
            .iter()
            .rev()
            .find(|entry| entry.run_id == run_id)
            .map_or(now, |last| last.logged_at.max(now));
        let entry = RunLogEntry {
            id: state.allocate_id(),
            run_id,
            level: level.to_string(),
            message: message.to_string(),
            logged_at,
        };
        state.logs.push(entry.clone());
        Ok(LogAppend::Appended(entry))
    }

    async fn list_logs(&self, run_id: DbId) -> StoreResult<Vec<RunLogEntry>> {
        let state = self.state.lock().await;
        let mut entries: Vec<RunLogEntry> = state
            .logs
            .iter()
            .filter(|entry| entry.run_id == run_id)
            .cloned()
            .collect();
        entries.sort_by_key(|entry| (entry.logged_at, entry.id));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use chrono::Duration;

    use super::*;

    fn node_input(name: &str, capabilities: serde_json::Value) -> CreateNode {
        CreateNode {
            name: name.to_string(),
            node_type: "git-agent".to_string(),
            capabilities,
            api_key_hash: format!("hash-{name}"),
            api_key_suffix: "abcd".to_string(),
        }
    }

    fn request_input(priority: i32, required: &[&str]) -> SubmitExecutionRequest {
        SubmitExecutionRequest {
            source_task_id: 7,
            title: "Add retry to webhook sender".to_string(),
            instructions: None,
            repository_url: "https://git.example.com/acme/api.git".to_string(),
            branch_name: "forge/task-7".to_string(),
            base_branch: Some("main".to_string()),
            priority: Some(priority),
            required_capabilities: Some(required.iter().map(|s| s.to_string()).collect()),
        }
    }

    /// A fresh-since cutoff that every node heartbeating "now" satisfies.
    fn cutoff() -> Timestamp {
        Utc::now() - Duration::minutes(5)
    }

    async fn create(store: &MemoryDispatchStore, name: &str, caps: serde_json::Value) -> Node {
        assert_matches!(
            store.create_node(&node_input(name, caps)).await.unwrap(),
            NodeCreation::Created(node) => node
        )
    }

    async fn live_node(store: &MemoryDispatchStore, name: &str) -> Node {
        let node = create(store, name, serde_json::json!({})).await;
        store.record_heartbeat(node.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn new_node_starts_offline_and_heartbeat_brings_it_online() {
        let store = MemoryDispatchStore::new();
        let node = create(&store, "alpha", serde_json::json!({"git": true})).await;
        assert_eq!(node.status_id, NodeStatus::Offline.id());
        assert!(node.last_heartbeat_at.is_none());

        let first = store.record_heartbeat(node.id).await.unwrap().unwrap();
        let second = store.record_heartbeat(node.id).await.unwrap().unwrap();
        assert_eq!(first.status_id, NodeStatus::Online.id());
        assert!(second.last_heartbeat_at >= first.last_heartbeat_at);
    }

    #[tokio::test]
    async fn concurrent_registrations_share_a_name_once() {
        let store = Arc::new(MemoryDispatchStore::new());
        let attempts = (0..5).map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .create_node(&node_input("twin", serde_json::json!({})))
                    .await
                    .unwrap()
            })
        });
        let outcomes = futures::future::join_all(attempts).await;
        let created: Vec<Node> = outcomes
            .into_iter()
            .filter_map(|joined| match joined.unwrap() {
                NodeCreation::Created(node) => Some(node),
                NodeCreation::NameTaken => None,
            })
            .collect();
        assert_eq!(created.len(), 1);

        // Deregistering frees the name.
        store.deregister_node(created[0].id, false).await.unwrap();
        create(&store, "twin", serde_json::json!({})).await;
    }

    #[tokio::test]
    async fn heartbeat_keeps_busy_node_busy() {
        let store = MemoryDispatchStore::new();
        let node = live_node(&store, "alpha").await;
        store.submit_request(&request_input(0, &[]), None).await.unwrap();
        store.claim_next(node.id, cutoff()).await.unwrap().unwrap();

        let after = store.record_heartbeat(node.id).await.unwrap().unwrap();
        assert_eq!(after.status_id, NodeStatus::Busy.id());
    }

    #[tokio::test]
    async fn claim_prefers_priority_then_age() {
        let store = MemoryDispatchStore::new();
        let node = live_node(&store, "alpha").await;
        let low = store.submit_request(&request_input(0, &[]), None).await.unwrap();
        let high = store.submit_request(&request_input(5, &[]), None).await.unwrap();

        let work = store.claim_next(node.id, cutoff()).await.unwrap().unwrap();
        assert_eq!(work.request.id, high.id);
        assert_eq!(work.request.claimed_by, Some(node.id));
        assert_eq!(work.run.status_id, RunStatus::Running.id());

        let node = store.find_node(node.id).await.unwrap().unwrap();
        assert_eq!(node.current_run_id, Some(work.run.id));
        assert_eq!(node.status_id, NodeStatus::Busy.id());

        let low = store.find_request(low.id).await.unwrap().unwrap();
        assert!(low.is_claimable());
    }

    #[tokio::test]
    async fn busy_or_stale_node_cannot_claim() {
        let store = MemoryDispatchStore::new();
        let silent = create(&store, "silent", serde_json::json!({})).await;
        let busy = live_node(&store, "busy").await;
        store.submit_request(&request_input(0, &[]), None).await.unwrap();
        store.submit_request(&request_input(0, &[]), None).await.unwrap();

        assert!(store.claim_next(silent.id, cutoff()).await.unwrap().is_none());
        assert!(store.claim_next(busy.id, cutoff()).await.unwrap().is_some());
        assert!(store.claim_next(busy.id, cutoff()).await.unwrap().is_none());

        // A cutoff in the future makes every heartbeat stale.
        let other = live_node(&store, "other").await;
        let future = Utc::now() + Duration::minutes(1);
        assert!(store.claim_next(other.id, future).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_respects_required_capabilities() {
        let store = MemoryDispatchStore::new();
        let plain = live_node(&store, "plain").await;
        let gpu = create(&store, "gpu", serde_json::json!({"gpu": true, "git": true})).await;
        store.record_heartbeat(gpu.id).await.unwrap();
        let request = store
            .submit_request(&request_input(0, &["gpu"]), None)
            .await
            .unwrap();

        assert!(store.claim_next(plain.id, cutoff()).await.unwrap().is_none());
        let work = store.claim_next(gpu.id, cutoff()).await.unwrap().unwrap();
        assert_eq!(work.request.id, request.id);
    }

    #[tokio::test]
    async fn concurrent_pollers_claim_each_request_once() {
        let store = Arc::new(MemoryDispatchStore::new());
        let mut nodes = Vec::new();
        for i in 0..8 {
            nodes.push(live_node(&store, &format!("node-{i}")).await);
        }
        for _ in 0..3 {
            store.submit_request(&request_input(0, &[]), None).await.unwrap();
        }

        let polls = nodes.iter().map(|node| {
            let store = Arc::clone(&store);
            let node_id = node.id;
            tokio::spawn(async move { store.claim_next(node_id, cutoff()).await.unwrap() })
        });
        let results: Vec<Option<ClaimedWork>> = futures::future::join_all(polls)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let mut claimed: Vec<DbId> = results
            .iter()
            .flatten()
            .map(|work| work.request.id)
            .collect();
        assert_eq!(claimed.len(), 3);
        claimed.sort_unstable();
        claimed.dedup();
        assert_eq!(claimed.len(), 3, "a request was claimed twice");
    }

    #[tokio::test]
    async fn complete_is_idempotent_and_releases_node() {
        let store = MemoryDispatchStore::new();
        let node = live_node(&store, "alpha").await;
        store.submit_request(&request_input(0, &[]), None).await.unwrap();
        let work = store.claim_next(node.id, cutoff()).await.unwrap().unwrap();

        let done = RunOutcome::Done {
            artifact_url: "https://git.example.com/acme/api/pull/42".to_string(),
            summary: Some("opened PR".to_string()),
        };
        let first = store
            .complete_run(work.run.id, Actor::Node(node.id), &done)
            .await
            .unwrap();
        let applied = assert_matches!(first, RunTransition::Applied(run) => run);
        assert_eq!(applied.status_id, RunStatus::Done.id());
        assert!(applied.completed_at.is_some());

        let failed = RunOutcome::Failed {
            error_message: "late failure".to_string(),
            summary: None,
        };
        let second = store
            .complete_run(work.run.id, Actor::Node(node.id), &failed)
            .await
            .unwrap();
        let unchanged = assert_matches!(second, RunTransition::AlreadyTerminal(run) => run);
        assert_eq!(unchanged.status_id, RunStatus::Done.id());
        assert_eq!(unchanged.artifact_url, applied.artifact_url);
        assert!(unchanged.error_message.is_none());

        let node = store.find_node(node.id).await.unwrap().unwrap();
        assert!(node.current_run_id.is_none());
        assert_eq!(node.status_id, NodeStatus::Online.id());
    }

    #[tokio::test]
    async fn only_owner_may_complete_or_log() {
        let store = MemoryDispatchStore::new();
        let owner = live_node(&store, "owner").await;
        let intruder = live_node(&store, "intruder").await;
        store.submit_request(&request_input(0, &[]), None).await.unwrap();
        let work = store.claim_next(owner.id, cutoff()).await.unwrap().unwrap();

        let outcome = RunOutcome::Canceled { summary: None };
        assert_matches!(
            store
                .complete_run(work.run.id, Actor::Node(intruder.id), &outcome)
                .await
                .unwrap(),
            RunTransition::NotOwner
        );
        assert_matches!(
            store
                .append_log(work.run.id, intruder.id, "info", "hello")
                .await
                .unwrap(),
            LogAppend::NotOwner
        );
    }

    #[tokio::test]
    async fn logs_are_ordered_and_closed_after_terminal() {
        let store = MemoryDispatchStore::new();
        let node = live_node(&store, "alpha").await;
        store.submit_request(&request_input(0, &[]), None).await.unwrap();
        let work = store.claim_next(node.id, cutoff()).await.unwrap().unwrap();

        for message in ["cloning", "generating", "pushing"] {
            store
                .append_log(work.run.id, node.id, "info", message)
                .await
                .unwrap();
        }
        store
            .cancel_run(work.run.id, Some("operator".to_string()))
            .await
            .unwrap();

        assert_matches!(
            store
                .append_log(work.run.id, node.id, "warn", "too late")
                .await
                .unwrap(),
            LogAppend::RunTerminal(RunStatus::Canceled)
        );

        let logs = store.list_logs(work.run.id).await.unwrap();
        let messages: Vec<&str> = logs.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["cloning", "generating", "pushing"]);
        assert!(logs.windows(2).all(|w| w[0].logged_at <= w[1].logged_at));
    }

    #[tokio::test]
    async fn deregister_refuses_busy_node_unless_forced() {
        let store = MemoryDispatchStore::new();
        let node = live_node(&store, "alpha").await;
        store.submit_request(&request_input(0, &[]), None).await.unwrap();
        let work = store.claim_next(node.id, cutoff()).await.unwrap().unwrap();

        assert_matches!(
            store.deregister_node(node.id, false).await.unwrap(),
            Deregistration::HoldsRun { run_id } if run_id == work.run.id
        );

        let result = store.deregister_node(node.id, true).await.unwrap();
        let (node, canceled) = assert_matches!(
            result,
            Deregistration::Deregistered { node, canceled_run: Some(run) } => (node, run)
        );
        assert!(node.is_deregistered());
        assert!(node.current_run_id.is_none());
        assert_eq!(canceled.status_id, RunStatus::Canceled.id());

        assert!(store
            .find_active_node_by_key_hash(&node.api_key_hash)
            .await
            .unwrap()
            .is_none());
        assert_matches!(
            store.deregister_node(node.id, false).await.unwrap(),
            Deregistration::NotFound
        );
    }

    #[tokio::test]
    async fn requeue_only_after_run_finishes() {
        let store = MemoryDispatchStore::new();
        let node = live_node(&store, "alpha").await;
        let original = store
            .submit_request(&request_input(3, &[]), Some(11))
            .await
            .unwrap();
        assert_matches!(
            store.requeue_request(original.id, None).await.unwrap(),
            Requeue::NotFinished
        );

        let work = store.claim_next(node.id, cutoff()).await.unwrap().unwrap();
        let failed = RunOutcome::Failed {
            error_message: "parse error".to_string(),
            summary: None,
        };
        store
            .complete_run(work.run.id, Actor::Node(node.id), &failed)
            .await
            .unwrap();

        let copy = assert_matches!(
            store.requeue_request(original.id, None).await.unwrap(),
            Requeue::Requeued(request) => request
        );
        assert_ne!(copy.id, original.id);
        assert_eq!(copy.requeued_from_id, Some(original.id));
        assert_eq!(copy.priority, 3);
        assert_eq!(copy.submitted_by, Some(11));
        assert!(copy.is_claimable());

        assert_matches!(
            store.requeue_request(original.id, None).await.unwrap(),
            Requeue::AlreadyRequeued { request_id } if request_id == copy.id
        );

        let original = store.find_request(original.id).await.unwrap().unwrap();
        assert_eq!(original.claimed_by, Some(node.id));
    }

    #[tokio::test]
    async fn reaper_fails_runs_of_stale_nodes_only() {
        let store = MemoryDispatchStore::new();
        let node = live_node(&store, "alpha").await;
        store.submit_request(&request_input(0, &[]), None).await.unwrap();
        let work = store.claim_next(node.id, cutoff()).await.unwrap().unwrap();

        let past = Utc::now() - Duration::hours(1);
        assert!(store
            .fail_runs_of_stale_nodes(past, "node went silent")
            .await
            .unwrap()
            .is_empty());

        let future = Utc::now() + Duration::seconds(1);
        let failed = store
            .fail_runs_of_stale_nodes(future, "node went silent")
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, work.run.id);
        assert_eq!(failed[0].status_id, RunStatus::Failed.id());
        assert_eq!(failed[0].error_message.as_deref(), Some("node went silent"));

        let node = store.find_node(node.id).await.unwrap().unwrap();
        assert!(node.current_run_id.is_none());
    }
}

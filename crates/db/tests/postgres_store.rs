//! PostgreSQL store tests. They run only when `FORGE_TEST_DATABASE_URL`
//! points at a disposable database; otherwise each test returns early.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use forge_db::models::execution_request::{Requeue, SubmitExecutionRequest};
use forge_db::models::node::{CreateNode, Node, NodeCreation};
use forge_db::models::run::{Actor, RunOutcome, RunTransition};
use forge_db::models::run_log::LogAppend;
use forge_db::models::status::{NodeStatus, RunStatus};
use forge_db::store::{DispatchStore, PgDispatchStore};

fn test_db_url() -> Option<String> {
    std::env::var("FORGE_TEST_DATABASE_URL").ok()
}

/// Unique tag so repeated runs against the same database do not collide.
fn unique_tag(label: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{label}-{nanos}")
}

async fn connect(url: &str) -> PgDispatchStore {
    let pool = forge_db::create_pool(url).await.unwrap();
    forge_db::run_migrations(&pool).await.unwrap();
    PgDispatchStore::new(pool)
}

/// Register and heartbeat a node that advertises a per-test capability, so
/// it only ever matches requests created by the same test.
async fn live_node(store: &PgDispatchStore, tag: &str, index: usize) -> Node {
    let name = format!("{tag}-node-{index}");
    let created = store
        .create_node(&CreateNode {
            name: name.clone(),
            node_type: "git-agent".to_string(),
            capabilities: serde_json::json!({ tag: true }),
            api_key_hash: forge_core::hashing::sha256_hex(name.as_bytes()),
            api_key_suffix: "test".to_string(),
        })
        .await
        .unwrap();
    let node = assert_matches!(created, NodeCreation::Created(node) => node);
    store.record_heartbeat(node.id).await.unwrap().unwrap()
}

fn tagged_request(tag: &str) -> SubmitExecutionRequest {
    SubmitExecutionRequest {
        source_task_id: 1,
        title: format!("request for {tag}"),
        instructions: None,
        repository_url: "https://git.example.com/acme/api.git".to_string(),
        branch_name: format!("forge/{tag}"),
        base_branch: None,
        // Outrank anything else left in a shared database.
        priority: Some(i32::MAX),
        required_capabilities: Some(vec![tag.to_string()]),
    }
}

fn cutoff() -> chrono::DateTime<Utc> {
    Utc::now() - Duration::minutes(5)
}

#[tokio::test]
async fn concurrent_claims_hand_out_a_request_once() {
    let Some(url) = test_db_url() else {
        return;
    };
    let store = Arc::new(connect(&url).await);
    let tag = unique_tag("race");

    let mut nodes = Vec::new();
    for i in 0..6 {
        nodes.push(live_node(&store, &tag, i).await);
    }
    let request = store.submit_request(&tagged_request(&tag), None).await.unwrap();

    let polls = nodes.iter().map(|node| {
        let store = Arc::clone(&store);
        let node_id = node.id;
        tokio::spawn(async move { store.claim_next(node_id, cutoff()).await.unwrap() })
    });
    let winners: Vec<_> = futures::future::join_all(polls)
        .await
        .into_iter()
        .filter_map(|joined| joined.unwrap())
        .collect();

    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].request.id, request.id);

    let owner = store.find_node(winners[0].run.node_id).await.unwrap().unwrap();
    assert_eq!(owner.current_run_id, Some(winners[0].run.id));
    assert_eq!(owner.status_id, NodeStatus::Busy.id());
}

#[tokio::test]
async fn run_lifecycle_round_trip() {
    let Some(url) = test_db_url() else {
        return;
    };
    let store = connect(&url).await;
    let tag = unique_tag("lifecycle");
    let node = live_node(&store, &tag, 0).await;
    store.submit_request(&tagged_request(&tag), None).await.unwrap();

    let work = store.claim_next(node.id, cutoff()).await.unwrap().unwrap();
    for message in ["one", "two", "three"] {
        assert_matches!(
            store.append_log(work.run.id, node.id, "info", message).await.unwrap(),
            LogAppend::Appended(_)
        );
    }

    let done = RunOutcome::Done {
        artifact_url: "https://git.example.com/acme/api/pull/42".to_string(),
        summary: None,
    };
    let run = assert_matches!(
        store.complete_run(work.run.id, Actor::Node(node.id), &done).await.unwrap(),
        RunTransition::Applied(run) => run
    );
    assert_eq!(run.status_id, RunStatus::Done.id());

    let again = store
        .complete_run(work.run.id, Actor::Node(node.id), &done)
        .await
        .unwrap();
    assert_matches!(
        again,
        RunTransition::AlreadyTerminal(same) if same.completed_at == run.completed_at
    );

    assert_matches!(
        store.append_log(work.run.id, node.id, "info", "late").await.unwrap(),
        LogAppend::RunTerminal(RunStatus::Done)
    );

    let logs = store.list_logs(work.run.id).await.unwrap();
    let messages: Vec<&str> = logs.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, ["one", "two", "three"]);

    let node = store.find_node(node.id).await.unwrap().unwrap();
    assert!(node.current_run_id.is_none());
    assert_eq!(node.status_id, NodeStatus::Online.id());
}

#[tokio::test]
async fn heartbeat_never_moves_backwards() {
    let Some(url) = test_db_url() else {
        return;
    };
    let store = connect(&url).await;
    let node = live_node(&store, &unique_tag("beat"), 0).await;

    let after = store.record_heartbeat(node.id).await.unwrap().unwrap();
    assert!(after.last_heartbeat_at >= node.last_heartbeat_at);
}

#[tokio::test]
async fn concurrent_requeues_create_one_copy() {
    let Some(url) = test_db_url() else {
        return;
    };
    let store = Arc::new(connect(&url).await);
    let tag = unique_tag("requeue");
    let node = live_node(&store, &tag, 0).await;
    let original = store.submit_request(&tagged_request(&tag), None).await.unwrap();

    let work = store.claim_next(node.id, cutoff()).await.unwrap().unwrap();
    store
        .cancel_run(work.run.id, None)
        .await
        .unwrap();

    let attempts = (0..4).map(|_| {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.requeue_request(original.id, None).await.unwrap() })
    });
    let outcomes: Vec<Requeue> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let copies: Vec<_> = outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            Requeue::Requeued(copy) => Some(copy.id),
            _ => None,
        })
        .collect();
    assert_eq!(copies.len(), 1);
    for outcome in &outcomes {
        assert_matches!(
            outcome,
            Requeue::Requeued(_) | Requeue::AlreadyRequeued { .. }
        );
    }
}

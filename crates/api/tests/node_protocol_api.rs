//! HTTP-level tests for the node protocol: heartbeat, poll, log, complete.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::{
    admin_token, build_test_app, build_test_app_with_threshold, expect_status, get, live_node,
    post, post_json, register_node, submit_request,
};
use serde_json::json;

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

#[tokio::test]
async fn heartbeat_with_issued_key_marks_node_online() {
    let (app, _) = build_test_app();
    let (node_id, key) = register_node(&app, "builder-1", json!({"git": true})).await;

    let before = expect_status(
        get(&app, &format!("/api/v1/admin/nodes/{node_id}"), Some(&admin_token())).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(before["data"]["health"], "offline");

    let sent = post(&app, "/api/v1/node/heartbeat", Some(&key)).await;
    let ack = expect_status(sent, StatusCode::OK).await;
    assert_eq!(ack["data"]["node_id"], node_id);
    assert_eq!(ack["data"]["status"], "online");

    let after = expect_status(
        get(&app, &format!("/api/v1/admin/nodes/{node_id}"), Some(&admin_token())).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(after["data"]["health"], "online");
    assert_eq!(after["data"]["stale"], false);
}

#[tokio::test]
async fn node_calls_without_valid_key_are_unauthorized() {
    let (app, _) = build_test_app();
    submit_request(&app, "Untouched", 0, &[]).await;

    let sent = post(&app, "/api/v1/node/poll", None).await;
    let missing = expect_status(sent, StatusCode::UNAUTHORIZED).await;
    assert_eq!(missing["code"], "UNAUTHORIZED");

    let wrong = post(&app, "/api/v1/node/poll", Some("fgn_forged")).await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    // An operator JWT is not a node credential.
    let jwt = post(&app, "/api/v1/node/heartbeat", Some(&admin_token())).await;
    assert_eq!(jwt.status(), StatusCode::UNAUTHORIZED);

    // The rejected calls claimed nothing.
    let pending = expect_status(
        get(&app, "/api/v1/admin/requests?unclaimed_only=true", Some(&admin_token())).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(pending["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn deregistered_node_key_stops_working() {
    let (app, _) = build_test_app();
    let (node_id, key) = live_node(&app, "builder-1").await;

    let node_path = format!("/api/v1/admin/nodes/{node_id}");
    let response = common::delete(&app, &node_path, Some(&admin_token())).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = post(&app, "/api/v1/node/heartbeat", Some(&key)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ---------------------------------------------------------------------------
// Poll
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_queue_poll_is_unavailable_not_error() {
    let (app, _) = build_test_app();
    let (_, key) = live_node(&app, "builder-1").await;

    let sent = post(&app, "/api/v1/node/poll", Some(&key)).await;
    let json = expect_status(sent, StatusCode::OK).await;
    assert_eq!(json["data"], json!({"available": false, "reason": "no_work"}));
}

#[tokio::test]
async fn two_simultaneous_polls_one_request_one_winner() {
    let (app, _) = build_test_app();
    let (_, key_a) = live_node(&app, "builder-a").await;
    let (_, key_b) = live_node(&app, "builder-b").await;
    let request_id = submit_request(&app, "Add CSV export", 0, &[]).await;

    let (a, b) = tokio::join!(
        post(&app, "/api/v1/node/poll", Some(&key_a)),
        post(&app, "/api/v1/node/poll", Some(&key_b)),
    );
    let a = expect_status(a, StatusCode::OK).await;
    let b = expect_status(b, StatusCode::OK).await;

    let winners: Vec<_> = [&a, &b]
        .into_iter()
        .filter(|j| j["data"]["available"] == true)
        .collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0]["data"]["request"]["id"], request_id);
    assert_eq!(winners[0]["data"]["run"]["status_id"], 2);

    let loser = if a["data"]["available"] == true { &b } else { &a };
    assert_eq!(loser["data"]["available"], false);
}

#[tokio::test]
async fn poll_follows_priority_then_age() {
    let (app, _) = build_test_app();
    let (_, key) = live_node(&app, "builder-1").await;
    let low = submit_request(&app, "Low", -5, &[]).await;
    let high = submit_request(&app, "High", 10, &[]).await;
    let _high_later = submit_request(&app, "High, later", 10, &[]).await;

    let sent = post(&app, "/api/v1/node/poll", Some(&key)).await;
    let json = expect_status(sent, StatusCode::OK).await;
    assert_eq!(json["data"]["request"]["id"], high);
    assert_ne!(json["data"]["request"]["id"], low);
}

#[tokio::test]
async fn busy_node_poll_reports_node_busy() {
    let (app, _) = build_test_app();
    let (_, key) = live_node(&app, "builder-1").await;
    submit_request(&app, "First", 0, &[]).await;
    submit_request(&app, "Second", 0, &[]).await;

    let sent = post(&app, "/api/v1/node/poll", Some(&key)).await;
    let first = expect_status(sent, StatusCode::OK).await;
    assert_eq!(first["data"]["available"], true);

    let sent = post(&app, "/api/v1/node/poll", Some(&key)).await;
    let second = expect_status(sent, StatusCode::OK).await;
    assert_eq!(second["data"], json!({"available": false, "reason": "node_busy"}));
}

#[tokio::test]
async fn capabilities_gate_claims() {
    let (app, _) = build_test_app();
    let (_, plain_key) = live_node(&app, "plain").await;
    let (_, gpu_key) = register_node(&app, "gpu", json!({"gpu": true, "git": true})).await;
    post(&app, "/api/v1/node/heartbeat", Some(&gpu_key)).await;
    let request_id = submit_request(&app, "Train model", 0, &["gpu"]).await;

    let sent = post(&app, "/api/v1/node/poll", Some(&plain_key)).await;
    let plain = expect_status(sent, StatusCode::OK).await;
    assert_eq!(plain["data"]["available"], false);

    let sent = post(&app, "/api/v1/node/poll", Some(&gpu_key)).await;
    let gpu = expect_status(sent, StatusCode::OK).await;
    assert_eq!(gpu["data"]["request"]["id"], request_id);
}

#[tokio::test]
async fn stale_node_is_flagged_and_cannot_claim_until_it_heartbeats() {
    let (app, _) = build_test_app_with_threshold(1);
    let (node_id, key) = live_node(&app, "builder-1").await;
    submit_request(&app, "Fix flaky test", 0, &[]).await;

    tokio::time::sleep(Duration::from_millis(1_200)).await;

    let view = expect_status(
        get(&app, &format!("/api/v1/admin/nodes/{node_id}"), Some(&admin_token())).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(view["data"]["stale"], true);
    assert_eq!(view["data"]["health"], "offline");

    // Still authenticated, but not eligible.
    let sent = post(&app, "/api/v1/node/poll", Some(&key)).await;
    let refused = expect_status(sent, StatusCode::OK).await;
    assert_eq!(refused["data"], json!({"available": false, "reason": "node_stale"}));

    post(&app, "/api/v1/node/heartbeat", Some(&key)).await;
    let sent = post(&app, "/api/v1/node/poll", Some(&key)).await;
    let claimed = expect_status(sent, StatusCode::OK).await;
    assert_eq!(claimed["data"]["available"], true);
}

// ---------------------------------------------------------------------------
// Logs & completion
// ---------------------------------------------------------------------------

async fn claim(app: &axum::Router, key: &str) -> i64 {
    let json = expect_status(post(app, "/api/v1/node/poll", Some(key)).await, StatusCode::OK).await;
    json["data"]["run"]["id"].as_i64().unwrap()
}

#[tokio::test]
async fn failed_completion_clears_node_job() {
    let (app, _) = build_test_app();
    let (node_id, key) = live_node(&app, "builder-1").await;
    submit_request(&app, "Upgrade parser", 0, &[]).await;
    let run_id = claim(&app, &key).await;

    let json = expect_status(
        post_json(
            &app,
            &format!("/api/v1/node/runs/{run_id}/complete"),
            Some(&key),
            json!({"status": "FAILED", "error_message": "parse error"}),
        )
        .await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(json["data"]["applied"], true);
    assert_eq!(json["data"]["run"]["status_id"], 4);
    assert_eq!(json["data"]["run"]["error_message"], "parse error");
    assert!(json["data"]["run"]["artifact_url"].is_null());

    let node = expect_status(
        get(&app, &format!("/api/v1/admin/nodes/{node_id}"), Some(&admin_token())).await,
        StatusCode::OK,
    )
    .await;
    assert!(node["data"]["current_run_id"].is_null());
    assert_eq!(node["data"]["status"], "online");
}

#[tokio::test]
async fn three_logs_then_done() {
    let (app, _) = build_test_app();
    let (_, key) = live_node(&app, "builder-1").await;
    submit_request(&app, "Add pagination", 0, &[]).await;
    let run_id = claim(&app, &key).await;

    for (level, message) in [("info", "cloned"), ("warn", "lint warnings"), ("info", "pushed")] {
        let response = post_json(
            &app,
            &format!("/api/v1/node/runs/{run_id}/logs"),
            Some(&key),
            json!({"level": level, "message": message}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let url = "https://git.example.com/acme/portal/pull/42";
    let body = json!({"status": "done", "artifact_url": url, "summary": "Added cursor pagination"});
    let complete_path = format!("/api/v1/node/runs/{run_id}/complete");
    let first = expect_status(
        post_json(&app, &complete_path, Some(&key), body.clone()).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(first["data"]["run"]["artifact_url"], url);

    // Repeat is a no-op, not an error.
    let second = expect_status(
        post_json(&app, &format!("/api/v1/node/runs/{run_id}/complete"), Some(&key), body).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(second["data"]["applied"], false);
    assert_eq!(second["data"]["run"], first["data"]["run"]);

    let logs = expect_status(
        get(&app, &format!("/api/v1/admin/runs/{run_id}/logs"), Some(&admin_token())).await,
        StatusCode::OK,
    )
    .await;
    let messages: Vec<&str> = logs["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["message"].as_str().unwrap())
        .collect();
    assert_eq!(messages, ["cloned", "lint warnings", "pushed"]);

    let run = expect_status(
        get(&app, &format!("/api/v1/admin/runs/{run_id}"), Some(&admin_token())).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(run["data"]["run"]["status_id"], 3);
    assert_eq!(run["data"]["run"]["artifact_url"], url);
}

#[tokio::test]
async fn log_after_terminal_is_invalid_state() {
    let (app, _) = build_test_app();
    let (_, key) = live_node(&app, "builder-1").await;
    submit_request(&app, "Rename module", 0, &[]).await;
    let run_id = claim(&app, &key).await;

    let cancel_path = format!("/api/v1/admin/runs/{run_id}/cancel");
    let cancel = post(&app, &cancel_path, Some(&admin_token())).await;
    assert_eq!(cancel.status(), StatusCode::OK);

    let json = expect_status(
        post_json(
            &app,
            &format!("/api/v1/node/runs/{run_id}/logs"),
            Some(&key),
            json!({"level": "info", "message": "still going"}),
        )
        .await,
        StatusCode::CONFLICT,
    )
    .await;
    assert_eq!(json["code"], "INVALID_STATE");
}

#[tokio::test]
async fn invalid_completion_payloads_are_rejected() {
    let (app, _) = build_test_app();
    let (_, key) = live_node(&app, "builder-1").await;
    submit_request(&app, "Bump deps", 0, &[]).await;
    let run_id = claim(&app, &key).await;
    let uri = format!("/api/v1/node/runs/{run_id}/complete");

    for body in [
        json!({"status": "done"}),
        json!({"status": "failed"}),
        json!({"status": "running"}),
        json!({"status": "done", "artifact_url": "https://x.example/pr/1", "error_message": "no"}),
    ] {
        let sent = post_json(&app, &uri, Some(&key), body).await;
        let json = expect_status(sent, StatusCode::BAD_REQUEST).await;
        assert_eq!(json["code"], "VALIDATION_ERROR");
    }

    let bad_level = post_json(
        &app,
        &format!("/api/v1/node/runs/{run_id}/logs"),
        Some(&key),
        json!({"level": "debug", "message": "hi"}),
    )
    .await;
    assert_eq!(bad_level.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn foreign_run_is_forbidden_and_unknown_run_is_not_found() {
    let (app, _) = build_test_app();
    let (_, owner) = live_node(&app, "owner").await;
    let (_, other) = live_node(&app, "other").await;
    submit_request(&app, "Refactor", 0, &[]).await;
    let run_id = claim(&app, &owner).await;

    let log = json!({"level": "info", "message": "hijack"});
    let logs_path = format!("/api/v1/node/runs/{run_id}/logs");
    let forbidden = post_json(&app, &logs_path, Some(&other), log.clone()).await;
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let missing = post_json(&app, "/api/v1/node/runs/999999/logs", Some(&owner), log).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

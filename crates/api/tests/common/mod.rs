#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use forge_api::auth::jwt::{generate_access_token, JwtConfig};
use forge_api::config::{DispatchConfig, ServerConfig, StoreBackend};
use forge_api::engine::DispatchEngine;
use forge_api::router::build_app_router;
use forge_api::state::AppState;
use forge_db::store::MemoryDispatchStore;

pub const TEST_JWT_SECRET: &str = "forge-integration-test-secret";

/// Build a test `ServerConfig` with safe defaults and the in-memory store.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        jwt: JwtConfig {
            secret: TEST_JWT_SECRET.to_string(),
            access_token_expiry_mins: 15,
        },
        dispatch: DispatchConfig {
            store_backend: StoreBackend::Memory,
            ..DispatchConfig::default()
        },
    }
}

/// The full application router over a fresh in-memory store.
///
/// Returns the shared state too, so tests can reach the engine directly.
pub fn build_test_app() -> (Router, AppState) {
    build_test_app_with(test_config())
}

/// Like [`build_test_app`] with a custom staleness threshold.
pub fn build_test_app_with_threshold(stale_threshold_secs: i64) -> (Router, AppState) {
    let mut config = test_config();
    config.dispatch.stale_threshold_secs = stale_threshold_secs;
    build_test_app_with(config)
}

fn build_test_app_with(config: ServerConfig) -> (Router, AppState) {
    let engine = Arc::new(DispatchEngine::new(
        Arc::new(MemoryDispatchStore::new()),
        config.dispatch.stale_threshold(),
    ));
    let state = AppState {
        engine,
        config: Arc::new(config.clone()),
    };
    (build_app_router(state.clone(), &config), state)
}

pub fn admin_token() -> String {
    generate_access_token(1, "admin", &test_config().jwt).unwrap()
}

pub fn viewer_token() -> String {
    generate_access_token(2, "viewer", &test_config().jwt).unwrap()
}

pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str, bearer: Option<&str>) -> Response<Body> {
    send(app, Method::GET, uri, bearer, None).await
}

pub async fn post_json(
    app: &Router,
    uri: &str,
    bearer: Option<&str>,
    body: Value,
) -> Response<Body> {
    send(app, Method::POST, uri, bearer, Some(body)).await
}

pub async fn post(app: &Router, uri: &str, bearer: Option<&str>) -> Response<Body> {
    send(app, Method::POST, uri, bearer, None).await
}

pub async fn delete(app: &Router, uri: &str, bearer: Option<&str>) -> Response<Body> {
    send(app, Method::DELETE, uri, bearer, None).await
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Assert the status and return the parsed body.
pub async fn expect_status(response: Response<Body>, status: StatusCode) -> Value {
    assert_eq!(response.status(), status);
    body_json(response).await
}

/// Register a node as admin; returns `(node_id, api_key)`.
pub async fn register_node(app: &Router, name: &str, capabilities: Value) -> (i64, String) {
    let response = post_json(
        app,
        "/api/v1/admin/nodes",
        Some(&admin_token()),
        json!({ "name": name, "node_type": "git-agent", "capabilities": capabilities }),
    )
    .await;
    let json = expect_status(response, StatusCode::CREATED).await;
    let id = json["data"]["node"]["id"].as_i64().unwrap();
    let key = json["data"]["api_key"].as_str().unwrap().to_string();
    (id, key)
}

/// Register a node and send its first heartbeat so it may poll.
pub async fn live_node(app: &Router, name: &str) -> (i64, String) {
    let (id, key) = register_node(app, name, json!({})).await;
    let response = post(app, "/api/v1/node/heartbeat", Some(&key)).await;
    assert_eq!(response.status(), StatusCode::OK);
    (id, key)
}

/// Submit an execution request as admin and return its id.
pub async fn submit_request(app: &Router, title: &str, priority: i32, required: &[&str]) -> i64 {
    let response = post_json(
        app,
        "/api/v1/admin/requests",
        Some(&admin_token()),
        json!({
            "source_task_id": 7,
            "title": title,
            "instructions": "Keep the public API unchanged",
            "repository_url": "https://git.example.com/acme/portal.git",
            "branch_name": "forge/task-7",
            "base_branch": "main",
            "priority": priority,
            "required_capabilities": required,
        }),
    )
    .await;
    let json = expect_status(response, StatusCode::CREATED).await;
    json["data"]["id"].as_i64().unwrap()
}

//! Integration tests for the control API endpoints.
//!
//! Tests use Axum's `Router` directly via `tower::ServiceExt` without
//! starting a TCP server. This validates handler logic and routing
//! without needing a live network connection.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use leibniz_api::router::build_router;
use leibniz_api::state::AppState;
use leibniz_core::{
    CalculationEngine, CalculationSnapshot, CalculationStatus, FileSnapshotStore,
    MemorySnapshotStore, SnapshotStore,
};
use serde_json::Value;
use tower::ServiceExt;

/// Long enough that no periodic step fires during a test.
const IDLE_INTERVAL: Duration = Duration::from_secs(3600);

async fn make_router(store: Arc<dyn SnapshotStore>, interval: Duration) -> Router {
    let engine = Arc::new(CalculationEngine::new(store, interval).await);
    build_router(Arc::new(AppState::new(engine)))
}

async fn make_default_router() -> Router {
    make_router(Arc::new(MemorySnapshotStore::new()), IDLE_INTERVAL).await
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn control_request(body: &str) -> Request<Body> {
    Request::post("/control")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_owned()))
        .unwrap()
}

async fn get_status(router: &Router) -> Value {
    let response = router
        .clone()
        .oneshot(Request::get("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_to_json(response.into_body()).await
}

async fn send_action(router: &Router, action: &str) -> Value {
    let response = router
        .clone()
        .oneshot(control_request(&format!(r#"{{"action":"{action}"}}"#)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_to_json(response.into_body()).await
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_index_lists_endpoints() {
    let router = make_default_router().await;

    let response = router
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["service"], "leibniz");
    assert_eq!(json["endpoints"]["status"], "GET /status");
}

#[tokio::test]
async fn test_initial_status_is_default() {
    let router = make_default_router().await;

    let json = get_status(&router).await;
    assert_eq!(
        json,
        serde_json::json!({ "piText": "0", "status": "stopped", "iteration": 0 })
    );
}

#[tokio::test]
async fn test_start_returns_first_term() {
    let router = make_default_router().await;

    let json = send_action(&router, "start").await;
    assert_eq!(json["status"], "running");
    assert_eq!(json["iteration"], 1);
    assert_eq!(json["piText"], "4.0");

    assert_eq!(get_status(&router).await, json);
}

#[tokio::test]
async fn test_pause_stop_reset_sequence() {
    let router = make_default_router().await;
    send_action(&router, "start").await;

    let paused = send_action(&router, "pause").await;
    assert_eq!(paused["status"], "paused");
    assert_eq!(paused["iteration"], 1);

    let resumed = send_action(&router, "start").await;
    assert_eq!(resumed["status"], "running");
    assert_eq!(resumed["iteration"], 2);

    let stopped = send_action(&router, "stop").await;
    assert_eq!(stopped["status"], "stopped");
    assert_eq!(stopped["iteration"], 2);
    assert_ne!(stopped["piText"], "0");

    let reset = send_action(&router, "reset").await;
    assert_eq!(
        reset,
        serde_json::json!({ "piText": "0", "status": "stopped", "iteration": 0 })
    );
}

#[tokio::test]
async fn test_command_alias_is_accepted() {
    let router = make_default_router().await;

    let response = router
        .clone()
        .oneshot(control_request(r#"{"command":"start"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_action_is_rejected() {
    let router = make_default_router().await;

    let response = router
        .clone()
        .oneshot(control_request(r#"{"action":"explode"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], 400);
    assert!(json["error"].as_str().unwrap().contains("explode"));

    // State untouched.
    assert_eq!(get_status(&router).await["status"], "stopped");
}

#[tokio::test]
async fn test_missing_action_is_rejected() {
    let router = make_default_router().await;

    let response = router.oneshot(control_request("{}")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_to_json(response.into_body()).await;
    assert!(json["error"].as_str().unwrap().contains("action"));
}

#[tokio::test]
async fn test_malformed_json_is_rejected() {
    let router = make_default_router().await;

    let response = router.oneshot(control_request("{not json")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], 400);
}

#[tokio::test]
async fn test_missing_content_type_is_rejected() {
    let router = make_default_router().await;

    let response = router
        .oneshot(
            Request::post("/control")
                .body(Body::from(r#"{"action":"start"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_control_is_not_allowed() {
    let router = make_default_router().await;

    let response = router
        .oneshot(Request::get("/control").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_commands_write_through_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileSnapshotStore::new(dir.path().join("state.json")));
    let router = make_router(Arc::clone(&store) as Arc<dyn SnapshotStore>, IDLE_INTERVAL).await;

    send_action(&router, "start").await;
    let persisted = store.read_record().unwrap();
    assert_eq!(
        persisted,
        CalculationSnapshot {
            pi_text: String::from("4.0"),
            status: CalculationStatus::Running,
            iteration: 1,
        }
    );

    send_action(&router, "pause").await;
    assert_eq!(store.read_record().unwrap().status, CalculationStatus::Paused);
}

#[tokio::test(start_paused = true)]
async fn test_restart_resumes_running_record() {
    let interval = Duration::from_millis(100);
    let store = Arc::new(MemorySnapshotStore::with_snapshot(CalculationSnapshot {
        pi_text: String::from("3.0418396189294032"),
        status: CalculationStatus::Running,
        iteration: 10,
    }));
    let router = make_router(store, interval).await;

    let json = get_status(&router).await;
    assert_eq!(json["status"], "running");
    assert_eq!(json["iteration"], 10);

    tokio::time::sleep(interval + interval / 2).await;
    let json = get_status(&router).await;
    assert_eq!(json["status"], "running");
    assert_eq!(json["iteration"], 11);
}

//! HTTP surface tests driven through the router with `oneshot`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use trellis_engine::api::{self, AppState};

use common::{service_harness, test_config};

async fn app() -> (Router, common::ServiceHarness) {
    let harness = service_harness(test_config()).await;
    let router = api::router(AppState {
        workflows: harness.workflows.clone(),
        executions: harness.executions.clone(),
        registry: Arc::clone(&harness.registry),
        stores: harness.stores.clone(),
        config: Arc::clone(&harness.config),
    });
    (router, harness)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).expect("request")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

fn register_body() -> Value {
    json!({
        "connectorId": "notify",
        "actions": [{
            "actionType": "notify.send",
            "connectorId": "notify",
            "displayName": "Send notification",
            "parameterSchema": {"type": "object"},
            "outputSchema": {}
        }]
    })
}

fn definition() -> Value {
    json!({
        "definition": {
            "id": "orders",
            "displayName": "Order flow",
            "startNode": "step",
            "nodes": [{"id": "step", "actionType": "notify.send", "parameters": {}}]
        }
    })
}

#[tokio::test]
async fn health_answers() {
    let (router, _harness) = app().await;
    let response = router.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn register_enforces_the_connector_prefix() {
    let (router, harness) = app().await;

    let bad = json!({
        "connectorId": "notify",
        "actions": [{
            "actionType": "other.send",
            "connectorId": "notify",
            "displayName": "Send"
        }]
    });
    let response = router.clone().oneshot(post("/api/v1/admin/actions/register", bad)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = router
        .clone()
        .oneshot(post("/api/v1/admin/actions/register", register_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["registered"], json!(1));

    // The register call refreshed the in-memory registry
    assert!(harness
        .registry
        .get_by_action_type("notify.send", false)
        .is_some());

    let response = router.oneshot(get("/api/v1/admin/actions")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn publish_failure_returns_the_report() {
    let (router, _harness) = app().await;

    // Draft references an action nobody registered
    let response = router
        .clone()
        .oneshot(post("/api/v1/workflows", definition()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(post("/api/v1/workflows/orders/publish", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], json!("validation failed"));
    assert!(body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e.as_str().unwrap().contains("notify.send")));
}

#[tokio::test]
async fn execute_accepts_and_exposes_status() {
    let (router, _harness) = app().await;

    router
        .clone()
        .oneshot(post("/api/v1/admin/actions/register", register_body()))
        .await
        .unwrap();
    router
        .clone()
        .oneshot(post("/api/v1/workflows", definition()))
        .await
        .unwrap();
    let response = router
        .clone()
        .oneshot(post("/api/v1/workflows/orders/publish", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let publish = body_json(response).await;
    assert_eq!(publish["version"], json!(1));

    let response = router
        .clone()
        .oneshot(post(
            "/api/v1/workflows/orders/execute",
            json!({"trigger": {"id": "t1"}, "requestId": "req-1"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted = body_json(response).await;
    let status_url = accepted["statusUrl"].as_str().unwrap().to_string();
    assert!(status_url.starts_with("/api/v1/executions/"));

    // The run is asynchronous; poll the status endpoint until terminal.
    // The harness executor answers every action with success.
    let mut last = Value::Null;
    for _ in 0..100 {
        let response = router.clone().oneshot(get(&status_url)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        last = body_json(response).await;
        let status = last["status"].as_str().unwrap_or_default().to_string();
        if status != "Pending" && status != "Running" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(last["status"], json!("Succeeded"));
    let attempts = last["attempts"].as_array().unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0]["nodeId"], json!("step"));
    assert_eq!(attempts[0]["status"], json!("Succeeded"));

    // Replaying the same request id returns the same execution
    let response = router
        .clone()
        .oneshot(post(
            "/api/v1/workflows/orders/execute",
            json!({"trigger": {"id": "t1"}, "requestId": "req-1"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let replay = body_json(response).await;
    assert_eq!(replay["executionId"], accepted["executionId"]);
}

#[tokio::test]
async fn executing_an_unpublished_draft_is_a_bad_request() {
    // ALLOW_DRAFT_EXECUTION defaults to off in the harness config
    let (router, _harness) = app().await;

    let response = router
        .clone()
        .oneshot(post("/api/v1/workflows", definition()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(post(
            "/api/v1/workflows/orders/execute?version=0",
            json!({"trigger": {}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("draft execution is disabled"));
}

#[tokio::test]
async fn unknown_resources_are_404() {
    let (router, _harness) = app().await;
    let response = router
        .clone()
        .oneshot(get("/api/v1/workflows/ghost"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router
        .oneshot(get(&format!(
            "/api/v1/executions/{}",
            uuid::Uuid::new_v4()
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn refresh_reports_the_cache_state() {
    let (router, _harness) = app().await;
    let response = router
        .oneshot(post("/api/v1/admin/actions/refresh", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["entries"], json!(0));
    assert!(body["lastRefreshedAt"].is_string());
}

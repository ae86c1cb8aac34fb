//! HTTP routes

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use shipyard::process::ScriptedResponse;
use shipyard::server::serve::router;
use shipyard::server::state::ServerState;
use shipyard::storage::Settings;

use crate::common::Harness;

fn app(harness: &Harness) -> axum::Router {
    let state = ServerState::new(Arc::new(harness.orchestrator.clone()));
    router(Arc::new(state))
}

fn post_json(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/deployments")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let harness = Harness::new(Settings::default());

    let response = app(&harness)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "shipyard");
}

#[tokio::test]
async fn test_modes_lists_registered_deployers() {
    let harness = Harness::new(Settings::default());

    let response = app(&harness)
        .oneshot(Request::builder().uri("/modes").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let body = json_body(response).await;
    assert_eq!(
        body["modes"],
        serde_json::json!(["cloud-hosted", "cloud-local", "local"])
    );
}

#[tokio::test]
async fn test_pending_feature_answers_ok() {
    let harness = Harness::new(Settings::default());

    let response = app(&harness)
        .oneshot(post_json(
            r#"{"repo_url": "https://github.com/acme/web", "deployment_mode": "cloud-hosted"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "pending_feature");
    assert_eq!(body["mode"], "cloud-hosted");
    assert!(body["deployment_id"].as_str().is_some_and(|id| !id.is_empty()));
}

#[tokio::test]
async fn test_error_result_answers_unprocessable() {
    let harness = Harness::new(Settings::default());

    let response = app(&harness)
        .oneshot(post_json(
            r#"{"repo_url": "https://github.com/acme/web", "deployment_mode": "cloud-local"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert_eq!(body["status"], "error");
    assert!(body["message"].as_str().unwrap().contains("Key Name"));
    assert!(body.get("outputs").is_none());
}

#[tokio::test]
async fn test_malformed_body_never_reaches_orchestrator() {
    let harness = Harness::new(Settings::default());

    let response = app(&harness).oneshot(post_json("{not json")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "invalid deployment request");
    assert!(harness.runner.calls().is_empty());
    assert_eq!(harness.workspace_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_request_lets_provisioning_finish() {
    let harness = Harness::new(Settings::default());
    harness.runner.on(
        "terraform",
        &["apply"],
        ScriptedResponse::ok("Apply complete!").after(Duration::from_secs(300)),
    );

    let request = post_json(
        r#"{"repo_url": "https://github.com/acme/web", "deployment_mode": "cloud-local", "key_name": "ops"}"#,
    );
    let abandoned =
        tokio::time::timeout(Duration::from_secs(60), app(&harness).oneshot(request)).await;
    assert!(abandoned.is_err());
    assert_eq!(harness.runner.count("terraform", &["output"]), 0);

    tokio::time::sleep(Duration::from_secs(600)).await;

    assert_eq!(harness.runner.count("terraform", &["apply"]), 1);
    assert_eq!(harness.runner.count("terraform", &["output", "-json"]), 1);
    assert_eq!(harness.runner.count("terraform", &["destroy"]), 0);
    assert_eq!(harness.workspace_count(), 0);
}

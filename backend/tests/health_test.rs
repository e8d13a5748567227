//! Integration tests for health check endpoints

mod common;

use axum::http::StatusCode;

#[tokio::test]
async fn test_health_endpoint() {
    let app = common::TestApp::new().await;

    let (status, body) = app.get_text("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("healthy"));
}

#[tokio::test]
async fn test_liveness_endpoint() {
    let app = common::TestApp::new().await;

    let (status, body) = app.get_text("/health/live").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("alive"));
}

#[tokio::test]
async fn test_readiness_reports_memory_store() {
    let app = common::TestApp::new().await;

    let (status, body) = app.get("/health/ready").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
    assert_eq!(body["checks"]["database"]["message"], "in-memory store");
    assert_eq!(body["checks"]["liveConnections"], 0);
}

#[tokio::test]
async fn test_api_v1_root() {
    let app = common::TestApp::new().await;

    let (status, body) = app.get_text("/api/v1/").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Fitcoach API v1"));
}

#[tokio::test]
async fn test_metrics_disabled_without_recorder() {
    let app = common::TestApp::new().await;

    let (status, _) = app.get_text("/metrics").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

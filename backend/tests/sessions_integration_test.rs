//! Integration tests for live session lifecycle

mod common;

use axum::http::StatusCode;
use common::TestApp;
use fitcoach_backend::repositories::SessionStore;
use serde_json::{json, Value};
use uuid::Uuid;

fn session_id(body: &Value) -> Uuid {
    body["sessionId"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn test_start_requires_identity() {
    let app = TestApp::new().await;

    let (status, body) = app
        .post_as(None, "/api/v1/sessions/start", json!({ "deviceId": "bike-1" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_start_rejects_empty_device() {
    let app = TestApp::new().await;

    let (status, body) = app
        .post("/api/v1/sessions/start", json!({ "deviceId": "" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_second_start_returns_existing_session() {
    let app = TestApp::new().await;

    let (status, started) = app
        .post("/api/v1/sessions/start", json!({ "deviceId": "bike-1" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = session_id(&started);

    let (status, body) = app
        .post("/api/v1/sessions/start", json!({ "deviceId": "bike-2" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "SESSION_ACTIVE");
    assert_eq!(body["error"]["details"]["existingSessionId"], id.to_string());
}

#[tokio::test]
async fn test_session_lifecycle() {
    let app = TestApp::new().await;

    let (_, started) = app
        .post("/api/v1/sessions/start", json!({ "deviceId": "bike-1" }))
        .await;
    let id = session_id(&started);
    assert_eq!(started["goalId"], app.goal_id.to_string());

    for elapsed in [60, 120, 180] {
        let (status, ack) = app
            .post_as(
                None,
                "/api/v1/telemetry",
                json!({
                    "deviceId": "bike-1",
                    "metrics": { "speed": 24.0, "distance": elapsed * 7, "elapsedTime": elapsed, "power": 150 }
                }),
            )
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(ack["sessionActive"], true);
        assert_eq!(ack["sessionId"], id.to_string());
    }

    let (status, live) = app.get(&format!("/api/v1/sessions/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(live["status"], "active");
    assert_eq!(live["aggregates"]["sampleCount"], 3);
    assert_eq!(live["aggregates"]["duration"], 180.0);
    assert_eq!(live["aggregates"]["totalDistance"], 1260.0);

    let (status, first) = app
        .post(
            &format!("/api/v1/sessions/{}/end", id),
            json!({ "finalMetrics": { "speed": 0, "distance": 1300, "elapsedTime": 200, "power": 0 } }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["status"], "completed");
    assert_eq!(first["aggregates"]["duration"], 200.0);
    assert_eq!(first["aggregates"]["totalDistance"], 1300.0);
    // 150 W for 180 s
    assert_eq!(first["aggregates"]["totalCalories"], 27.0);

    let (status, second) = app
        .post(&format!("/api/v1/sessions/{}/end", id), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second, first);
    assert_eq!(app.store.history_count(id).await.unwrap(), 1);

    // Samples after the end are stored but no longer attributed
    let (_, ack) = app
        .post_as(
            None,
            "/api/v1/telemetry",
            json!({ "deviceId": "bike-1", "metrics": { "elapsedTime": 240 } }),
        )
        .await;
    assert_eq!(ack["sessionActive"], false);
}

#[tokio::test]
async fn test_session_is_private_to_owner() {
    let app = TestApp::new().await;
    let (_, started) = app
        .post("/api/v1/sessions/start", json!({ "deviceId": "bike-1" }))
        .await;
    let id = session_id(&started);

    let (status, _) = app
        .post_as(Some(Uuid::new_v4()), &format!("/api/v1/sessions/{}/end", id), json!({}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.get(&format!("/api/v1/sessions/{}", Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_live_session_completes_todays_scheduled_day() {
    let app = TestApp::new().await;
    let (_, schedule) = app.post("/api/v1/plans", json!({ "goalId": app.goal_id })).await;
    let plan_id = schedule["id"].as_str().unwrap().to_string();

    let (_, started) = app
        .post("/api/v1/sessions/start", json!({ "deviceId": "bike-1" }))
        .await;
    assert_eq!(started["planId"], plan_id);
    assert_eq!(started["linkedDate"], "2024-05-01");

    // 77/560 h is 495 s
    let (_, ack) = app
        .post_as(
            None,
            "/api/v1/telemetry",
            json!({ "deviceId": "bike-1", "metrics": { "elapsedTime": 600 } }),
        )
        .await;
    assert_eq!(ack["sessionActive"], true);

    let (_, schedule) = app.get(&format!("/api/v1/plans/{}", plan_id)).await;
    assert_eq!(schedule["days"][0]["status"], "completed");
    assert_eq!(schedule["days"][0]["liveContributions"][0]["sessionId"], started["sessionId"]);
    assert_eq!(schedule["days"][1]["status"], "pending");
}

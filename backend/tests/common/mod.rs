//! Common test utilities for integration tests
//!
//! The app runs against the in-memory store with a manual clock, so no
//! external services are needed.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::NaiveDate;
use fitcoach_backend::{
    clock::ManualClock,
    config::{AppConfig, StorageBackend},
    identity::USER_ID_HEADER,
    repositories::{MemoryStore, Storage},
    routes,
    services::{LocalBackplane, Services},
    state::AppState,
};
use fitcoach_shared::{ActivityLevel, BiologicalSex, Goal, GoalType, Profile};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

/// Test application wrapper
pub struct TestApp {
    pub app: Router,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub services: Services,
    pub user_id: Uuid,
    pub goal_id: Uuid,
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

impl TestApp {
    /// App on 2024-05-01 with one user: 70 kg, 175 cm, born 1994, losing 1 kg by 2024-08-08
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::at_date(date(2024, 5, 1)));
        let services = Services::init(
            Storage::memory(store.clone()),
            clock.clone(),
            Arc::new(LocalBackplane),
            &config,
        );

        let user_id = Uuid::new_v4();
        let goal_id = Uuid::new_v4();
        store
            .put_profile(
                user_id,
                Profile {
                    weight_kg: 70.0,
                    height_cm: 175.0,
                    birth_date: date(1994, 1, 1),
                    sex: BiologicalSex::Male,
                    activity_level: ActivityLevel::Moderate,
                },
            )
            .await;
        store
            .put_goal(Goal {
                id: goal_id,
                user_id,
                current_weight_kg: 71.0,
                target_weight_kg: 70.0,
                goal_type: GoalType::Lose,
                target_date: date(2024, 8, 8),
            })
            .await;

        let state = AppState::new(services.clone(), config);
        let app = routes::create_router(state);

        Self {
            app,
            store,
            clock,
            services,
            user_id,
            goal_id,
        }
    }

    /// Add a weight-gain goal for the seeded user; plans for it train 0.5 h/day
    pub async fn add_gain_goal(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.store
            .put_goal(Goal {
                id,
                user_id: self.user_id,
                current_weight_kg: 70.0,
                target_weight_kg: 72.0,
                goal_type: GoalType::Gain,
                target_date: date(2024, 8, 8),
            })
            .await;
        id
    }

    /// GET as the seeded user
    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        self.send("GET", path, None, Some(self.user_id)).await
    }

    /// POST a JSON body as the seeded user
    pub async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.send("POST", path, Some(body), Some(self.user_id)).await
    }

    pub async fn post_as(&self, user_id: Option<Uuid>, path: &str, body: Value) -> (StatusCode, Value) {
        self.send("POST", path, Some(body), user_id).await
    }

    /// Raw GET without identity, returning the body as text
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn send(&self, method: &str, path: &str, body: Option<Value>, user_id: Option<Uuid>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(user_id) = user_id {
            builder = builder.header(USER_ID_HEADER, user_id.to_string());
        }
        let request = match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, value)
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.server.port = 0;
    config.storage.backend = StorageBackend::Memory;
    config
}

//! Application error handling
//!
//! This module provides unified error handling for the API,
//! converting domain and storage errors to appropriate HTTP responses.

use crate::repositories::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fitcoach_shared::validation::describe_errors;
use fitcoach_shared::{ErrorDetail, ErrorResponse, PlanError, ScheduleError, TelemetryError};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

/// API error type that can be converted to HTTP responses
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("User already has an active session {0}")]
    ActiveSession(Uuid),

    #[error("Safety limit exceeded: {daily_hours:.2} h/day")]
    SafetyLimit {
        daily_hours: f64,
        max_daily_hours: f64,
        suggestion: String,
    },

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("Database error")]
    Database(#[from] sqlx::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone(), None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone(), None),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone(), None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone(), None),
            ApiError::ActiveSession(existing) => (
                StatusCode::CONFLICT,
                "SESSION_ACTIVE",
                "User already has an active session".to_string(),
                Some(json!({ "existingSessionId": existing })),
            ),
            ApiError::SafetyLimit {
                daily_hours,
                max_daily_hours,
                suggestion,
            } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "SAFETY_LIMIT",
                format!(
                    "Plan requires {:.2} h/day which exceeds the safe maximum of {:.2} h/day",
                    daily_hours, max_daily_hours
                ),
                Some(json!({
                    "dailyHours": daily_hours,
                    "maxDailyHours": max_daily_hours,
                    "suggestion": suggestion,
                })),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone(), None),
            ApiError::Internal(err) => {
                error!("Internal error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            ApiError::Database(err) => {
                error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                    None,
                )
            }
        };

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details,
            },
        });

        (status, body).into_response()
    }
}

impl From<PlanError> for ApiError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::Validation(msg) => ApiError::Validation(msg),
            PlanError::SafetyLimit {
                daily_hours,
                max_daily_hours,
                suggestion,
            } => ApiError::SafetyLimit {
                daily_hours,
                max_daily_hours,
                suggestion,
            },
        }
    }
}

impl From<ScheduleError> for ApiError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::DayNotFound(_) | ScheduleError::DateNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            ScheduleError::Inactive => ApiError::Conflict(err.to_string()),
            ScheduleError::Validation(msg) => ApiError::Validation(msg),
            ScheduleError::InvalidTransition { .. }
            | ScheduleError::NothingToCatchUp
            | ScheduleError::NoCapacity => {
                ApiError::Validation(err.to_string())
            }
        }
    }
}

impl From<TelemetryError> for ApiError {
    fn from(err: TelemetryError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(e) => ApiError::Database(e),
            StoreError::Serialization(e) => ApiError::Internal(e.into()),
            StoreError::VersionConflict => {
                ApiError::Conflict("Schedule was modified concurrently, retry the request".to_string())
            }
            StoreError::ActiveSessionExists { existing } => ApiError::ActiveSession(existing),
            StoreError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            StoreError::InvalidRecord(msg) => ApiError::Validation(msg),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::Validation(describe_errors(&errors))
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_validation_error_status() {
        let error = ApiError::Validation("Invalid input".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_not_found_error_status() {
        let error = ApiError::from(ScheduleError::DayNotFound(4));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_active_session_conflict_carries_existing_id() {
        let existing = Uuid::new_v4();
        let response = ApiError::from(StoreError::ActiveSessionExists { existing }).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "SESSION_ACTIVE");
        assert_eq!(body["error"]["details"]["existingSessionId"], existing.to_string());
    }

    #[tokio::test]
    async fn test_safety_limit_is_unprocessable() {
        let response = ApiError::from(PlanError::SafetyLimit {
            daily_hours: 5.0,
            max_daily_hours: 3.5,
            suggestion: "Extend the plan".to_string(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = body_json(response).await;
        assert_eq!(body["error"]["details"]["dailyHours"], 5.0);
        assert_eq!(body["error"]["details"]["suggestion"], "Extend the plan");
    }

    #[test]
    fn test_internal_errors_are_masked() {
        let response = ApiError::Internal(anyhow::anyhow!("secret detail")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

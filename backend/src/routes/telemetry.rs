//! Telemetry ingest route

use crate::error::ApiError;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use fitcoach_shared::TelemetryAccepted;
use serde_json::Value;

pub fn telemetry_routes() -> Router<AppState> {
    Router::new().route("/", post(ingest_sample))
}

/// POST /api/v1/telemetry - Accept one device sample
///
/// The body is taken as loose JSON; anything but a missing device id or
/// metrics object is normalized rather than rejected.
async fn ingest_sample(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Result<(StatusCode, Json<TelemetryAccepted>), ApiError> {
    let accepted = state.services.telemetry.ingest(&raw).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

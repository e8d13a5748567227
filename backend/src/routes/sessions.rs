//! Live session API routes

use crate::error::ApiError;
use crate::identity::Caller;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use fitcoach_shared::{EndSessionRequest, LiveSession, StartSessionRequest, StartSessionResponse};
use uuid::Uuid;

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/start", post(start_session))
        .route("/:id", get(get_session))
        .route("/:id/end", post(end_session))
}

/// POST /api/v1/sessions/start - Open a live session on a device
///
/// 409 with the existing session id when the caller already has one running.
async fn start_session(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<StartSessionRequest>,
) -> Result<(StatusCode, Json<StartSessionResponse>), ApiError> {
    let started = state.services.sessions.start(caller.user_id, req).await?;
    Ok((StatusCode::CREATED, Json(started)))
}

async fn get_session(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<LiveSession>, ApiError> {
    Ok(Json(state.services.sessions.get(caller.user_id, id).await?))
}

/// POST /api/v1/sessions/:id/end - Finalize a session
///
/// The body is optional. Repeating the call returns the same summary.
async fn end_session(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    body: Option<Json<EndSessionRequest>>,
) -> Result<Json<LiveSession>, ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    Ok(Json(state.services.sessions.end(caller.user_id, id, req).await?))
}

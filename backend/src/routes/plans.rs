//! Training plan API routes

use crate::error::ApiError;
use crate::identity::Caller;
use crate::services::plans::ReconcileOutcome;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use fitcoach_shared::{
    AdjustmentResponse, CreatePlanRequest, DayProgress, LogSessionRequest, PlanPreview,
    PlanPreviewRequest, RescheduleRequest, RedistributeRequest, Schedule,
};
use uuid::Uuid;
use validator::Validate;

pub fn plan_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_plan))
        .route("/calculate", post(calculate_plan))
        .route("/active", get(get_active_plan))
        .route("/:id", get(get_plan))
        .route("/:id/reconcile", post(reconcile_plan))
        .route("/:id/emergency-catch-up", post(emergency_catch_up))
        .route("/:id/days/:index/log", post(log_session))
        .route("/:id/days/:index/reschedule", post(reschedule_day))
        .route("/:id/days/:index/redistribute", post(redistribute_day))
}

/// POST /api/v1/plans/calculate - Preview a plan without saving it
///
/// Fails with 422 when the plan would need more daily exercise than the
/// configured safety ceiling.
async fn calculate_plan(
    State(state): State<AppState>,
    Json(req): Json<PlanPreviewRequest>,
) -> Result<Json<PlanPreview>, ApiError> {
    let preview = state.services.plans.preview(&req)?;
    Ok(Json(preview))
}

/// POST /api/v1/plans - Generate and store a schedule for a goal
///
/// The new schedule becomes the caller's active one.
async fn create_plan(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<CreatePlanRequest>,
) -> Result<(StatusCode, Json<Schedule>), ApiError> {
    let schedule = state.services.plans.create(caller.user_id, req).await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

async fn get_active_plan(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Schedule>, ApiError> {
    Ok(Json(state.services.plans.active(caller.user_id).await?))
}

async fn get_plan(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<Schedule>, ApiError> {
    Ok(Json(state.services.plans.get(caller.user_id, id).await?))
}

/// POST /api/v1/plans/:id/reconcile - Mark past pending days missed now
///
/// The background ticker does the same periodically.
async fn reconcile_plan(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<ReconcileOutcome>, ApiError> {
    Ok(Json(state.services.plans.reconcile(Some(caller.user_id), id).await?))
}

async fn emergency_catch_up(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<AdjustmentResponse>, ApiError> {
    Ok(Json(state.services.plans.emergency_catch_up(caller.user_id, id).await?))
}

/// POST /api/v1/plans/:id/days/:index/log - Record completed exercise
async fn log_session(
    State(state): State<AppState>,
    caller: Caller,
    Path((id, index)): Path<(Uuid, usize)>,
    Json(req): Json<LogSessionRequest>,
) -> Result<Json<DayProgress>, ApiError> {
    req.validate()?;
    let progress = state
        .services
        .plans
        .log_session(caller.user_id, id, index, req.hours_completed)
        .await?;
    Ok(Json(progress))
}

/// POST /api/v1/plans/:id/days/:index/reschedule - Move a missed day's hours to a date
async fn reschedule_day(
    State(state): State<AppState>,
    caller: Caller,
    Path((id, index)): Path<(Uuid, usize)>,
    Json(req): Json<RescheduleRequest>,
) -> Result<Json<AdjustmentResponse>, ApiError> {
    let response = state
        .services
        .plans
        .reschedule(caller.user_id, id, index, req)
        .await?;
    Ok(Json(response))
}

/// POST /api/v1/plans/:id/days/:index/redistribute - Spread a missed day's hours
///
/// Targets are either the next `count` pending days or explicit `dates`.
async fn redistribute_day(
    State(state): State<AppState>,
    caller: Caller,
    Path((id, index)): Path<(Uuid, usize)>,
    Json(req): Json<RedistributeRequest>,
) -> Result<Json<AdjustmentResponse>, ApiError> {
    let response = state
        .services
        .plans
        .redistribute(caller.user_id, id, index, req)
        .await?;
    Ok(Json(response))
}

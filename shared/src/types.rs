//! API request and response types

use crate::adjuster::{Allocation, RedistributeTargets};
use crate::errors::PlanError;
use crate::health_metrics::{ActivityLevel, BiologicalSex, Intensity};
use crate::models::{GoalType, Profile, SampleMetrics, Schedule};
use crate::planner::{GeneratedPlan, PlanRecommendation, PlanRequest};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Error detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

// ============================================================================
// Plan Types
// ============================================================================

/// Stateless plan preview input; also used by the browser bindings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PlanPreviewRequest {
    pub weight_kg: f64,
    pub height_cm: f64,
    pub birth_date: NaiveDate,
    #[validate(length(min = 1))]
    pub sex: String,
    #[validate(length(min = 1))]
    pub activity_level: String,
    /// Defaults to `weight_kg`
    #[serde(default)]
    pub current_weight_kg: Option<f64>,
    pub target_weight_kg: f64,
    /// Inferred from the weights when absent
    #[serde(default)]
    pub goal_type: Option<String>,
    #[validate(range(min = 1, max = 730))]
    pub duration_days: i64,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub intensity: Option<String>,
}

impl PlanPreviewRequest {
    /// Resolve the loosely-typed preview input into a planner request
    pub fn to_plan_request(&self, today: NaiveDate, default_intensity: Intensity) -> Result<PlanRequest, PlanError> {
        let sex: BiologicalSex = self.sex.parse().map_err(PlanError::Validation)?;
        let activity_level: ActivityLevel = self.activity_level.parse().map_err(PlanError::Validation)?;
        let intensity = match &self.intensity {
            Some(raw) => raw.parse().map_err(PlanError::Validation)?,
            None => default_intensity,
        };
        let current = self.current_weight_kg.unwrap_or(self.weight_kg);
        let goal_type = match &self.goal_type {
            Some(raw) => raw.parse().map_err(PlanError::Validation)?,
            None => infer_goal_type(current, self.target_weight_kg),
        };

        Ok(PlanRequest {
            profile: Profile {
                weight_kg: self.weight_kg,
                height_cm: self.height_cm,
                birth_date: self.birth_date,
                sex,
                activity_level,
            },
            current_weight_kg: current,
            target_weight_kg: self.target_weight_kg,
            goal_type,
            duration_days: self.duration_days,
            start_date: self.start_date.unwrap_or(today),
            intensity,
        })
    }
}

pub fn infer_goal_type(current_weight_kg: f64, target_weight_kg: f64) -> GoalType {
    if target_weight_kg < current_weight_kg {
        GoalType::Lose
    } else if target_weight_kg > current_weight_kg {
        GoalType::Gain
    } else {
        GoalType::Maintain
    }
}

/// Plan summary without the per-day breakdown
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanPreview {
    pub bmr: f64,
    pub tdee: f64,
    pub age_years: i32,
    pub caloric_delta: f64,
    pub daily_hours: f64,
    pub intensity: Intensity,
    pub recommendation: PlanRecommendation,
    pub duration_days: usize,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl From<&GeneratedPlan> for PlanPreview {
    fn from(plan: &GeneratedPlan) -> Self {
        Self {
            bmr: plan.bmr,
            tdee: plan.tdee,
            age_years: plan.age_years,
            caloric_delta: plan.caloric_delta,
            daily_hours: plan.daily_hours,
            intensity: plan.intensity,
            recommendation: plan.recommendation,
            duration_days: plan.days.len(),
            start_date: plan.days.first().map(|d| d.date),
            end_date: plan.days.last().map(|d| d.date),
        }
    }
}

/// Create a schedule for one of the caller's goals
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlanRequest {
    pub goal_id: Uuid,
    /// Defaults to the days remaining until the goal's target date
    #[validate(range(min = 1, max = 730))]
    #[serde(default)]
    pub duration_days: Option<i64>,
    #[serde(default)]
    pub intensity: Option<Intensity>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LogSessionRequest {
    #[validate(range(min = 0.0, max = 24.0))]
    pub hours_completed: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleRequest {
    pub new_date: NaiveDate,
    #[validate(length(max = 500))]
    #[serde(default)]
    pub reason: Option<String>,
}

/// Either `count` or `dates` must be given, not both
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RedistributeRequest {
    #[validate(range(min = 1, max = 60))]
    #[serde(default)]
    pub count: Option<usize>,
    #[validate(length(min = 1, max = 60))]
    #[serde(default)]
    pub dates: Option<Vec<NaiveDate>>,
    #[validate(length(max = 500))]
    #[serde(default)]
    pub reason: Option<String>,
}

impl RedistributeRequest {
    pub fn targets(&self) -> Result<RedistributeTargets, String> {
        match (&self.count, &self.dates) {
            (Some(count), None) => Ok(RedistributeTargets::Count(*count)),
            (None, Some(dates)) => Ok(RedistributeTargets::Dates(dates.clone())),
            (Some(_), Some(_)) => Err("Provide either count or dates, not both".to_string()),
            (None, None) => Err("Provide a session count or a list of dates".to_string()),
        }
    }
}

/// Schedule after a user adjustment, with where the hours went
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustmentResponse {
    pub allocation: Allocation,
    pub schedule: Schedule,
}

// ============================================================================
// Session Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    #[validate(length(min = 1, max = 128))]
    pub device_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
    pub session_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionRequest {
    #[serde(default)]
    pub final_metrics: Option<SampleMetrics>,
    #[serde(default)]
    pub battery: Option<f64>,
}

// ============================================================================
// Telemetry and Live Types
// ============================================================================

/// Acknowledgement returned for every accepted sample
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryAccepted {
    pub accepted: bool,
    pub session_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
}

/// Messages a live observer sends over the WebSocket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveClientMessage {
    #[serde(rename_all = "camelCase")]
    Subscribe {
        #[serde(default)]
        device_id: Option<String>,
        #[serde(default)]
        user_id: Option<Uuid>,
        #[serde(default)]
        session_id: Option<Uuid>,
    },
    #[serde(rename_all = "camelCase")]
    Unsubscribe {
        #[serde(default)]
        device_id: Option<String>,
        #[serde(default)]
        user_id: Option<Uuid>,
    },
}

/// Messages pushed to live observers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveServerMessage {
    #[serde(rename_all = "camelCase")]
    TelemetryUpdate {
        device_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<Uuid>,
        metrics: SampleMetrics,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        battery: Option<f64>,
        timestamp: DateTime<Utc>,
    },
    Subscribed {
        key: String,
    },
    Unsubscribed {
        key: String,
    },
    Error {
        message: String,
    },
}

/// Number of days from `start` up to and including `target`, if positive
pub fn days_until(start: NaiveDate, target: NaiveDate) -> Option<i64> {
    let days = (target - start).num_days() + 1;
    (days > 0).then_some(days)
}

//! Training plan generation
//!
//! Turns a profile and a weight goal into an evenly distributed daily
//! schedule:
//!
//! 1. BMR via Mifflin-St Jeor, TDEE via the activity multiplier
//! 2. Caloric delta = (current - target) × 7700 kcal/kg
//! 3. Daily calorie target = delta / days
//! 4. Daily hours = daily target / (MET × weight)
//!
//! Plans above the configured daily ceiling are rejected, never clamped.
//! Weight-gain and maintenance goals skip the hour calculation and get a
//! fixed low-intensity schedule with an intake recommendation instead.

use crate::errors::PlanError;
use crate::health_metrics::{
    age_on, calculate_bmr_mifflin, calculate_tdee, calories_per_hour, Intensity, KCAL_PER_KG,
};
use crate::models::{DaySession, Engagement, GoalType, Profile, Schedule};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest plan accepted, in days
pub const MAX_PLAN_DAYS: i64 = 730;

/// Limits applied while generating plans
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannerConfig {
    /// Safety ceiling on daily training hours
    pub max_daily_hours: f64,
    /// Fixed daily hours for gain and maintenance plans
    pub low_intensity_hours: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_daily_hours: 3.5,
            low_intensity_hours: 0.5,
        }
    }
}

/// Everything needed to compute a plan
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub profile: Profile,
    pub current_weight_kg: f64,
    pub target_weight_kg: f64,
    pub goal_type: GoalType,
    pub duration_days: i64,
    pub start_date: NaiveDate,
    pub intensity: Intensity,
}

/// What the plan asks of the user besides training hours
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PlanRecommendation {
    /// Burn a daily calorie target through exercise
    #[serde(rename_all = "camelCase")]
    Burn {
        daily_calorie_target: f64,
        calories_per_hour: f64,
    },
    /// Eat above TDEE; training stays at a fixed low intensity
    #[serde(rename_all = "camelCase")]
    Surplus {
        daily_surplus_kcal: f64,
        daily_intake_kcal: f64,
    },
    /// Hold weight; training stays at a fixed low intensity
    #[serde(rename_all = "camelCase")]
    Maintain { daily_intake_kcal: f64 },
}

/// Result of plan generation, before persistence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedPlan {
    pub bmr: f64,
    pub tdee: f64,
    pub age_years: i32,
    pub caloric_delta: f64,
    pub daily_hours: f64,
    pub intensity: Intensity,
    pub recommendation: PlanRecommendation,
    pub days: Vec<DaySession>,
}

impl GeneratedPlan {
    /// Build the persisted schedule for this plan
    pub fn into_schedule(self, user_id: Uuid, goal_id: Uuid, now: DateTime<Utc>) -> Schedule {
        Schedule {
            id: Uuid::new_v4(),
            user_id,
            goal_id,
            intensity: self.intensity,
            daily_hours: self.daily_hours,
            recommendation: self.recommendation,
            days: self.days,
            missed_count: 0,
            total_missed_hours: 0.0,
            emergency_catch_up: false,
            is_active: true,
            unredistributed: Vec::new(),
            engagement: Engagement::default(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

fn validate_request(request: &PlanRequest) -> Result<i32, PlanError> {
    let profile = &request.profile;
    let positive = |value: f64, field: &str| {
        if value.is_finite() && value > 0.0 {
            Ok(())
        } else {
            Err(PlanError::Validation(format!("{} must be a positive number", field)))
        }
    };
    positive(profile.weight_kg, "Weight")?;
    positive(profile.height_cm, "Height")?;
    positive(request.current_weight_kg, "Current weight")?;
    positive(request.target_weight_kg, "Target weight")?;

    if request.duration_days <= 0 {
        return Err(PlanError::Validation(
            "Plan duration must be at least one day".to_string(),
        ));
    }
    if request.duration_days > MAX_PLAN_DAYS {
        return Err(PlanError::Validation(format!(
            "Plan duration cannot exceed {} days",
            MAX_PLAN_DAYS
        )));
    }

    let age = age_on(profile.birth_date, request.start_date).ok_or_else(|| {
        PlanError::Validation("Birth date cannot be after the plan start date".to_string())
    })?;

    match request.goal_type {
        GoalType::Lose if request.target_weight_kg > request.current_weight_kg => {
            Err(PlanError::Validation(
                "Target weight must not exceed current weight for a weight-loss goal".to_string(),
            ))
        }
        GoalType::Gain if request.target_weight_kg < request.current_weight_kg => {
            Err(PlanError::Validation(
                "Target weight must not be below current weight for a weight-gain goal"
                    .to_string(),
            ))
        }
        _ => Ok(age),
    }
}

/// Generate an evenly distributed daily plan
pub fn generate_plan(request: &PlanRequest, config: &PlannerConfig) -> Result<GeneratedPlan, PlanError> {
    let age_years = validate_request(request)?;
    let profile = &request.profile;

    let bmr = calculate_bmr_mifflin(profile.weight_kg, profile.height_cm, age_years, profile.sex);
    let tdee = calculate_tdee(bmr, profile.activity_level);
    let caloric_delta = (request.current_weight_kg - request.target_weight_kg) * KCAL_PER_KG;
    let days = request.duration_days as f64;

    let (daily_hours, recommendation) = if request.goal_type == GoalType::Maintain
        || caloric_delta == 0.0
    {
        (
            config.low_intensity_hours,
            PlanRecommendation::Maintain {
                daily_intake_kcal: tdee,
            },
        )
    } else if caloric_delta < 0.0 {
        let daily_surplus_kcal = -caloric_delta / days;
        (
            config.low_intensity_hours,
            PlanRecommendation::Surplus {
                daily_surplus_kcal,
                daily_intake_kcal: tdee + daily_surplus_kcal,
            },
        )
    } else {
        let per_hour = calories_per_hour(request.intensity, profile.weight_kg);
        let daily_calorie_target = caloric_delta / days;
        let daily_hours = daily_calorie_target / per_hour;

        if daily_hours > config.max_daily_hours {
            let safe_days = (caloric_delta / (config.max_daily_hours * per_hour)).ceil() as i64;
            return Err(PlanError::SafetyLimit {
                daily_hours,
                max_daily_hours: config.max_daily_hours,
                suggestion: format!(
                    "Extend the plan to at least {} days or choose a less aggressive target weight",
                    safe_days
                ),
            });
        }

        (
            daily_hours,
            PlanRecommendation::Burn {
                daily_calorie_target,
                calories_per_hour: per_hour,
            },
        )
    };

    let days = (0..request.duration_days)
        .map(|offset| {
            DaySession::new(
                offset as usize,
                request.start_date + Duration::days(offset),
                daily_hours,
            )
        })
        .collect();

    Ok(GeneratedPlan {
        bmr,
        tdee,
        age_years,
        caloric_delta,
        daily_hours,
        intensity: request.intensity,
        recommendation,
        days,
    })
}

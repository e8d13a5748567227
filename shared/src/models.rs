//! Domain models for schedules, live sessions and telemetry

use crate::health_metrics::{ActivityLevel, BiologicalSex, Intensity};
use crate::planner::PlanRecommendation;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Hours are compared with this tolerance to absorb float rounding from even splits
pub const HOURS_EPSILON: f64 = 1e-9;

// ============================================================================
// Profile and Goal
// ============================================================================

/// Physiological inputs for plan generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub weight_kg: f64,
    pub height_cm: f64,
    pub birth_date: NaiveDate,
    pub sex: BiologicalSex,
    pub activity_level: ActivityLevel,
}

/// Goal type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GoalType {
    Lose,
    Maintain,
    Gain,
}

impl FromStr for GoalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lose" | "weight_loss" => Ok(GoalType::Lose),
            "maintain" | "maintenance" => Ok(GoalType::Maintain),
            "gain" | "weight_gain" => Ok(GoalType::Gain),
            other => Err(format!(
                "Invalid goal type '{}'. Must be one of: lose, maintain, gain",
                other
            )),
        }
    }
}

/// Weight goal driving a schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub current_weight_kg: f64,
    pub target_weight_kg: f64,
    pub goal_type: GoalType,
    pub target_date: NaiveDate,
}

// ============================================================================
// Schedule
// ============================================================================

/// Status of a scheduled day
///
/// `pending → completed`, or `pending → missed → {rescheduled | redistributed | catchup}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Completed,
    Missed,
    Rescheduled,
    Redistributed,
    Catchup,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Completed => "completed",
            SessionStatus::Missed => "missed",
            SessionStatus::Rescheduled => "rescheduled",
            SessionStatus::Redistributed => "redistributed",
            SessionStatus::Catchup => "catchup",
        }
    }

    /// Missed sessions whose hours have been fully handed off elsewhere
    pub fn is_resolved_miss(&self) -> bool {
        matches!(
            self,
            SessionStatus::Rescheduled | SessionStatus::Redistributed | SessionStatus::Catchup
        )
    }

    /// Whether the session was ever marked missed
    pub fn was_missed(&self) -> bool {
        *self == SessionStatus::Missed || self.is_resolved_miss()
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of entry in a day's action history
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Missed,
    AutoRedistribute,
    Reschedule,
    Redistribute,
    CatchUp,
    Received,
    Completed,
}

/// One entry in a day's action history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub action: ActionKind,
    pub original_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours_redistributed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Progress credited to a day by one live session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveContribution {
    pub session_id: Uuid,
    pub hours: f64,
    pub calories: f64,
}

/// One scheduled day within a training schedule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DaySession {
    pub index: usize,
    pub date: NaiveDate,
    pub planned_hours: f64,
    /// Additional hours pushed in from missed days
    pub adjusted_hours: f64,
    /// Hours reported through manual logging
    #[serde(default)]
    pub logged_hours: f64,
    pub completed_hours: f64,
    pub calories_burned: f64,
    pub status: SessionStatus,
    #[serde(default)]
    pub is_rescheduled: bool,
    #[serde(default)]
    pub is_redistributed: bool,
    #[serde(default)]
    pub live_contributions: Vec<LiveContribution>,
    #[serde(default)]
    pub action_history: Vec<ActionRecord>,
}

impl DaySession {
    pub fn new(index: usize, date: NaiveDate, planned_hours: f64) -> Self {
        Self {
            index,
            date,
            planned_hours,
            adjusted_hours: 0.0,
            logged_hours: 0.0,
            completed_hours: 0.0,
            calories_burned: 0.0,
            status: SessionStatus::Pending,
            is_rescheduled: false,
            is_redistributed: false,
            live_contributions: Vec::new(),
            action_history: Vec::new(),
        }
    }

    /// Hours the user must complete on this day
    pub fn required_hours(&self) -> f64 {
        self.planned_hours + self.adjusted_hours
    }

    pub fn is_pending(&self) -> bool {
        self.status == SessionStatus::Pending
    }

    /// Hours that can still be added before hitting the daily ceiling
    pub fn capacity(&self, max_daily_hours: f64) -> f64 {
        (max_daily_hours - self.required_hours()).max(0.0)
    }

    /// Re-derive completed hours and calories from manual logs and live sessions.
    /// Never lowers the previously recorded values.
    pub fn recompute_progress(&mut self) {
        let live_hours: f64 = self.live_contributions.iter().map(|c| c.hours).sum();
        let live_calories: f64 = self.live_contributions.iter().map(|c| c.calories).sum();
        self.completed_hours = self.completed_hours.max(self.logged_hours + live_hours);
        self.calories_burned = self.calories_burned.max(live_calories);
    }

    pub fn meets_requirement(&self) -> bool {
        self.completed_hours + HOURS_EPSILON >= self.required_hours()
    }
}

/// Hours from a missed day that could not be placed on any other day
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Remainder {
    pub source_index: usize,
    pub source_date: NaiveDate,
    pub hours: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Motivational counters fed by user-initiated recovery actions
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Engagement {
    pub streak: u32,
    pub best_streak: u32,
    pub actions_taken: u32,
}

impl Engagement {
    pub fn record_action(&mut self) {
        self.streak += 1;
        self.actions_taken += 1;
        self.best_streak = self.best_streak.max(self.streak);
    }

    pub fn record_skip(&mut self) {
        self.streak = 0;
    }
}

/// A user's multi-day training schedule for one goal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: Uuid,
    pub user_id: Uuid,
    pub goal_id: Uuid,
    pub intensity: Intensity,
    pub daily_hours: f64,
    pub recommendation: PlanRecommendation,
    pub days: Vec<DaySession>,
    pub missed_count: u32,
    pub total_missed_hours: f64,
    pub emergency_catch_up: bool,
    pub is_active: bool,
    #[serde(default)]
    pub unredistributed: Vec<Remainder>,
    #[serde(default)]
    pub engagement: Engagement,
    /// Optimistic concurrency counter, bumped by every successful save
    #[serde(default)]
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    pub fn day(&self, index: usize) -> Option<&DaySession> {
        self.days.get(index)
    }

    pub fn day_on(&self, date: NaiveDate) -> Option<&DaySession> {
        self.days.iter().find(|d| d.date == date)
    }

    /// Outstanding hours of a missed day that have not been placed anywhere
    pub fn remainder_for(&self, index: usize) -> f64 {
        self.unredistributed
            .iter()
            .filter(|r| r.source_index == index)
            .map(|r| r.hours)
            .sum()
    }

    pub fn total_unredistributed(&self) -> f64 {
        self.unredistributed.iter().map(|r| r.hours).sum()
    }

    pub fn total_adjusted(&self) -> f64 {
        self.days.iter().map(|d| d.adjusted_hours).sum()
    }

    /// Days still waiting for a user action or catch-up
    pub fn missed_days(&self) -> impl Iterator<Item = &DaySession> {
        self.days.iter().filter(|d| d.status == SessionStatus::Missed)
    }
}

// ============================================================================
// Live sessions and telemetry
// ============================================================================

/// Lifecycle state of a live session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LiveSessionStatus {
    Active,
    Completed,
}

impl LiveSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LiveSessionStatus::Active => "active",
            LiveSessionStatus::Completed => "completed",
        }
    }
}

/// Metrics reported by a device in one sample
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SampleMetrics {
    /// Speed in km/h
    pub speed: f64,
    /// Cumulative distance in meters
    pub distance: f64,
    /// Seconds since the device started the workout
    pub elapsed_time: f64,
    /// Watts
    pub power: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cadence: Option<f64>,
}

/// A normalized telemetry sample, timestamped on arrival
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySample {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    pub metrics: SampleMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
    pub received_at: DateTime<Utc>,
}

/// Running aggregates over every sample applied to a live session
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionAggregates {
    pub total_distance: f64,
    pub total_calories: f64,
    pub max_speed: f64,
    pub avg_speed: f64,
    pub max_power: f64,
    pub avg_power: f64,
    /// Session duration in seconds
    pub duration: f64,
    pub sample_count: u64,
    /// Mechanical work integrated from power readings
    #[serde(default)]
    pub energy_kj: f64,
    #[serde(default)]
    pub power_samples: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_battery: Option<f64>,
}

/// Transient record correlating a telemetry stream with a user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_id: Option<Uuid>,
    /// Schedule day bound when the session started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_date: Option<NaiveDate>,
    pub status: LiveSessionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub aggregates: SessionAggregates,
    /// MET-based fallback used when the device never reports power
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calorie_rate_per_hour: Option<f64>,
}

impl LiveSession {
    pub fn is_active(&self) -> bool {
        self.status == LiveSessionStatus::Active
    }

    /// Hours of exercise derived from elapsed session time
    pub fn completed_hours(&self) -> f64 {
        self.aggregates.duration / 3600.0
    }
}

/// Lifetime totals for a device, updated when sessions are finalized
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStats {
    pub device_id: String,
    pub total_sessions: u64,
    pub total_distance: f64,
    pub total_calories: f64,
    pub total_hours: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_session_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_battery: Option<f64>,
}

impl DeviceStats {
    pub fn record(&mut self, session: &LiveSession) {
        self.total_sessions += 1;
        self.total_distance += session.aggregates.total_distance;
        self.total_calories += session.aggregates.total_calories;
        self.total_hours += session.completed_hours();
        self.last_session_at = session.ended_at.or(Some(session.started_at));
        if session.aggregates.last_battery.is_some() {
            self.last_battery = session.aggregates.last_battery;
        }
    }
}

//! Domain error types for planning, scheduling and telemetry

use chrono::NaiveDate;
use thiserror::Error;

/// Errors raised while generating a training plan
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(
        "Plan requires {daily_hours:.2} h/day which exceeds the safe maximum of {max_daily_hours:.2} h/day"
    )]
    SafetyLimit {
        daily_hours: f64,
        max_daily_hours: f64,
        suggestion: String,
    },
}

/// Errors raised by schedule adjustments
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Day {0} not found in schedule")]
    DayNotFound(usize),

    #[error("No session scheduled on {0}")]
    DateNotFound(NaiveDate),

    #[error("Day {index} is {status} and cannot be {action}")]
    InvalidTransition {
        index: usize,
        status: String,
        action: &'static str,
    },

    #[error("No missed sessions are waiting for catch-up")]
    NothingToCatchUp,

    #[error("No pending session has room under the daily ceiling")]
    NoCapacity,

    #[error("Schedule is no longer active")]
    Inactive,
}

/// Errors raised while normalizing a raw telemetry payload
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("Telemetry payload must be a JSON object")]
    NotAnObject,

    #[error("Telemetry payload is missing a device identifier")]
    MissingDeviceId,

    #[error("Invalid device identifier: {0}")]
    InvalidDeviceId(String),

    #[error("Telemetry payload is missing a metrics object")]
    MissingMetrics,
}

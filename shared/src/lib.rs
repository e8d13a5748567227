//! Fitcoach Shared Library
//!
//! Pure domain logic shared by the backend and the WASM bindings: plan
//! generation, schedule reconciliation, telemetry normalization and the
//! API wire types. Nothing in this crate performs I/O.

pub mod adjuster;
pub mod errors;
pub mod health_metrics;
pub mod models;
pub mod planner;
pub mod telemetry;
pub mod types;
pub mod validation;

// Re-export commonly used items
pub use adjuster::{
    AdjusterConfig, Allocation, DayProgress, Placement, ReconcileReport, RedistributeTargets,
    RedistributionWindow, ScheduleAdjuster,
};
pub use errors::*;
pub use health_metrics::*;
pub use models::*;
pub use planner::{generate_plan, GeneratedPlan, PlanRecommendation, PlanRequest, PlannerConfig};
pub use types::*;

//! Telemetry payload normalization and live-session aggregates
//!
//! Devices send loosely-typed JSON. Only the device identifier and the
//! metrics object are mandatory; every other field falls back to zero (or
//! absent) independently when it cannot be read.

use crate::errors::TelemetryError;
use crate::models::{SampleMetrics, SessionAggregates, TelemetrySample};
use crate::validation::validate_device_id;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Turn a raw device payload into a [`TelemetrySample`] stamped with `received_at`.
///
/// Accepts camelCase or snake_case keys, and numbers or numeric strings.
/// Negative and non-finite readings become 0. Battery is clamped to 0-100.
pub fn normalize(raw: &Value, received_at: DateTime<Utc>) -> Result<TelemetrySample, TelemetryError> {
    let obj = raw.as_object().ok_or(TelemetryError::NotAnObject)?;

    let device_id = field(obj, "deviceId", "device_id")
        .and_then(device_id)
        .ok_or(TelemetryError::MissingDeviceId)?;
    validate_device_id(&device_id).map_err(TelemetryError::InvalidDeviceId)?;

    let metrics = field(obj, "metrics", "metrics")
        .and_then(Value::as_object)
        .ok_or(TelemetryError::MissingMetrics)?;

    let session_id = field(obj, "sessionId", "session_id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s.trim()).ok());

    let battery = field(obj, "battery", "battery")
        .and_then(number)
        .map(|b| if b.is_finite() { b.clamp(0.0, 100.0) } else { 0.0 });

    Ok(TelemetrySample {
        device_id,
        session_id,
        metrics: SampleMetrics {
            speed: reading(metrics, "speed", "speed"),
            distance: reading(metrics, "distance", "distance"),
            elapsed_time: reading(metrics, "elapsedTime", "elapsed_time"),
            power: reading(metrics, "power", "power"),
            cadence: field(metrics, "cadence", "cadence").and_then(number).map(non_negative),
        },
        battery,
        received_at,
    })
}

fn field<'a>(obj: &'a Map<String, Value>, camel: &str, snake: &str) -> Option<&'a Value> {
    obj.get(camel).or_else(|| obj.get(snake)).filter(|v| !v.is_null())
}

fn device_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn non_negative(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 {
        v
    } else {
        0.0
    }
}

fn reading(obj: &Map<String, Value>, camel: &str, snake: &str) -> f64 {
    field(obj, camel, snake).and_then(number).map_or(0.0, non_negative)
}

impl SessionAggregates {
    /// Fold one sample into the running aggregates.
    ///
    /// `calorie_rate_per_hour` is used only while no power reading has been
    /// seen; once a device reports power, calories come from integrated work.
    pub fn apply(&mut self, sample: &TelemetrySample, calorie_rate_per_hour: Option<f64>) {
        self.apply_metrics(&sample.metrics, sample.battery, calorie_rate_per_hour);
    }

    pub fn apply_metrics(
        &mut self,
        metrics: &SampleMetrics,
        battery: Option<f64>,
        calorie_rate_per_hour: Option<f64>,
    ) {
        let previous_duration = self.duration;
        self.sample_count += 1;

        self.duration = self.duration.max(metrics.elapsed_time);
        self.total_distance = self.total_distance.max(metrics.distance);

        self.max_speed = self.max_speed.max(metrics.speed);
        self.avg_speed += (metrics.speed - self.avg_speed) / self.sample_count as f64;

        if metrics.power > 0.0 {
            self.power_samples += 1;
            self.max_power = self.max_power.max(metrics.power);
            self.avg_power += (metrics.power - self.avg_power) / self.power_samples as f64;

            let dt = (self.duration - previous_duration).max(0.0);
            self.energy_kj += metrics.power * dt / 1000.0;
        }

        if battery.is_some() {
            self.last_battery = battery;
        }

        self.total_calories = self.total_calories.max(self.estimated_calories(calorie_rate_per_hour));
    }

    /// Calories from mechanical work (1 kJ ~ 1 kcal), else from the MET rate
    pub fn estimated_calories(&self, calorie_rate_per_hour: Option<f64>) -> f64 {
        if self.power_samples > 0 {
            self.energy_kj
        } else {
            calorie_rate_per_hour.unwrap_or(0.0) * self.duration / 3600.0
        }
    }
}

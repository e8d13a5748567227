//! Fitcoach WASM Module
//!
//! Browser bindings for plan previews and live chart smoothing, so a client
//! can show a plan before creating it and render telemetry without a round trip.

use chrono::NaiveDate;
use fitcoach_shared::{
    calories_per_hour, generate_plan, Intensity, PlanPreview, PlanPreviewRequest, PlannerConfig,
};
use wasm_bindgen::prelude::*;

/// Preview a plan from a JSON `PlanPreviewRequest`.
///
/// `today` is an ISO date used when the request has no start date.
/// Returns the `PlanPreview` as JSON, or throws the error message.
#[wasm_bindgen]
pub fn preview_plan(request_json: &str, today: &str, max_daily_hours: f64) -> Result<String, JsValue> {
    preview(request_json, today, max_daily_hours).map_err(|e| JsValue::from_str(&e))
}

/// kcal burned per hour at an intensity ("light", "moderate", "vigorous")
#[wasm_bindgen]
pub fn calorie_rate(intensity: &str, weight_kg: f64) -> Result<f64, JsValue> {
    let intensity: Intensity = intensity.parse().map_err(|e: String| JsValue::from_str(&e))?;
    Ok(calories_per_hour(intensity, weight_kg))
}

/// Trailing moving average over a telemetry series, e.g. speed or power
#[wasm_bindgen]
pub fn smooth_series(values: &[f64], window_size: usize) -> Vec<f64> {
    if values.is_empty() || window_size == 0 {
        return vec![];
    }

    let mut result = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for (i, value) in values.iter().enumerate() {
        sum += value;
        if i >= window_size {
            sum -= values[i - window_size];
        }
        result.push(sum / (i + 1).min(window_size) as f64);
    }
    result
}

fn preview(request_json: &str, today: &str, max_daily_hours: f64) -> Result<String, String> {
    let request: PlanPreviewRequest = serde_json::from_str(request_json).map_err(|e| e.to_string())?;
    let today = NaiveDate::parse_from_str(today, "%Y-%m-%d").map_err(|e| e.to_string())?;

    let mut config = PlannerConfig::default();
    if max_daily_hours > 0.0 {
        config.max_daily_hours = max_daily_hours;
    }

    let plan_request = request
        .to_plan_request(today, Intensity::default())
        .map_err(|e| e.to_string())?;
    let plan = generate_plan(&plan_request, &config).map_err(|e| e.to_string())?;
    serde_json::to_string(&PlanPreview::from(&plan)).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn request(target: f64, days: i64) -> String {
        json!({
            "weightKg": 70.0,
            "heightCm": 175.0,
            "birthDate": "1994-01-01",
            "sex": "male",
            "activityLevel": "moderate",
            "targetWeightKg": target,
            "durationDays": days
        })
        .to_string()
    }

    #[test]
    fn test_preview_plan() {
        let body = preview(&request(65.0, 100), "2024-05-01", 0.0).unwrap();
        let preview: Value = serde_json::from_str(&body).unwrap();

        assert!((preview["dailyHours"].as_f64().unwrap() - 0.6875).abs() < 1e-9);
        assert_eq!(preview["durationDays"], 100);
        assert_eq!(preview["startDate"], "2024-05-01");
        assert_eq!(preview["recommendation"]["kind"], "burn");
    }

    #[test]
    fn test_preview_respects_ceiling() {
        let err = preview(&request(65.0, 100), "2024-05-01", 0.5).unwrap_err();
        assert!(err.contains("exceeds the safe maximum"));

        assert!(preview("{}", "2024-05-01", 0.0).is_err());
        assert!(preview(&request(65.0, 100), "May 1st", 0.0).is_err());
    }

    #[test]
    fn test_smooth_series() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = smooth_series(&values, 3);
        assert_eq!(result.len(), 5);
        assert!((result[0] - 1.0).abs() < 0.001);
        assert!((result[2] - 2.0).abs() < 0.001); // avg of [1,2,3]
        assert!((result[4] - 4.0).abs() < 0.001); // avg of [3,4,5]
        assert!(smooth_series(&values, 0).is_empty());
    }

    #[test]
    fn test_calorie_rate() {
        assert!((calorie_rate("moderate", 70.0).unwrap() - 560.0).abs() < 1e-9);
    }
}

//! Input validation functions
//!
//! Field-level checks shared by the planner, the adjuster and the HTTP
//! layer. Request structs use the `validator` crate derive macros; the
//! helpers here cover rules those macros cannot express.

use validator::ValidationErrors;

/// Longest accepted device identifier
pub const MAX_DEVICE_ID_LEN: usize = 128;

/// Validate an hour value: finite, positive and at most one day
pub fn validate_hours(hours: f64, field: &str) -> Result<(), String> {
    if hours.is_nan() || hours.is_infinite() {
        return Err(format!("{} must be a valid number", field));
    }
    if hours <= 0.0 {
        return Err(format!("{} must be greater than 0", field));
    }
    if hours > 24.0 {
        return Err(format!("{} cannot exceed 24 hours", field));
    }
    Ok(())
}

/// Validate a device identifier supplied by a client
pub fn validate_device_id(device_id: &str) -> Result<(), String> {
    let trimmed = device_id.trim();
    if trimmed.is_empty() {
        return Err("Device id cannot be empty".to_string());
    }
    if trimmed.len() > MAX_DEVICE_ID_LEN {
        return Err(format!(
            "Device id cannot exceed {} characters",
            MAX_DEVICE_ID_LEN
        ));
    }
    if trimmed.chars().any(char::is_control) {
        return Err("Device id contains invalid characters".to_string());
    }
    Ok(())
}

/// Flatten `validator` errors into one readable message
pub fn describe_errors(errors: &ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .into_iter()
        .map(|(field, errs)| {
            let reasons: Vec<String> = errs
                .iter()
                .map(|e| match &e.message {
                    Some(message) => message.to_string(),
                    None => e.code.to_string(),
                })
                .collect();
            format!("{}: {}", field, reasons.join(", "))
        })
        .collect();
    messages.sort();
    messages.join("; ")
}

// Request validation (runs before anything touches the store)

use crate::domain::queue::{is_valid_priority, MAX_PRIORITY, MIN_PRIORITY};
use crate::error::{AppError, Result};

pub const MAX_NAME_LEN: usize = 128;
pub const MAX_DEDUP_KEY_LEN: usize = 255;
pub const MAX_ATTEMPTS_LIMIT: i32 = 100;
pub const MAX_PAYLOAD_DEPTH: usize = 32;

/// Task and schedule names: 1..=128 chars of `[A-Za-z0-9_.:-]`
pub fn validate_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AppError::Validation(format!("{} cannot be empty", what)));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(AppError::Validation(format!(
            "{} too long (max {} chars)",
            what, MAX_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'))
    {
        return Err(AppError::Validation(format!(
            "{} must be alphanumeric with _ . : - only",
            what
        )));
    }
    Ok(())
}

pub fn validate_priority(priority: i32) -> Result<()> {
    if !is_valid_priority(priority) {
        return Err(AppError::Validation(format!(
            "priority {} out of range [{}, {}]",
            priority, MIN_PRIORITY, MAX_PRIORITY
        )));
    }
    Ok(())
}

pub fn validate_max_attempts(max_attempts: i32) -> Result<()> {
    if !(1..=MAX_ATTEMPTS_LIMIT).contains(&max_attempts) {
        return Err(AppError::Validation(format!(
            "max_attempts must be between 1 and {}",
            MAX_ATTEMPTS_LIMIT
        )));
    }
    Ok(())
}

pub fn validate_dedup_key(key: Option<&str>) -> Result<()> {
    match key {
        Some("") => Err(AppError::Validation("dedup_key cannot be empty".into())),
        Some(k) if k.len() > MAX_DEDUP_KEY_LEN => Err(AppError::Validation(format!(
            "dedup_key too long (max {} chars)",
            MAX_DEDUP_KEY_LEN
        ))),
        _ => Ok(()),
    }
}

/// Payload must be a JSON object (or null) nested at most 32 levels deep
pub fn validate_payload(payload: &serde_json::Value) -> Result<()> {
    if !(payload.is_object() || payload.is_null()) {
        return Err(AppError::Validation(
            "payload must be a JSON object".into(),
        ));
    }
    if json_depth(payload) > MAX_PAYLOAD_DEPTH {
        return Err(AppError::Validation(format!(
            "payload nested too deep (max {} levels)",
            MAX_PAYLOAD_DEPTH
        )));
    }
    Ok(())
}

fn json_depth(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        serde_json::Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Small helpers for reading a step's `raw` parameter bag.

use rag_core::pipeline::StepDef;
use rag_error::{ErrorCode, RagError, Result};
use serde_json::Value;

/// Read a required string parameter, or fail with
/// [`ErrorCode::InvalidStepParameter`].
pub fn require_str<'a>(step: &'a StepDef, key: &str) -> Result<&'a str> {
    step.raw.get(key).and_then(Value::as_str).ok_or_else(|| {
        RagError::new(
            ErrorCode::InvalidStepParameter,
            format!("step '{}': missing or non-string parameter '{key}'", step.id),
        )
    })
}

/// Read an optional string parameter.
pub fn opt_str<'a>(step: &'a StepDef, key: &str) -> Option<&'a str> {
    step.raw.get(key).and_then(Value::as_str)
}

/// Read an optional string parameter, falling back to `default`.
pub fn str_or<'a>(step: &'a StepDef, key: &str, default: &'a str) -> &'a str {
    opt_str(step, key).unwrap_or(default)
}

/// Read an optional `u32` parameter, falling back to `default`.
pub fn u32_or(step: &StepDef, key: &str, default: u32) -> u32 {
    step.raw
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(default)
}

/// Read an optional `bool` parameter, falling back to `default`.
pub fn bool_or(step: &StepDef, key: &str, default: bool) -> bool {
    step.raw.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// Read an optional array-of-string parameter, defaulting to empty.
pub fn str_list(step: &StepDef, key: &str) -> Vec<String> {
    step.raw
        .get(key)
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

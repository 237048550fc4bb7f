//! Skill output protocol.
//!
//! Skills print one JSON object between sentinel lines on stdout:
//!
//! ```text
//! ---SKILL_OUTPUT_START---
//! {"key": "value"}
//! ---SKILL_OUTPUT_END---
//! ```
//!
//! Anything outside the markers (logs, debug prints) is ignored.

use serde_json::{Map, Value};

use crate::error::RunnerError;

pub const START_MARKER: &str = "---SKILL_OUTPUT_START---";
pub const END_MARKER: &str = "---SKILL_OUTPUT_END---";

/// Extract the JSON object a skill emitted between the output markers.
pub fn parse_skill_output(stdout: &str) -> Result<Map<String, Value>, RunnerError> {
    let start = stdout.find(START_MARKER).ok_or_else(|| {
        RunnerError::OutputParse(format!(
            "No output start marker found in container stdout. \
             Skills must print {START_MARKER} before their JSON output."
        ))
    })?;

    let body_start = start + START_MARKER.len();
    let end = stdout[body_start..].find(END_MARKER).ok_or_else(|| {
        RunnerError::OutputParse(format!(
            "No output end marker found in container stdout. \
             Skills must print {END_MARKER} after their JSON output."
        ))
    })?;

    let body = stdout[body_start..body_start + end].trim();
    if body.is_empty() {
        return Err(RunnerError::OutputParse(
            "Empty output between markers. Skills must emit valid JSON.".to_string(),
        ));
    }

    let value: Value = serde_json::from_str(body).map_err(|e| {
        RunnerError::OutputParse(format!("Failed to parse JSON between output markers: {e}"))
    })?;

    match value {
        Value::Object(map) => Ok(map),
        other => Err(RunnerError::OutputParse(format!(
            "Skill output must be a JSON object, got {}",
            json_type(&other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

//! Structural comparison of predicted and actual subtask results.

use serde::Serialize;
use serde_json::Value;

use crate::agents::ResultStatus;
use crate::task::TaskType;

/// Result of executing one subtask.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubtaskOutcome {
    pub status: ResultStatus,
    pub task_type: TaskType,
    /// Parsed object, or the raw reply as a string when unparseable.
    pub result: Value,
    pub guided: bool,
    pub model: String,
    /// Why `result` is raw text rather than an object
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Predicted,
    Actual,
}

/// Why an actual result does not match its prediction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Deviation {
    ErrorStatus { side: Side },
    TaskTypeMismatch { expected: String, actual: String },
    MissingKeys { keys: Vec<String> },
}

impl std::fmt::Display for Deviation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Deviation::ErrorStatus { side: Side::Predicted } => write!(f, "prediction reports an error"),
            Deviation::ErrorStatus { side: Side::Actual } => write!(f, "result reports an error"),
            Deviation::TaskTypeMismatch { expected, actual } => {
                write!(f, "task type {} does not match predicted {}", actual, expected)
            }
            Deviation::MissingKeys { keys } => write!(f, "missing expected keys: {}", keys.join(", ")),
        }
    }
}

/// Compare `actual` against `predicted`.
///
/// # Pure Function
/// Checks, in order: error status on either side, task-type mismatch (a
/// prediction without `task_type` inherits `subtask_type`), then keys listed
/// under `expected_keys` absent from `actual.result`. A non-object result is
/// missing every expected key.
pub fn detect(predicted: &Value, actual: &SubtaskOutcome, subtask_type: &TaskType) -> Option<Deviation> {
    if predicted.get("status").and_then(Value::as_str) == Some("error") {
        return Some(Deviation::ErrorStatus { side: Side::Predicted });
    }
    if actual.status == ResultStatus::Error {
        return Some(Deviation::ErrorStatus { side: Side::Actual });
    }

    let expected_type = predicted
        .get("task_type")
        .and_then(Value::as_str)
        .unwrap_or(subtask_type.as_str());
    if expected_type != actual.task_type.as_str() {
        return Some(Deviation::TaskTypeMismatch {
            expected: expected_type.to_string(),
            actual: actual.task_type.to_string(),
        });
    }

    let expected_keys: Vec<&str> = predicted
        .get("expected_keys")
        .and_then(Value::as_array)
        .map(|keys| keys.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let missing: Vec<String> = match actual.result.as_object() {
        Some(obj) => expected_keys
            .iter()
            .filter(|k| !obj.contains_key(**k))
            .map(|k| k.to_string())
            .collect(),
        None => expected_keys.iter().map(|k| k.to_string()).collect(),
    };
    if !missing.is_empty() {
        return Some(Deviation::MissingKeys { keys: missing });
    }
    None
}

//! Structural merge of subtask results.

use serde_json::{Map, Value};

use super::deviation::SubtaskOutcome;
use crate::agents::ResultStatus;

/// Merge subtask results into one artifact.
///
/// # Pure Function
/// - `seed_keys` are always present, as empty lists if nothing contributes
/// - list-valued fields sharing a key are set-unioned in first-seen order
/// - other fields keep the first value seen
/// - error-tagged and non-object results contribute nothing
pub fn synthesize(outcomes: &[SubtaskOutcome], seed_keys: &[&str]) -> Value {
    let mut artifact = Map::new();
    for key in seed_keys {
        artifact.insert(key.to_string(), Value::Array(Vec::new()));
    }

    for outcome in outcomes {
        if outcome.status == ResultStatus::Error {
            continue;
        }
        let Some(fields) = outcome.result.as_object() else {
            continue;
        };
        for (key, value) in fields {
            if let Some(existing) = artifact.get_mut(key) {
                if let (Value::Array(merged), Value::Array(items)) = (existing, value) {
                    union_into(merged, items);
                }
                continue;
            }
            let fresh = match value {
                Value::Array(items) => {
                    let mut unique = Vec::with_capacity(items.len());
                    union_into(&mut unique, items);
                    Value::Array(unique)
                }
                other => other.clone(),
            };
            artifact.insert(key.clone(), fresh);
        }
    }
    Value::Object(artifact)
}

fn union_into(merged: &mut Vec<Value>, items: &[Value]) {
    for item in items {
        if !merged.contains(item) {
            merged.push(item.clone());
        }
    }
}

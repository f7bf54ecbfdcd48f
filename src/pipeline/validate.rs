//! Completeness verdicts on a synthesized artifact.

use serde::Serialize;
use serde_json::Value;

use super::parse::{extract_object, ValidationParseError};

/// Completeness verdict for an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub complete: bool,
    pub gaps: Vec<String>,
}

impl Validation {
    pub fn complete() -> Self {
        Self {
            complete: true,
            gaps: Vec::new(),
        }
    }

    pub fn incomplete(gaps: Vec<String>) -> Self {
        Self {
            complete: false,
            gaps,
        }
    }
}

const BULLETS: [&str; 3] = ["- ", "* ", "• "];

/// Read a validation reply.
///
/// A structured `{complete, gaps}` object wins. Otherwise, a reply mentioning
/// "missing" or "incomplete" is incomplete, with gaps taken from bullet lines
/// under those headings. A reply that only says "complete" is complete.
pub fn parse_validation(text: &str) -> Result<Validation, ValidationParseError> {
    if let Ok(obj) = extract_object(text) {
        if let Some(complete) = obj.get("complete").and_then(Value::as_bool) {
            let gaps = obj
                .get("gaps")
                .and_then(Value::as_array)
                .map(|items| items.iter().map(gap_text).collect())
                .unwrap_or_default();
            return Ok(Validation { complete, gaps });
        }
    }

    let lower = text.to_lowercase();
    if lower.contains("missing") || lower.contains("incomplete") {
        return Ok(Validation::incomplete(bulleted_gaps(text)));
    }
    if lower.contains("complete") {
        return Ok(Validation::complete());
    }
    Err(ValidationParseError::new("no completeness verdict", text))
}

fn gap_text(item: &Value) -> String {
    match item {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Bullet lines under a "missing"/"incomplete" heading, or that mention it themselves.
fn bulleted_gaps(text: &str) -> Vec<String> {
    let mut gaps = Vec::new();
    let mut in_section = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lower = trimmed.to_lowercase();
        let mentions = lower.contains("missing") || lower.contains("incomplete");
        match BULLETS.iter().find_map(|b| trimmed.strip_prefix(b)) {
            Some(item) if in_section || mentions => gaps.push(item.trim().to_string()),
            Some(_) => {}
            None => in_section = mentions,
        }
    }
    gaps
}

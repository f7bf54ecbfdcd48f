//! Extraction of structured objects from generated text.
//!
//! Order of attempts:
//! 1. the whole reply is a JSON object
//! 2. the first ```json fenced block holds a JSON object
//! 3. the first balanced `{...}` span that parses as a JSON object

use serde_json::{Map, Value};

const EXCERPT_CHARS: usize = 160;

/// A reply could not be read as a structured object.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Could not parse structured reply: {reason} (excerpt: {excerpt:?})")]
pub struct ValidationParseError {
    pub reason: String,
    pub excerpt: String,
}

impl ValidationParseError {
    pub fn new(reason: impl Into<String>, text: &str) -> Self {
        Self {
            reason: reason.into(),
            excerpt: text.chars().take(EXCERPT_CHARS).collect(),
        }
    }
}

/// Extract the first JSON object from `text`.
pub fn extract_object(text: &str) -> Result<Map<String, Value>, ValidationParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationParseError::new("empty reply", text));
    }

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        return Ok(map);
    }

    if let Some(block) = fenced_json(trimmed) {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(block) {
            return Ok(map);
        }
    }

    let mut from = 0;
    while let Some(offset) = trimmed[from..].find('{') {
        let start = from + offset;
        if let Some(end) = balanced_end(&trimmed[start..]) {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&trimmed[start..start + end]) {
                return Ok(map);
            }
        }
        from = start + 1;
    }

    Err(ValidationParseError::new("no JSON object found", text))
}

/// Body of the first ```json fence, if closed.
fn fenced_json(text: &str) -> Option<&str> {
    let open = text.find("```json")?;
    let body_start = open + "```json".len();
    let close = text[body_start..].find("```")?;
    Some(text[body_start..body_start + close].trim())
}

/// Byte length of the balanced object starting at `text[0] == '{'`, string-aware.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_whole_reply_object() {
        let map = extract_object(" {\"a\": 1} ").unwrap();
        assert_eq!(Value::Object(map), json!({"a": 1}));
    }

    #[test]
    fn test_fenced_block_preferred_over_prose_braces() {
        let text = "Here is {not json}\n```json\n{\"components\": [\"api\"]}\n```\nDone";
        let map = extract_object(text).unwrap();
        assert_eq!(map["components"], json!(["api"]));
    }

    #[test]
    fn test_first_balanced_object_in_prose() {
        let text = "Prediction follows: {\"expected_keys\": [\"a\"], \"note\": \"use {braces}\"} trailing {\"b\": 2}";
        let map = extract_object(text).unwrap();
        assert_eq!(map["expected_keys"], json!(["a"]));
        assert_eq!(map["note"], "use {braces}");
    }

    #[test]
    fn test_skips_malformed_span() {
        let text = "{oops} then {\"ok\": true}";
        assert_eq!(extract_object(text).unwrap()["ok"], json!(true));
    }

    #[test]
    fn test_no_object_is_error() {
        let err = extract_object("The design is complete.").unwrap_err();
        assert_eq!(err.reason, "no JSON object found");
        assert!(extract_object("[1, 2]").is_err());
        assert!(extract_object("").is_err());
    }
}

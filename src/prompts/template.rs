//! Template records and placeholder rendering.

use std::borrow::Cow;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// Number of trailing performance records averaged during selection.
pub const SCORE_WINDOW: usize = 20;

/// Score assumed for templates without history.
pub const DEFAULT_SCORE: f64 = 0.5;

/// One scored use of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub timestamp: DateTime<Utc>,
    pub score: f64,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

/// A versioned prompt body for one (agent, task type) pair.
///
/// # Invariants
/// - `performance` is append-only
/// - Every recorded score is within `[0, 1]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRecord {
    /// Derived from the file stem on load; not part of the file body.
    #[serde(skip)]
    pub id: String,
    pub agent_id: String,
    #[serde(alias = "prompt_type")]
    pub task_type: String,
    #[serde(alias = "template")]
    pub body: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(skip)]
    pub performance: Vec<PerformanceRecord>,
}

pub(crate) fn default_version() -> String {
    "1.0.0".to_string()
}

impl TemplateRecord {
    pub fn new(
        id: impl Into<String>,
        agent_id: impl Into<String>,
        task_type: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            task_type: task_type.into(),
            body: body.into(),
            version: default_version(),
            performance: Vec::new(),
        }
    }

    /// Whether this template serves `(agent_id, task_type)`.
    pub fn matches(&self, agent_id: &str, task_type: &str) -> bool {
        self.agent_id == agent_id && self.task_type == task_type
    }

    /// Mean score over the last [`SCORE_WINDOW`] records, [`DEFAULT_SCORE`] when empty.
    ///
    /// # Pure Function
    pub fn trailing_mean(&self) -> f64 {
        if self.performance.is_empty() {
            return DEFAULT_SCORE;
        }
        let start = self.performance.len().saturating_sub(SCORE_WINDOW);
        let recent = &self.performance[start..];
        recent.iter().map(|r| r.score).sum::<f64>() / recent.len() as f64
    }

    pub fn render(&self, vars: &[(&str, &str)]) -> String {
        render_template(&self.body, vars)
    }
}

/// Bump the patch component of a `major.minor.patch` version.
///
/// Malformed versions restart at `1.0.1`.
pub fn bump_patch(version: &str) -> String {
    let parts: Vec<&str> = version.split('.').collect();
    match parts.as_slice() {
        [major, minor, patch] => match patch.parse::<u64>() {
            Ok(p) => format!("{}.{}.{}", major, minor, p + 1),
            Err(_) => "1.0.1".to_string(),
        },
        _ => "1.0.1".to_string(),
    }
}

fn placeholder_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").ok())
        .as_ref()
}

/// Replace each `{name}` with its value in a single pass.
///
/// Placeholders without a value are left as-is, and substituted values are
/// never scanned again, so braces inside a value stay literal.
pub fn render_template(body: &str, vars: &[(&str, &str)]) -> String {
    let Some(pattern) = placeholder_pattern() else {
        return body.to_string();
    };
    let rendered: Cow<'_, str> = pattern.replace_all(body, |caps: &Captures<'_>| {
        let name = &caps[1];
        match vars.iter().find(|(k, _)| *k == name) {
            Some((_, value)) => value.to_string(),
            None => caps[0].to_string(),
        }
    });
    rendered.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(scores: &[f64]) -> TemplateRecord {
        let mut t = TemplateRecord::new("saa_x", "SAA", "x", "body");
        for s in scores {
            t.performance.push(PerformanceRecord {
                timestamp: Utc::now(),
                score: *s,
                version: "1.0.0".into(),
                metadata: serde_json::Value::Null,
            });
        }
        t
    }

    #[test]
    fn test_trailing_mean_defaults_without_history() {
        assert_eq!(record(&[]).trailing_mean(), DEFAULT_SCORE);
    }

    #[test]
    fn test_trailing_mean_uses_last_window() {
        let mut scores = vec![0.0; 10];
        scores.extend(std::iter::repeat(1.0).take(SCORE_WINDOW));
        assert_eq!(record(&scores).trailing_mean(), 1.0);
        assert!((record(&[0.2, 0.4]).trailing_mean() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        let out = render_template(
            "Req: {requirements}\nCtx: {context}\n{\"complete\": true}",
            &[("requirements", "fast")],
        );
        assert_eq!(out, "Req: fast\nCtx: {context}\n{\"complete\": true}");
    }

    #[test]
    fn test_render_does_not_expand_placeholders_inside_values() {
        let out = render_template(
            "Input: {input}\nContext: {context}",
            &[("input", "literal {context} and {input}"), ("context", "retrieved")],
        );
        assert_eq!(out, "Input: literal {context} and {input}\nContext: retrieved");
    }

    #[test]
    fn test_bump_patch() {
        assert_eq!(bump_patch("1.0.0"), "1.0.1");
        assert_eq!(bump_patch("2.3.9"), "2.3.10");
        assert_eq!(bump_patch("garbage"), "1.0.1");
    }

    #[test]
    fn test_legacy_field_names_deserialize() {
        let yaml = "agent_id: SAA\nprompt_type: pattern_selection\ntemplate: Pick {requirements}\n";
        let t: TemplateRecord = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(t.task_type, "pattern_selection");
        assert_eq!(t.body, "Pick {requirements}");
        assert_eq!(t.version, "1.0.0");
    }
}

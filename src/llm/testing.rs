//! Scripted backend for deterministic tests.

use std::sync::Mutex;

use async_trait::async_trait;

use super::{BackendRequest, GenerationBackend, LlmError, LlmErrorKind};

struct Rule {
    needle: String,
    replies: Vec<String>,
    served: usize,
}

#[derive(Default)]
struct State {
    rules: Vec<Rule>,
    fallback: Option<String>,
    failures_left: usize,
    failure_kind: Option<LlmErrorKind>,
    requests: Vec<BackendRequest>,
}

/// Answers prompts by substring rules, first match wins.
///
/// A rule with several replies serves them in order and then repeats the last.
#[derive(Default)]
pub struct ScriptedBackend {
    state: Mutex<State>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `reply` whenever the prompt contains `needle`.
    pub fn on(self, needle: &str, reply: &str) -> Self {
        self.on_sequence(needle, &[reply])
    }

    /// Reply with `replies` in order for prompts containing `needle`.
    pub fn on_sequence(self, needle: &str, replies: &[&str]) -> Self {
        self.state.lock().unwrap().rules.push(Rule {
            needle: needle.to_string(),
            replies: replies.iter().map(|r| r.to_string()).collect(),
            served: 0,
        });
        self
    }

    /// Reply used when no rule matches.
    pub fn fallback(self, reply: &str) -> Self {
        self.state.lock().unwrap().fallback = Some(reply.to_string());
        self
    }

    /// Fail the first `n` calls with `kind`.
    pub fn fail_first(self, n: usize, kind: LlmErrorKind) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.failures_left = n;
            state.failure_kind = Some(kind);
        }
        self
    }

    /// Total backend calls so far.
    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().requests.len()
    }

    /// Calls whose prompt contained `needle`.
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.prompt.contains(needle))
            .count()
    }

    pub fn requests(&self) -> Vec<BackendRequest> {
        self.state.lock().unwrap().requests.clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(&self, request: &BackendRequest) -> Result<String, LlmError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());

        if state.failures_left > 0 {
            state.failures_left -= 1;
            let kind = state.failure_kind.unwrap_or(LlmErrorKind::ProviderUnavailable);
            return Err(LlmError {
                kind,
                status_code: None,
                message: "scripted failure".to_string(),
                retry_after: None,
            });
        }

        if let Some(rule) = state
            .rules
            .iter_mut()
            .find(|r| request.prompt.contains(&r.needle))
        {
            let idx = rule.served.min(rule.replies.len().saturating_sub(1));
            rule.served += 1;
            return Ok(rule.replies.get(idx).cloned().unwrap_or_default());
        }

        state
            .fallback
            .clone()
            .ok_or_else(|| LlmError::invalid_request(None, "no scripted reply"))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

//! Deterministic offline generator.

use async_trait::async_trait;

use super::{BackendRequest, GenerationBackend, LlmError};

/// Produces a fixed-shape placeholder reply.
///
/// Used as the backend when no API key is configured, and by the generation
/// service as the degrade target once retries are exhausted.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderGenerator;

impl PlaceholderGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Render the placeholder text for `prompt`.
    ///
    /// # Pure Function
    /// Same prompt and reason always give the same text.
    pub fn render(&self, prompt: &str, reason: &str) -> String {
        let first_line = prompt
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("(empty prompt)");
        let headline: String = first_line.chars().take(120).collect();
        format!(
            "[placeholder response]\nRequest: {}\nReason: {}\nNo generation backend produced output for this request.",
            headline, reason
        )
    }
}

#[async_trait]
impl GenerationBackend for PlaceholderGenerator {
    async fn generate(&self, request: &BackendRequest) -> Result<String, LlmError> {
        Ok(self.render(&request.prompt, "no generation backend configured"))
    }

    fn name(&self) -> &str {
        "placeholder"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_names_first_line_and_reason() {
        let text = PlaceholderGenerator::new().render("\n  Design the API\nmore", "timeout");
        assert!(text.contains("Request: Design the API"));
        assert!(text.contains("Reason: timeout"));
        assert!(!text.contains("more"));
    }

    #[test]
    fn test_render_handles_empty_prompt() {
        let text = PlaceholderGenerator::new().render("", "invalid");
        assert!(text.contains("(empty prompt)"));
    }
}

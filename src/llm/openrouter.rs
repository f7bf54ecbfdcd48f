//! OpenRouter (OpenAI-compatible) chat-completions backend.
//!
//! Single attempt per call; retry and backoff live in the generation service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::{classify_http_status, LlmError, LlmErrorKind};
use super::{BackendRequest, GenerationBackend};

/// HTTP generation backend.
pub struct OpenRouterBackend {
    client: Client,
    api_key: String,
    api_url: String,
}

impl OpenRouterBackend {
    /// Create a new backend for the given endpoint.
    pub fn new(api_key: String, api_url: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            api_url,
        }
    }

    /// Parse Retry-After header if present.
    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// Create an LlmError from HTTP response status and body.
    fn create_error(status: u16, body: &str, retry_after: Option<Duration>) -> LlmError {
        let message = truncate(body, 500);
        match classify_http_status(status) {
            LlmErrorKind::RateLimited => LlmError::rate_limited(message, retry_after),
            LlmErrorKind::InvalidRequest => LlmError::invalid_request(Some(status), message),
            LlmErrorKind::Timeout => {
                let mut err = LlmError::timeout(message);
                err.status_code = Some(status);
                err
            }
            _ => LlmError::unavailable(Some(status), message),
        }
    }

    /// Map a transport failure onto the error taxonomy.
    fn transport_error(e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::timeout(format!("Request timeout: {}", e))
        } else if e.is_connect() {
            LlmError::unavailable(None, format!("Connection failed: {}", e))
        } else {
            LlmError::unavailable(None, format!("Request failed: {}", e))
        }
    }
}

#[async_trait]
impl GenerationBackend for OpenRouterBackend {
    async fn generate(&self, request: &BackendRequest) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &request.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        tracing::debug!(model = %request.model, "Sending generation request");

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("X-Title", "archflow")
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status();
        let retry_after = Self::parse_retry_after(response.headers());
        let text = response.text().await.map_err(Self::transport_error)?;

        if !status.is_success() {
            return Err(Self::create_error(status.as_u16(), &text, retry_after));
        }

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            LlmError::unavailable(
                Some(status.as_u16()),
                format!("Failed to parse response: {}, body: {}", e, truncate(&text, 200)),
            )
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::unavailable(Some(status.as_u16()), "No content in response"))
    }

    fn name(&self) -> &str {
        "openrouter"
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u64,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            OpenRouterBackend::create_error(429, "", None).kind,
            LlmErrorKind::RateLimited
        );
        assert_eq!(
            OpenRouterBackend::create_error(502, "", None).kind,
            LlmErrorKind::ProviderUnavailable
        );
        assert_eq!(
            OpenRouterBackend::create_error(403, "", None).kind,
            LlmErrorKind::InvalidRequest
        );
    }

    #[test]
    fn test_rate_limit_keeps_retry_after() {
        let err = OpenRouterBackend::create_error(429, "slow", Some(Duration::from_secs(3)));
        assert_eq!(err.retry_after, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_retry_after_header_parsing() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("retry-after", "12".parse().unwrap());
        assert_eq!(
            OpenRouterBackend::parse_retry_after(&headers),
            Some(Duration::from_secs(12))
        );
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"hi"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("hi"));
    }
}

//! Generation error types with retry classification.
//!
//! Distinguishes between transient errors (should retry) and permanent errors (should not retry).

use std::time::Duration;

/// Error from generation backend calls.
#[derive(Debug, Clone)]
pub struct LlmError {
    /// The kind of error
    pub kind: LlmErrorKind,
    /// HTTP status code, if applicable
    pub status_code: Option<u16>,
    /// Error message
    pub message: String,
    /// Suggested retry delay (from Retry-After header)
    pub retry_after: Option<Duration>,
}

impl LlmError {
    /// Create a rate limit error.
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: LlmErrorKind::RateLimited,
            status_code: Some(429),
            message: message.into(),
            retry_after,
        }
    }

    /// Create a provider-unavailable error (5xx, connection refused).
    pub fn unavailable(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::ProviderUnavailable,
            status_code,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::Timeout,
            status_code: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Create an invalid-request error (bad request, auth, empty prompt).
    pub fn invalid_request(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::InvalidRequest,
            status_code,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Create a cancellation error.
    pub fn cancelled() -> Self {
        Self {
            kind: LlmErrorKind::Cancelled,
            status_code: None,
            message: "generation cancelled".to_string(),
            retry_after: None,
        }
    }

    /// Check if this error is transient and should be retried.
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Get the delay before retry number `attempt` (0-based).
    ///
    /// Returns `retry_after` if the provider sent one, otherwise `unit * 2^attempt`.
    pub fn suggested_delay(&self, attempt: u32, unit: Duration) -> Duration {
        if let Some(retry_after) = self.retry_after {
            return retry_after;
        }
        let multiplier = 2u32.saturating_pow(attempt);
        unit.saturating_mul(multiplier)
    }
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for LlmError {}

/// Classification of generation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Provider down or unreachable (5xx, connect failure) - transient
    ProviderUnavailable,
    /// Request exceeded its timeout - transient
    Timeout,
    /// Rate limited (429) - transient, honour Retry-After
    RateLimited,
    /// Malformed request, auth failure, empty prompt - permanent
    InvalidRequest,
    /// Caller cancelled the operation - never retried, always propagated
    Cancelled,
}

impl LlmErrorKind {
    /// Check if this error kind is transient (should retry).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmErrorKind::ProviderUnavailable | LlmErrorKind::Timeout | LlmErrorKind::RateLimited
        )
    }
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmErrorKind::ProviderUnavailable => write!(f, "Provider unavailable"),
            LlmErrorKind::Timeout => write!(f, "Timeout"),
            LlmErrorKind::RateLimited => write!(f, "Rate limited"),
            LlmErrorKind::InvalidRequest => write!(f, "Invalid request"),
            LlmErrorKind::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Backoff unit; wait before retry `n` is `base_delay * 2^n`
    pub base_delay: Duration,
    /// Whether to retry on rate limit errors
    pub retry_rate_limits: bool,
    /// Whether to retry on provider-unavailable errors
    pub retry_unavailable: bool,
    /// Whether to retry on timeouts
    pub retry_timeouts: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            retry_rate_limits: true,
            retry_unavailable: true,
            retry_timeouts: true,
        }
    }
}

impl RetryConfig {
    /// Check if the given error should be retried based on this config.
    pub fn should_retry(&self, error: &LlmError) -> bool {
        match error.kind {
            LlmErrorKind::RateLimited => self.retry_rate_limits,
            LlmErrorKind::ProviderUnavailable => self.retry_unavailable,
            LlmErrorKind::Timeout => self.retry_timeouts,
            LlmErrorKind::InvalidRequest | LlmErrorKind::Cancelled => false,
        }
    }
}

/// Parse HTTP status code into error kind.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        408 => LlmErrorKind::Timeout,
        400..=499 => LlmErrorKind::InvalidRequest,
        _ => LlmErrorKind::ProviderUnavailable,
    }
}

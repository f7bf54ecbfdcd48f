//! Generation layer: backend abstraction, tier selection, response caching.
//!
//! This module provides a trait-based abstraction over text generation providers,
//! with OpenRouter as the HTTP implementation and a deterministic placeholder
//! generator used offline and as the degrade target after exhausted retries.
//!
//! Everything above the backend goes through [`GenerationService`], which owns
//! the [`ModelSelector`], the [`ResponseCache`] and the retry policy.

mod cache;
mod error;
mod model_select;
mod openrouter;
mod placeholder;
mod risk;
mod service;

#[cfg(test)]
pub mod testing;

pub use cache::{fingerprint, scope_digest, CacheStats, ResponseCache};
pub use error::{classify_http_status, LlmError, LlmErrorKind, RetryConfig};
pub use model_select::{estimate_tokens, ModelSelector, TOKENS_PER_WORD};
pub use openrouter::OpenRouterBackend;
pub use placeholder::PlaceholderGenerator;
pub use risk::{assess, RiskAssessment, FACTUALITY_PREAMBLE, HALLUCINATION_THRESHOLD};
pub use service::{Generation, GenerationRequest, GenerationService, UsageStats};

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Price per thousand estimated tokens, in dollars.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TierPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl TierPricing {
    pub fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        prompt_tokens as f64 / 1000.0 * self.input_per_1k
            + completion_tokens as f64 / 1000.0 * self.output_per_1k
    }
}

/// One entry of the ordered model tier table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTier {
    /// Tier label ("lightweight", "default", "advanced")
    pub name: String,
    /// Provider model identifier
    pub model: String,
    /// Declared maximum context window in tokens
    pub max_context: u64,
    /// Zero pricing leaves cost estimates at zero
    #[serde(default)]
    pub pricing: TierPricing,
}

impl ModelTier {
    pub fn new(name: impl Into<String>, model: impl Into<String>, max_context: u64) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            max_context,
            pricing: TierPricing::default(),
        }
    }

    pub fn with_pricing(mut self, pricing: TierPricing) -> Self {
        self.pricing = pricing;
        self
    }

    /// Build the three-tier table used by default, smallest context first.
    pub fn default_table(lightweight: &str, default: &str, advanced: &str) -> Vec<ModelTier> {
        vec![
            ModelTier::new("lightweight", lightweight, 32_000)
                .with_pricing(TierPricing::new(0.000_25, 0.001_25)),
            ModelTier::new("default", default, 128_000)
                .with_pricing(TierPricing::new(0.003, 0.015)),
            ModelTier::new("advanced", advanced, 200_000)
                .with_pricing(TierPricing::new(0.015, 0.075)),
        ]
    }
}

/// Declared complexity of a generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl Complexity {
    /// Capacity scaling factor applied to the estimated token count.
    pub fn factor(&self) -> f64 {
        match self {
            Complexity::Low => 0.5,
            Complexity::Medium => 1.0,
            Complexity::High => 1.5,
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Complexity::Low => write!(f, "low"),
            Complexity::Medium => write!(f, "medium"),
            Complexity::High => write!(f, "high"),
        }
    }
}

/// A fully resolved request handed to a backend.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub prompt: String,
    pub model: String,
    /// Always within [0, 1]
    pub temperature: f64,
    pub max_tokens: u64,
    pub timeout: Duration,
}

/// Trait for generation backends.
///
/// # Errors
/// Implementations fail with `ProviderUnavailable`, `Timeout`, `RateLimited`
/// or `InvalidRequest`. Retrying is the caller's job.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate text for a single prompt.
    async fn generate(&self, request: &BackendRequest) -> Result<String, LlmError>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "backend"
    }
}

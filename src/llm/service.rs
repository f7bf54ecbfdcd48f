//! Generation service: tier selection, caching, bounded retry, degradation.
//!
//! # Request Flow
//! 1. Empty prompt: `InvalidRequest` placeholder, no backend call
//! 2. Tier: explicit tier name, else [`ModelSelector::select`]
//! 3. Clamp temperature into [0, 1]; non-positive `max_tokens` falls back to the default
//! 4. Cache lookup (when enabled)
//! 5. Risk assessment: a time-sensitive prompt gets factuality constraints
//!    prepended (the cache key still uses the caller's prompt)
//! 6. Backend call under a timeout, retried with `unit * 2^attempt` backoff
//! 7. Reply missing a declared section: one regeneration with formatting instructions
//! 8. Exhausted or permanent failure: placeholder text flagged `degraded`
//! 9. Non-degraded results are cached
//!
//! Only cancellation is returned as `Err`; every other failure degrades.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cache::{fingerprint, ResponseCache};
use super::error::{LlmError, LlmErrorKind, RetryConfig};
use super::model_select::{estimate_tokens, ModelSelector};
use super::openrouter::OpenRouterBackend;
use super::placeholder::PlaceholderGenerator;
use super::risk::{self, formatting_instruction, missing_sections, with_factuality_constraints};
use super::{BackendRequest, Complexity, GenerationBackend, ModelTier};
use crate::config::Config;

/// A generation request before tier and parameter resolution.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Explicit tier label; `None` lets the selector decide
    pub tier: Option<String>,
    pub complexity: Complexity,
    pub temperature: Option<f64>,
    /// Non-positive values fall back to the configured default
    pub max_tokens: Option<i64>,
    pub use_cache: bool,
    /// Section names the reply must contain
    pub expected_structure: Vec<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            tier: None,
            complexity: Complexity::Medium,
            temperature: None,
            max_tokens: None,
            use_cache: true,
            expected_structure: Vec::new(),
        }
    }

    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: i64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn with_expected_structure<I, S>(mut self, sections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_structure = sections.into_iter().map(Into::into).collect();
        self
    }
}

/// Outcome of a generation request.
///
/// # Invariants
/// - `degraded == reason.is_some()`
/// - `cached` implies `!degraded`
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub model: String,
    pub tier: String,
    pub cached: bool,
    pub degraded: bool,
    /// Error that forced degradation
    pub reason: Option<LlmErrorKind>,
    /// Retries performed after the first attempt
    pub retries: u32,
    /// Factuality constraints were prepended to the prompt
    pub factuality_guarded: bool,
    /// The reply came from the formatting regeneration
    pub reformatted: bool,
}

impl Generation {
    fn degraded(text: String, model: String, tier: String, reason: LlmErrorKind, retries: u32) -> Self {
        Self {
            text,
            model,
            tier,
            cached: false,
            degraded: true,
            reason: Some(reason),
            retries,
            factuality_guarded: false,
            reformatted: false,
        }
    }
}

/// Aggregate usage counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct UsageStats {
    pub requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub backend_calls: u64,
    pub retries: u64,
    pub degraded: u64,
    pub estimated_prompt_tokens: u64,
    pub estimated_completion_tokens: u64,
    /// Dollars, from the tier pricing table
    pub estimated_cost: f64,
    pub factuality_guarded: u64,
    pub formatting_regenerations: u64,
}

/// Front door to the generation backend.
pub struct GenerationService {
    backend: Arc<dyn GenerationBackend>,
    placeholder: PlaceholderGenerator,
    selector: ModelSelector,
    cache: ResponseCache,
    retry: RetryConfig,
    default_temperature: f64,
    default_max_tokens: u64,
    timeout: Duration,
    stats: RwLock<UsageStats>,
}

impl GenerationService {
    /// Create a service over an explicit backend.
    pub fn new(backend: Arc<dyn GenerationBackend>, config: &Config) -> Self {
        let gen = &config.generation;
        Self {
            backend,
            placeholder: PlaceholderGenerator::new(),
            selector: ModelSelector::new(gen.tiers.clone(), gen.default_tier),
            cache: ResponseCache::new(config.cache.ttl, config.cache.capacity),
            retry: RetryConfig {
                max_retries: gen.max_retries,
                base_delay: gen.retry_base_delay,
                ..RetryConfig::default()
            },
            default_temperature: gen.temperature.clamp(0.0, 1.0),
            default_max_tokens: gen.max_tokens.max(1),
            timeout: gen.request_timeout,
            stats: RwLock::new(UsageStats::default()),
        }
    }

    /// Create a service with the HTTP backend if a key is configured,
    /// the placeholder generator otherwise.
    pub fn from_config(config: &Config) -> Self {
        let backend: Arc<dyn GenerationBackend> = match &config.generation.api_key {
            Some(key) => Arc::new(OpenRouterBackend::new(
                key.clone(),
                config.generation.api_url.clone(),
            )),
            None => {
                warn!("No generation API key configured; using placeholder backend");
                Arc::new(PlaceholderGenerator::new())
            }
        };
        Self::new(backend, config)
    }

    pub fn selector(&self) -> &ModelSelector {
        &self.selector
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn stats(&self) -> UsageStats {
        *self.stats.read().await
    }

    /// Label of the lightweight tier, if any.
    pub fn lightweight_tier(&self) -> Option<String> {
        self.selector.lightweight().map(|t| t.name.clone())
    }

    fn resolve_tier(&self, request: &GenerationRequest) -> Option<ModelTier> {
        if let Some(name) = &request.tier {
            match self.selector.tier(name) {
                Some(tier) => return Some(tier.clone()),
                None => warn!(tier = %name, "Unknown tier requested; selecting by capacity"),
            }
        }
        self.selector
            .select(&request.prompt, request.complexity)
            .cloned()
    }

    /// Generate text for `request`.
    ///
    /// # Errors
    /// Returns `Err` only with `LlmErrorKind::Cancelled`, when `cancel` fires
    /// before or during the call. All other failures come back as a degraded
    /// [`Generation`].
    pub async fn generate(
        &self,
        request: GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<Generation, LlmError> {
        if cancel.is_cancelled() {
            return Err(LlmError::cancelled());
        }

        self.stats.write().await.requests += 1;

        if request.prompt.trim().is_empty() {
            warn!("Rejecting empty prompt");
            self.stats.write().await.degraded += 1;
            return Ok(Generation::degraded(
                self.placeholder.render(&request.prompt, "invalid request: empty prompt"),
                String::new(),
                String::new(),
                LlmErrorKind::InvalidRequest,
                0,
            ));
        }

        let tier = match self.resolve_tier(&request) {
            Some(tier) => tier,
            None => {
                warn!("No model tiers configured");
                self.stats.write().await.degraded += 1;
                return Ok(Generation::degraded(
                    self.placeholder.render(&request.prompt, "invalid request: no model tiers configured"),
                    String::new(),
                    String::new(),
                    LlmErrorKind::InvalidRequest,
                    0,
                ));
            }
        };

        let mut temperature = request.temperature.unwrap_or(self.default_temperature);
        if !(0.0..=1.0).contains(&temperature) {
            warn!(temperature, "Temperature outside [0, 1], clamping");
            temperature = temperature.clamp(0.0, 1.0);
        }
        let max_tokens = match request.max_tokens {
            Some(n) if n > 0 => n as u64,
            Some(n) => {
                warn!(max_tokens = n, "Invalid max_tokens, using default");
                self.default_max_tokens
            }
            None => self.default_max_tokens,
        };

        let key = fingerprint(&tier.model, temperature, &request.prompt);
        if request.use_cache {
            if let Some(text) = self.cache.get(&key).await {
                self.stats.write().await.cache_hits += 1;
                return Ok(Generation {
                    text,
                    model: tier.model,
                    tier: tier.name,
                    cached: true,
                    degraded: false,
                    reason: None,
                    retries: 0,
                    factuality_guarded: false,
                    reformatted: false,
                });
            }
            self.stats.write().await.cache_misses += 1;
        }

        debug!(
            tier = %tier.name,
            model = %tier.model,
            temperature,
            max_tokens,
            estimated_tokens = estimate_tokens(&request.prompt),
            "Dispatching generation"
        );

        let assessment = risk::assess(&request.prompt, tier.max_context);
        let factuality_guarded = assessment.needs_factuality_constraints();
        let prompt = if factuality_guarded {
            debug!(risk = assessment.hallucination, "Adding factuality constraints");
            self.stats.write().await.factuality_guarded += 1;
            with_factuality_constraints(&request.prompt)
        } else {
            request.prompt.clone()
        };

        let mut backend_request = BackendRequest {
            prompt,
            model: tier.model.clone(),
            temperature,
            max_tokens,
            timeout: self.timeout,
        };

        let (outcome, mut retries) = self.call_with_retry(&backend_request, cancel).await?;
        self.record_usage(&tier, &backend_request.prompt, outcome.as_ref().ok())
            .await;

        let mut text = match outcome {
            Ok(text) => text,
            Err(err) => {
                {
                    let mut stats = self.stats.write().await;
                    stats.degraded += 1;
                    stats.retries += retries as u64;
                }
                warn!(
                    model = %tier.model,
                    retries,
                    error = %err,
                    "Generation failed, degrading to placeholder"
                );
                return Ok(Generation::degraded(
                    self.placeholder.render(&request.prompt, &err.to_string()),
                    tier.model,
                    tier.name,
                    err.kind,
                    retries,
                ));
            }
        };

        let mut reformatted = false;
        let missing = missing_sections(&text, &request.expected_structure);
        if !missing.is_empty() {
            info!(?missing, "Reply lacks expected sections, regenerating with formatting");
            self.stats.write().await.formatting_regenerations += 1;
            backend_request.prompt = format!(
                "{}\n{}",
                formatting_instruction(&request.expected_structure),
                backend_request.prompt
            );
            let (second, second_retries) = self.call_with_retry(&backend_request, cancel).await?;
            retries += second_retries;
            self.record_usage(&tier, &backend_request.prompt, second.as_ref().ok())
                .await;
            match second {
                Ok(second_text) => {
                    text = second_text;
                    reformatted = true;
                }
                Err(err) => warn!(error = %err, "Formatting regeneration failed, keeping first reply"),
            }
        }

        self.stats.write().await.retries += retries as u64;
        if request.use_cache {
            self.cache.put(&key, text.clone()).await;
        }
        Ok(Generation {
            text,
            model: tier.model,
            tier: tier.name,
            cached: false,
            degraded: false,
            reason: None,
            retries,
            factuality_guarded,
            reformatted,
        })
    }

    async fn record_usage(&self, tier: &ModelTier, prompt: &str, reply: Option<&String>) {
        let prompt_tokens = estimate_tokens(prompt);
        let completion_tokens = reply.map(|text| estimate_tokens(text)).unwrap_or(0);
        let mut stats = self.stats.write().await;
        stats.estimated_prompt_tokens += prompt_tokens;
        stats.estimated_completion_tokens += completion_tokens;
        stats.estimated_cost += tier.pricing.cost(prompt_tokens, completion_tokens);
    }

    /// Call the backend with bounded retry.
    ///
    /// The outer `Result` carries cancellation only; the inner one the final
    /// backend outcome after retries.
    async fn call_with_retry(
        &self,
        request: &BackendRequest,
        cancel: &CancellationToken,
    ) -> Result<(Result<String, LlmError>, u32), LlmError> {
        let mut attempt: u32 = 0;

        loop {
            self.stats.write().await.backend_calls += 1;

            let call = tokio::time::timeout(request.timeout, self.backend.generate(request));
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(LlmError::cancelled()),
                result = call => match result {
                    Ok(inner) => inner,
                    Err(_) => Err(LlmError::timeout(format!(
                        "no response within {:?}",
                        request.timeout
                    ))),
                },
            };

            match outcome {
                Ok(text) => {
                    if attempt > 0 {
                        info!(attempt, model = %request.model, "Generation succeeded after retries");
                    }
                    return Ok((Ok(text), attempt));
                }
                Err(error) => {
                    if error.kind == LlmErrorKind::Cancelled {
                        return Err(error);
                    }
                    let should_retry =
                        self.retry.should_retry(&error) && attempt < self.retry.max_retries;
                    if !should_retry {
                        return Ok((Err(error), attempt));
                    }

                    let delay = error.suggested_delay(attempt, self.retry.base_delay);
                    warn!(
                        attempt = attempt + 1,
                        kind = %error.kind,
                        ?delay,
                        "Generation attempt failed, retrying: {}",
                        error.message
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(LlmError::cancelled()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedBackend;

    fn service(backend: Arc<ScriptedBackend>) -> GenerationService {
        GenerationService::new(backend, &Config::offline())
    }

    #[tokio::test]
    async fn test_empty_prompt_is_rejected_without_backend_call() {
        let backend = Arc::new(ScriptedBackend::new().fallback("unused"));
        let svc = service(backend.clone());
        let out = svc
            .generate(GenerationRequest::new("   "), &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.degraded);
        assert_eq!(out.reason, Some(LlmErrorKind::InvalidRequest));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_second_identical_request_hits_cache() {
        let backend = Arc::new(ScriptedBackend::new().fallback("answer"));
        let svc = service(backend.clone());
        let cancel = CancellationToken::new();

        let first = svc.generate(GenerationRequest::new("query: a"), &cancel).await.unwrap();
        let second = svc.generate(GenerationRequest::new("query: a"), &cancel).await.unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(second.text, "answer");
        assert_eq!(backend.calls(), 1);
        assert_eq!(svc.stats().await.cache_hits, 1);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_calls_backend() {
        let backend = Arc::new(ScriptedBackend::new().fallback("answer"));
        let svc = service(backend.clone());
        let cancel = CancellationToken::new();

        for _ in 0..2 {
            svc.generate(GenerationRequest::new("query: a").without_cache(), &cancel)
                .await
                .unwrap();
        }
        assert_eq!(backend.calls(), 2);
        assert!(svc.cache().is_empty().await);
    }

    #[tokio::test]
    async fn test_retries_transient_errors_then_succeeds() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .fail_first(2, LlmErrorKind::ProviderUnavailable)
                .fallback("recovered"),
        );
        let svc = service(backend.clone());
        let out = svc
            .generate(GenerationRequest::new("do it"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.text, "recovered");
        assert_eq!(out.retries, 2);
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_degrade_and_skip_cache() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .fail_first(10, LlmErrorKind::RateLimited)
                .fallback("never"),
        );
        let svc = service(backend.clone());
        let out = svc
            .generate(GenerationRequest::new("do it"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.degraded);
        assert_eq!(out.reason, Some(LlmErrorKind::RateLimited));
        // one attempt plus max_retries (3)
        assert_eq!(backend.calls(), 4);
        assert!(svc.cache().is_empty().await);
    }

    #[tokio::test]
    async fn test_invalid_request_is_not_retried() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .fail_first(1, LlmErrorKind::InvalidRequest)
                .fallback("never"),
        );
        let svc = service(backend.clone());
        let out = svc
            .generate(GenerationRequest::new("do it"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.degraded);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_token_returns_err() {
        let backend = Arc::new(ScriptedBackend::new().fallback("x"));
        let svc = service(backend.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = svc
            .generate(GenerationRequest::new("do it"), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::Cancelled);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_explicit_tier_and_clamped_parameters() {
        let backend = Arc::new(ScriptedBackend::new().fallback("x"));
        let svc = service(backend.clone());
        let out = svc
            .generate(
                GenerationRequest::new("do it")
                    .with_tier("lightweight")
                    .with_temperature(3.0)
                    .with_max_tokens(-5),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out.tier, "lightweight");
        let seen = backend.requests();
        assert_eq!(seen[0].temperature, 1.0);
        assert_eq!(seen[0].max_tokens, 4000);
    }

    #[tokio::test]
    async fn test_time_sensitive_prompt_gets_factuality_constraints() {
        let backend = Arc::new(ScriptedBackend::new().fallback("answer"));
        let svc = service(backend.clone());
        let cancel = CancellationToken::new();
        let prompt = "query: what are the latest, newest, most current and recent \
                      frameworks today, right now, at present, in modern shops?";

        let out = svc.generate(GenerationRequest::new(prompt), &cancel).await.unwrap();
        assert!(out.factuality_guarded);
        let seen = backend.requests();
        assert!(seen[0].prompt.starts_with(crate::llm::FACTUALITY_PREAMBLE));
        assert!(seen[0].prompt.ends_with(prompt));

        // the cache is keyed on the caller's prompt, not the guarded one
        let again = svc.generate(GenerationRequest::new(prompt), &cancel).await.unwrap();
        assert!(again.cached);
        assert_eq!(backend.calls(), 1);
        assert_eq!(svc.stats().await.factuality_guarded, 1);
    }

    #[tokio::test]
    async fn test_plain_prompt_is_sent_unchanged() {
        let backend = Arc::new(ScriptedBackend::new().fallback("answer"));
        let svc = service(backend.clone());
        let out = svc
            .generate(GenerationRequest::new("query: list the order services"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!out.factuality_guarded);
        assert_eq!(backend.requests()[0].prompt, "query: list the order services");
    }

    #[tokio::test]
    async fn test_missing_sections_trigger_one_formatting_regeneration() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .on("Include all of the following sections", "## Summary\nok\n## Risks\nnone")
                .fallback("just prose"),
        );
        let svc = service(backend.clone());
        let out = svc
            .generate(
                GenerationRequest::new("query: review the design")
                    .with_expected_structure(["Summary", "Risks"]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(out.reformatted);
        assert!(out.text.contains("## Risks"));
        assert_eq!(backend.calls(), 2);
        let seen = backend.requests();
        assert!(seen[1].prompt.contains("- Summary\n- Risks"));
        assert!(seen[1].prompt.ends_with("query: review the design"));
        assert_eq!(svc.stats().await.formatting_regenerations, 1);
    }

    #[tokio::test]
    async fn test_formatting_regeneration_happens_at_most_once() {
        let backend = Arc::new(ScriptedBackend::new().fallback("still prose"));
        let svc = service(backend.clone());
        let out = svc
            .generate(
                GenerationRequest::new("query: review the design").with_expected_structure(["Summary"]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out.text, "still prose");
        assert!(!out.degraded);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_complete_reply_is_not_regenerated() {
        let backend = Arc::new(ScriptedBackend::new().fallback("Summary: fine"));
        let svc = service(backend.clone());
        let out = svc
            .generate(
                GenerationRequest::new("query: review").with_expected_structure(["Summary"]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(!out.reformatted);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_cost_follows_tier_pricing() {
        let backend = Arc::new(ScriptedBackend::new().fallback("one two three four five six seven eight nine ten"));
        let svc = service(backend.clone());
        let cancel = CancellationToken::new();
        let prompt = "one two three four five six seven eight nine ten";

        svc.generate(GenerationRequest::new(prompt).with_tier("advanced"), &cancel)
            .await
            .unwrap();
        let stats = svc.stats().await;
        // 13 prompt and 13 completion tokens at 0.015 / 0.075 per 1k
        let expected = 13.0 / 1000.0 * 0.015 + 13.0 / 1000.0 * 0.075;
        assert!((stats.estimated_cost - expected).abs() < 1e-12);

        // cache hits cost nothing
        svc.generate(GenerationRequest::new(prompt).with_tier("advanced"), &cancel)
            .await
            .unwrap();
        assert!((svc.stats().await.estimated_cost - expected).abs() < 1e-12);
    }
}

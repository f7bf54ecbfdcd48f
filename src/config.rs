//! Configuration management for archflow.
//!
//! Configuration can be set via environment variables:
//! - `OPENROUTER_API_KEY` - Optional. Generation backend key. Without it the placeholder backend is used.
//! - `GENERATION_API_URL` - Optional. Chat-completions endpoint. Defaults to OpenRouter.
//! - `LIGHTWEIGHT_MODEL` / `DEFAULT_MODEL` / `ADVANCED_MODEL` - Optional. The three model tiers.
//! - `TEMPERATURE` - Optional. Default sampling temperature. Defaults to `0.2`.
//! - `MAX_TOKENS` - Optional. Default completion budget. Defaults to `4000`.
//! - `REQUEST_TIMEOUT_SECS` - Optional. Per-call timeout. Defaults to `120`.
//! - `MAX_RETRIES` - Optional. Provider retry bound. Defaults to `3`.
//! - `RETRY_BASE_DELAY_MS` - Optional. Backoff unit (`unit * 2^attempt`). Defaults to `1000`.
//! - `CACHE_TTL_SECS` / `CACHE_CAPACITY` - Optional. Response cache bounds. Default `3600` / `1000`.
//! - `TEMPLATE_DIR` - Optional. Template and performance store. Defaults to `./prompts`.
//! - `TEMPLATE_EXPLORATION_RATE` - Optional. Epsilon for template exploration. Defaults to `0.1`.
//! - `GUIDED_RETRY_LIMIT` / `GAP_FILL_PASSES` - Optional. Self-correction bounds. Both default to `1`.
//! - `SUBTASK_PARALLELISM` - Optional. Concurrent subtasks per composite task. Defaults to `1`.
//! - `RETRIEVAL_TOP_K` / `RETRIEVAL_MIN_RELEVANCE` - Optional. Retrieval bounds. Default `5` / `0.45`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::llm::ModelTier;

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Generation backend configuration.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// API key for the HTTP backend (None = placeholder backend only)
    pub api_key: Option<String>,

    /// Chat-completions endpoint
    pub api_url: String,

    /// Ordered tier table, smallest context first
    pub tiers: Vec<ModelTier>,

    /// Index into `tiers` of the tier used when nothing forces a change
    pub default_tier: usize,

    /// Default sampling temperature
    pub temperature: f64,

    /// Default completion budget
    pub max_tokens: u64,

    /// Timeout applied to every backend call
    pub request_timeout: Duration,

    /// Retries after the first failed attempt
    pub max_retries: u32,

    /// Backoff unit; the wait before retry `n` is `unit * 2^n`
    pub retry_base_delay: Duration,
}

impl GenerationConfig {
    /// The lightweight tier (first entry of the table).
    pub fn lightweight_tier(&self) -> Option<&ModelTier> {
        self.tiers.first()
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: OPENROUTER_API_URL.to_string(),
            tiers: ModelTier::default_table(
                "openai/gpt-4.1-mini",
                "openai/gpt-4.1",
                "anthropic/claude-opus-4",
            ),
            default_tier: 1,
            temperature: 0.2,
            max_tokens: 4000,
            request_timeout: Duration::from_secs(120),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(1000),
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            capacity: 1000,
        }
    }
}

/// Template store and selection configuration.
#[derive(Debug, Clone)]
pub struct TemplateConfig {
    /// Directory holding template files and `performance_metrics.json`
    pub template_dir: Option<PathBuf>,

    /// Probability of picking a random candidate instead of the best one
    pub exploration_rate: f64,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            template_dir: None,
            exploration_rate: 0.1,
        }
    }
}

/// Simulation pipeline bounds.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Guided re-executions allowed per subtask
    pub guided_retry_limit: u32,

    /// Gap-filling passes per composite task
    pub gap_fill_passes: u32,

    /// Subtasks executed concurrently (1 = strict decomposition order)
    pub subtask_parallelism: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            guided_retry_limit: 1,
            gap_fill_passes: 1,
            subtask_parallelism: 1,
        }
    }
}

/// Retrieval configuration.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub min_relevance: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_relevance: 0.45,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub generation: GenerationConfig,
    pub cache: CacheConfig,
    pub templates: TemplateConfig,
    pub pipeline: PipelineConfig,
    pub retrieval: RetrievalConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a numeric variable does not parse
    /// or is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = GenerationConfig::default();

        let tiers = ModelTier::default_table(
            &env_or("LIGHTWEIGHT_MODEL", defaults.tiers[0].model.as_str()),
            &env_or("DEFAULT_MODEL", defaults.tiers[1].model.as_str()),
            &env_or("ADVANCED_MODEL", defaults.tiers[2].model.as_str()),
        );

        let temperature: f64 = parse_env("TEMPERATURE", defaults.temperature)?;
        if !(0.0..=1.0).contains(&temperature) {
            return Err(ConfigError::InvalidValue(
                "TEMPERATURE".to_string(),
                format!("{} is outside [0, 1]", temperature),
            ));
        }

        let generation = GenerationConfig {
            api_key: std::env::var("OPENROUTER_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            api_url: env_or("GENERATION_API_URL", OPENROUTER_API_URL),
            tiers,
            default_tier: defaults.default_tier,
            temperature,
            max_tokens: parse_env("MAX_TOKENS", defaults.max_tokens)?,
            request_timeout: Duration::from_secs(parse_env("REQUEST_TIMEOUT_SECS", 120u64)?),
            max_retries: parse_env("MAX_RETRIES", defaults.max_retries)?,
            retry_base_delay: Duration::from_millis(parse_env("RETRY_BASE_DELAY_MS", 1000u64)?),
        };

        let cache = CacheConfig {
            ttl: Duration::from_secs(parse_env("CACHE_TTL_SECS", 3600u64)?),
            capacity: parse_env("CACHE_CAPACITY", 1000usize)?,
        };

        let exploration_rate: f64 = parse_env("TEMPLATE_EXPLORATION_RATE", 0.1)?;
        let templates = TemplateConfig {
            template_dir: Some(
                std::env::var("TEMPLATE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("prompts")),
            ),
            exploration_rate: exploration_rate.clamp(0.0, 1.0),
        };

        let pipeline = PipelineConfig {
            guided_retry_limit: parse_env("GUIDED_RETRY_LIMIT", 1u32)?,
            gap_fill_passes: parse_env("GAP_FILL_PASSES", 1u32)?,
            subtask_parallelism: parse_env("SUBTASK_PARALLELISM", 1usize)?.max(1),
        };

        let retrieval = RetrievalConfig {
            top_k: parse_env("RETRIEVAL_TOP_K", 5usize)?,
            min_relevance: parse_env("RETRIEVAL_MIN_RELEVANCE", 0.45f64)?.clamp(0.0, 1.0),
        };

        Ok(Self {
            generation,
            cache,
            templates,
            pipeline,
            retrieval,
        })
    }

    /// Create an offline config with no backend key and zero backoff (useful for testing).
    pub fn offline() -> Self {
        let mut config = Self::default();
        config.generation.retry_base_delay = Duration::ZERO;
        config
    }
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(var.to_string(), format!("{}", e))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_constants() {
        let config = Config::default();
        assert_eq!(config.generation.max_retries, 3);
        assert_eq!(config.cache.ttl, Duration::from_secs(3600));
        assert!((config.templates.exploration_rate - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.pipeline.guided_retry_limit, 1);
        assert_eq!(config.pipeline.gap_fill_passes, 1);
        assert_eq!(config.generation.tiers.len(), 3);
        assert_eq!(
            config.generation.lightweight_tier().map(|t| t.model.as_str()),
            Some("openai/gpt-4.1-mini")
        );
    }

    #[test]
    fn test_parse_env_reports_variable_name() {
        std::env::set_var("ARCHFLOW_TEST_BAD_NUMBER", "not-a-number");
        let err = parse_env::<u32>("ARCHFLOW_TEST_BAD_NUMBER", 1).unwrap_err();
        assert!(err.to_string().contains("ARCHFLOW_TEST_BAD_NUMBER"));
        std::env::remove_var("ARCHFLOW_TEST_BAD_NUMBER");
    }

    #[test]
    fn test_parse_env_falls_back_to_default() {
        let value = parse_env::<usize>("ARCHFLOW_TEST_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(value, 7);
    }
}

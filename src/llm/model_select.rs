//! Model tier selection by estimated token volume.
//!
//! # Capacity Model
//! ```text
//! estimated_tokens  = word_count * TOKENS_PER_WORD
//! required_capacity = estimated_tokens * 3 * complexity_factor
//! ```
//! The factor 3 reserves room for the completion on top of the prompt.
//! A tier "fits" when `required_capacity <= 0.8 * max_context`.

use super::{Complexity, ModelTier};

/// Average tokens per whitespace-separated word.
pub const TOKENS_PER_WORD: f64 = 1.3;

/// Share of the context window a request may occupy.
const HEADROOM: f64 = 0.8;

/// Input and output share of the capacity estimate.
const IO_MULTIPLIER: f64 = 3.0;

/// Estimate token count for a text string.
///
/// # Pure Function
/// Deterministic, based on whitespace word count only.
pub fn estimate_tokens(text: &str) -> u64 {
    let words = text.split_whitespace().count();
    (words as f64 * TOKENS_PER_WORD) as u64
}

/// Selects a tier from an ordered table (smallest context first).
///
/// # Algorithm
/// 1. Keep the current tier if it fits with headroom
/// 2. Otherwise take the first larger tier that fits
/// 3. For `High` complexity step one tier past the first fit when possible
/// 4. If nothing fits, take the largest tier
///
/// Best-effort capacity matching; cost is not considered.
#[derive(Debug, Clone)]
pub struct ModelSelector {
    tiers: Vec<ModelTier>,
    current: usize,
}

impl ModelSelector {
    /// Create a selector over `tiers` with `current` as the starting tier.
    ///
    /// An out-of-range `current` is clamped to the last tier.
    pub fn new(tiers: Vec<ModelTier>, current: usize) -> Self {
        let current = current.min(tiers.len().saturating_sub(1));
        Self { tiers, current }
    }

    /// The tier used when nothing forces a change.
    pub fn current(&self) -> Option<&ModelTier> {
        self.tiers.get(self.current)
    }

    /// The smallest tier.
    pub fn lightweight(&self) -> Option<&ModelTier> {
        self.tiers.first()
    }

    /// Look up a tier by its label.
    pub fn tier(&self, name: &str) -> Option<&ModelTier> {
        self.tiers.iter().find(|t| t.name == name)
    }

    pub fn tiers(&self) -> &[ModelTier] {
        &self.tiers
    }

    /// Capacity a prompt needs at the given complexity.
    pub fn required_capacity(prompt: &str, complexity: Complexity) -> f64 {
        estimate_tokens(prompt) as f64 * IO_MULTIPLIER * complexity.factor()
    }

    /// Choose a tier for `prompt`.
    ///
    /// # Returns
    /// `None` only when the tier table is empty.
    pub fn select(&self, prompt: &str, complexity: Complexity) -> Option<&ModelTier> {
        let required = Self::required_capacity(prompt, complexity);
        let fits = |tier: &ModelTier| required <= tier.max_context as f64 * HEADROOM;

        let current = self.current()?;
        if fits(current) {
            return Some(current);
        }

        let first_fit = self
            .tiers
            .iter()
            .enumerate()
            .skip(self.current + 1)
            .find(|(_, tier)| fits(tier))
            .map(|(idx, _)| idx);

        let chosen = match first_fit {
            Some(idx) if complexity == Complexity::High && idx + 1 < self.tiers.len() => idx + 1,
            Some(idx) => idx,
            None => self.tiers.len() - 1,
        };

        tracing::debug!(
            required_capacity = required,
            from = %current.name,
            to = %self.tiers[chosen].name,
            "Stepping up model tier"
        );
        self.tiers.get(chosen)
    }
}

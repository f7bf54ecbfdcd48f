//! Performance-tracked template selection with seedable ε-greedy exploration.

use std::collections::HashMap;
use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{Mutex, RwLock};

use super::store::{PendingWrite, PerformanceStats, TemplateStore};
use super::template::TemplateRecord;
use crate::config::TemplateConfig;

/// No template is registered for an (agent, task type) pair.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("No template for agent {agent_id} and task type {task_type}")]
pub struct TemplateNotFoundError {
    pub agent_id: String,
    pub task_type: String,
}

/// The prompt body chosen for a request.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptChoice {
    /// `None` when the built-in fallback was used.
    pub template_id: Option<String>,
    pub body: String,
}

#[derive(Default)]
struct SelectorState {
    store: TemplateStore,
    last_selected: HashMap<(String, String), String>,
    /// Incremented for every snapshot handed out for writing
    write_seq: u64,
}

impl SelectorState {
    fn stamp(&mut self, write: Option<PendingWrite>) -> Option<(u64, PendingWrite)> {
        let write = write?;
        self.write_seq += 1;
        Some((self.write_seq, write))
    }
}

/// Chooses among competing templates for an (agent, task type) pair.
///
/// # Persistence
/// Snapshots are taken under the state lock and written after it is released.
/// A write is skipped when a newer snapshot of the same file already landed,
/// so concurrent recorders never leave an older history on disk.
///
/// # Invariants
/// - One candidate is always returned directly, without consuming randomness
/// - With `exploration_rate == 0`, the choice is the highest trailing mean,
///   earliest template id on ties
pub struct TemplateSelector {
    state: RwLock<SelectorState>,
    rng: Mutex<StdRng>,
    exploration_rate: f64,
    /// Sequence number last written per file
    written: Mutex<HashMap<PathBuf, u64>>,
}

impl TemplateSelector {
    pub fn new(store: TemplateStore, exploration_rate: f64) -> Self {
        Self::with_rng(store, exploration_rate, StdRng::from_entropy())
    }

    /// Deterministic selector for tests and reproducible runs.
    pub fn with_seed(store: TemplateStore, exploration_rate: f64, seed: u64) -> Self {
        Self::with_rng(store, exploration_rate, StdRng::seed_from_u64(seed))
    }

    fn with_rng(store: TemplateStore, exploration_rate: f64, rng: StdRng) -> Self {
        Self {
            state: RwLock::new(SelectorState {
                store,
                last_selected: HashMap::new(),
                write_seq: 0,
            }),
            rng: Mutex::new(rng),
            exploration_rate: exploration_rate.clamp(0.0, 1.0),
            written: Mutex::new(HashMap::new()),
        }
    }

    /// Build from configuration, loading the on-disk store when a directory is set.
    pub fn from_config(config: &TemplateConfig) -> anyhow::Result<Self> {
        let store = match &config.template_dir {
            Some(dir) => TemplateStore::load(dir)?,
            None => TemplateStore::in_memory(),
        };
        Ok(Self::new(store, config.exploration_rate))
    }

    pub fn exploration_rate(&self) -> f64 {
        self.exploration_rate
    }

    /// Select the template to use for `(agent_id, task_type)`.
    pub async fn select(
        &self,
        agent_id: &str,
        task_type: &str,
    ) -> Result<TemplateRecord, TemplateNotFoundError> {
        let mut state = self.state.write().await;
        let candidates = state.store.candidates(agent_id, task_type);

        let chosen = match candidates.as_slice() {
            [] => {
                return Err(TemplateNotFoundError {
                    agent_id: agent_id.to_string(),
                    task_type: task_type.to_string(),
                })
            }
            [only] => (*only).clone(),
            many => {
                let mut rng = self.rng.lock().await;
                if rng.gen::<f64>() < self.exploration_rate {
                    let pick = many[rng.gen_range(0..many.len())].clone();
                    tracing::info!(template_id = %pick.id, "Exploring random template");
                    pick
                } else {
                    let best = best_by_trailing_mean(many);
                    tracing::info!(
                        template_id = %best.id,
                        score = best.trailing_mean(),
                        "Selected best template"
                    );
                    best.clone()
                }
            }
        };

        state.last_selected.insert(
            (agent_id.to_string(), task_type.to_string()),
            chosen.id.clone(),
        );
        Ok(chosen)
    }

    /// Select a template body, or fall back to `fallback` when none is registered.
    pub async fn choose(&self, agent_id: &str, task_type: &str, fallback: &str) -> PromptChoice {
        match self.select(agent_id, task_type).await {
            Ok(t) => PromptChoice {
                template_id: Some(t.id),
                body: t.body,
            },
            Err(e) => {
                tracing::debug!("{}; using built-in prompt", e);
                PromptChoice {
                    template_id: None,
                    body: fallback.to_string(),
                }
            }
        }
    }

    /// Append a score to the template last selected for the pair, else its first candidate.
    ///
    /// The score is clamped to `[0, 1]`. Persistence failures are logged, not returned.
    pub async fn record_performance(
        &self,
        agent_id: &str,
        task_type: &str,
        score: f64,
        metadata: serde_json::Value,
    ) -> Result<(), TemplateNotFoundError> {
        let pending = {
            let mut state = self.state.write().await;
            let key = (agent_id.to_string(), task_type.to_string());
            let target = match state.last_selected.get(&key) {
                Some(id) => Some(id.clone()),
                None => state
                    .store
                    .candidates(agent_id, task_type)
                    .first()
                    .map(|t| t.id.clone()),
            };
            let Some(template_id) = target else {
                return Err(TemplateNotFoundError {
                    agent_id: agent_id.to_string(),
                    task_type: task_type.to_string(),
                });
            };
            append(&mut state, &template_id, score, metadata)
        };
        self.persist(pending).await;
        Ok(())
    }

    /// Append a score to a specific template. Returns `false` for an unknown id.
    pub async fn record_performance_for(
        &self,
        template_id: &str,
        score: f64,
        metadata: serde_json::Value,
    ) -> bool {
        let pending = {
            let mut state = self.state.write().await;
            if state.store.get(template_id).is_none() {
                return false;
            }
            append(&mut state, template_id, score, metadata)
        };
        self.persist(pending).await;
        true
    }

    /// Add or bump the template for the pair and write its file.
    pub async fn add_template_version(
        &self,
        agent_id: &str,
        task_type: &str,
        body: &str,
    ) -> anyhow::Result<String> {
        let (id, pending) = {
            let mut state = self.state.write().await;
            let id = state.store.add_template_version(agent_id, task_type, body);
            let write = state.store.template_write(&id)?;
            (id, state.stamp(write))
        };
        if let Some((seq, write)) = pending {
            self.write_if_newest(seq, &write).await?;
        }
        Ok(id)
    }

    async fn persist(&self, pending: Option<(u64, PendingWrite)>) {
        let Some((seq, write)) = pending else {
            return;
        };
        if let Err(e) = self.write_if_newest(seq, &write).await {
            tracing::warn!("Failed to persist template performance: {:#}", e);
        }
    }

    async fn write_if_newest(&self, seq: u64, write: &PendingWrite) -> anyhow::Result<()> {
        let mut written = self.written.lock().await;
        let last = written.get(&write.path).copied().unwrap_or(0);
        if seq <= last {
            tracing::debug!(seq, last, "Skipping stale write of {}", write.path.display());
            return Ok(());
        }
        write.persist().await?;
        written.insert(write.path.clone(), seq);
        Ok(())
    }

    pub async fn performance_stats(&self, template_id: &str) -> Option<PerformanceStats> {
        self.state.read().await.store.performance_stats(template_id)
    }

    pub async fn template(&self, template_id: &str) -> Option<TemplateRecord> {
        self.state.read().await.store.get(template_id).cloned()
    }
}

/// Highest trailing mean; the first (earliest id) wins ties.
fn best_by_trailing_mean<'a>(candidates: &[&'a TemplateRecord]) -> &'a TemplateRecord {
    let mut best = candidates[0];
    let mut best_score = best.trailing_mean();
    for c in &candidates[1..] {
        let score = c.trailing_mean();
        if score > best_score {
            best = c;
            best_score = score;
        }
    }
    best
}

/// Append under the state lock and snapshot the history file for writing.
fn append(
    state: &mut SelectorState,
    template_id: &str,
    score: f64,
    metadata: serde_json::Value,
) -> Option<(u64, PendingWrite)> {
    if !state.store.append_performance(template_id, score, metadata) {
        return None;
    }
    tracing::info!(
        template_id = %template_id,
        score = score.clamp(0.0, 1.0),
        "Recorded template performance"
    );
    match state.store.metrics_write() {
        Ok(write) => state.stamp(write),
        Err(e) => {
            tracing::warn!(template_id = %template_id, "Failed to serialize template performance: {:#}", e);
            None
        }
    }
}

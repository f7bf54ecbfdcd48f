//! Agent execution context - shared services handed to every agent.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::llm::GenerationService;
use crate::prompts::{TemplateSelector, TemplateStore};
use crate::retrieval::{InMemoryRetriever, Retriever, DEFAULT_COLLECTION};

/// Shared context passed to all agents during execution.
///
/// # Thread Safety
/// Services are behind `Arc` and use interior mutability; cloning the
/// context is cheap and shares the same cache, templates and token.
#[derive(Clone)]
pub struct AgentContext {
    /// Application configuration
    pub config: Config,

    /// Generation service (tier selection, cache, retries, degradation)
    pub generation: Arc<GenerationService>,

    /// Retrieval backend for supporting context
    pub retriever: Arc<dyn Retriever>,

    /// Prompt template selection
    pub templates: Arc<TemplateSelector>,

    /// Cooperative cancellation, passed to every generation call
    pub cancel_token: CancellationToken,

    /// Workflow the current task belongs to; also names its retrieval collection
    pub workflow_id: Option<String>,
}

impl AgentContext {
    pub fn new(
        config: Config,
        generation: Arc<GenerationService>,
        retriever: Arc<dyn Retriever>,
        templates: Arc<TemplateSelector>,
    ) -> Self {
        Self {
            config,
            generation,
            retriever,
            templates,
            cancel_token: CancellationToken::new(),
            workflow_id: None,
        }
    }

    /// Context with the configured backend, an empty in-memory retriever and
    /// the configured template store.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let generation = Arc::new(GenerationService::from_config(&config));
        let templates = Arc::new(TemplateSelector::from_config(&config.templates)?);
        Ok(Self::new(
            config,
            generation,
            Arc::new(InMemoryRetriever::new()),
            templates,
        ))
    }

    /// Fully offline context: placeholder backend, in-memory retrieval and templates.
    pub fn offline(config: Config) -> Self {
        let generation = Arc::new(GenerationService::from_config(&config));
        let templates = Arc::new(TemplateSelector::new(
            TemplateStore::in_memory(),
            config.templates.exploration_rate,
        ));
        Self::new(config, generation, Arc::new(InMemoryRetriever::new()), templates)
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// Context scoped to one workflow, sharing every service.
    pub fn for_workflow(&self, workflow_id: &str) -> Self {
        let mut ctx = self.clone();
        ctx.workflow_id = Some(workflow_id.to_string());
        ctx
    }

    /// Retrieval collection for this context: the workflow's own documents.
    pub fn collection(&self) -> &str {
        self.workflow_id.as_deref().unwrap_or(DEFAULT_COLLECTION)
    }

    /// Check if cooperative cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Offline context over a scripted backend with greedy template selection.
    #[cfg(test)]
    pub(crate) fn scripted(backend: Arc<crate::llm::testing::ScriptedBackend>) -> Self {
        let config = Config::offline();
        let generation = Arc::new(GenerationService::new(backend, &config));
        let templates = Arc::new(TemplateSelector::with_seed(TemplateStore::in_memory(), 0.0, 7));
        Self::new(config, generation, Arc::new(InMemoryRetriever::new()), templates)
    }
}

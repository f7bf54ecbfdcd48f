//! Single-shot analysis agents (DDA, KAA, RAA, TAA, OAA, AEA, MTA).

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::context::AgentContext;
use super::types::{AgentId, Capability, TaskResult};
use super::Agent;
use crate::llm::{scope_digest, Complexity, GenerationRequest};
use crate::pipeline::extract_object;
use crate::prompts::{builtin, render_template};
use crate::retrieval::render_context;
use crate::task::Task;

/// One prompt, one default-tier generation, one structured parse.
pub struct AnalysisAgent {
    id: AgentId,
    description: String,
    capabilities: Vec<Capability>,
}

impl AnalysisAgent {
    pub fn new(id: AgentId, description: impl Into<String>, capabilities: Vec<Capability>) -> Self {
        Self {
            id,
            description: description.into(),
            capabilities,
        }
    }

    async fn context_for(&self, task: &Task, ctx: &AgentContext) -> String {
        let chunks = ctx
            .retriever
            .retrieve(
                ctx.collection(),
                task.description(),
                ctx.config.retrieval.top_k,
                ctx.config.retrieval.min_relevance,
            )
            .await;
        if chunks.is_empty() {
            "(no relevant context found)".to_string()
        } else {
            render_context(&chunks)
        }
    }
}

#[async_trait]
impl Agent for AnalysisAgent {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    async fn execute(&self, task: &Task, ctx: &AgentContext) -> TaskResult {
        let task_type = task.task_type().as_str();
        let choice = ctx
            .templates
            .choose(self.id.as_str(), task_type, builtin::ANALYSIS)
            .await;
        let input = serde_json::to_string_pretty(task.input()).unwrap_or_else(|_| task.input().to_string());
        let scope = scope_digest(&[task.input()]);
        let context = self.context_for(task, ctx).await;
        let prompt = render_template(
            &choice.body,
            &[
                ("agent_id", self.id.as_str()),
                ("task_type", task_type),
                ("description", task.description()),
                ("input", input.as_str()),
                ("context", context.as_str()),
                ("scope", scope.as_str()),
            ],
        );

        let request = GenerationRequest::new(prompt).with_complexity(Complexity::Medium);
        let generation = match ctx.generation.generate(request, &ctx.cancel_token).await {
            Ok(g) => g,
            Err(e) => {
                info!(agent_id = %self.id, task_id = %task.id(), "Analysis cancelled: {}", e);
                return TaskResult::error(e.to_string());
            }
        };

        let (result, score) = if generation.degraded {
            warn!(agent_id = %self.id, task_id = %task.id(), "Generation degraded, returning raw text");
            let reason = generation.reason.map(|r| r.to_string()).unwrap_or_default();
            (
                TaskResult::partial(json!({"raw": generation.text})).with_message(format!("Generation degraded: {}", reason)),
                0.0,
            )
        } else {
            match extract_object(&generation.text) {
                Ok(map) => (TaskResult::success(Value::Object(map)), 1.0),
                Err(e) => {
                    debug!(agent_id = %self.id, "Unstructured reply: {}", e.reason);
                    (TaskResult::partial(json!({"raw": generation.text})), 0.5)
                }
            }
        };

        if let Some(template_id) = &choice.template_id {
            ctx.templates
                .record_performance_for(template_id, score, json!({"task_id": task.id()}))
                .await;
        }
        result.with_model(generation.model)
    }

    fn description(&self) -> &str {
        &self.description
    }
}

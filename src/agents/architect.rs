//! Composite design agent ("SAA").
//!
//! Runs the [`SimulationPipeline`] for every design task and keeps a cache of
//! finished designs keyed by the hash of their requirements and constraints.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::context::AgentContext;
use super::types::{AgentId, Capability, TaskResult};
use super::Agent;
use crate::pipeline::{CompositeGoal, SimulationPipeline};
use crate::task::{Task, TaskType};

/// Upstream artifacts folded into the design constraints, in order.
const CONSTRAINT_ARTIFACTS: [&str; 3] = ["analyze_rules", "analyze_technology", "analyze_optimization"];

/// Stable fingerprint of a design request.
///
/// `serde_json` maps are key-sorted, so logically equal inputs hash equally.
pub fn requirements_hash(requirements: &Value, constraints: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(requirements.to_string().as_bytes());
    hasher.update(constraints.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

pub struct CompositeDesignAgent {
    id: AgentId,
    capabilities: Vec<Capability>,
    design_cache: RwLock<HashMap<String, Value>>,
}

impl CompositeDesignAgent {
    pub const CODE: &'static str = "SAA";

    pub fn default_capabilities() -> Vec<Capability> {
        ["architecture_design", "dependency_analysis", "system_design"]
            .into_iter()
            .map(Capability::new)
            .collect()
    }

    pub fn new() -> Self {
        Self::with_capabilities(Self::default_capabilities())
    }

    pub fn with_capabilities(capabilities: Vec<Capability>) -> Self {
        Self {
            id: AgentId::new(Self::CODE),
            capabilities,
            design_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn handles(task_type: &TaskType) -> bool {
        matches!(
            task_type,
            TaskType::CreateArchitectureDocument | TaskType::CreateCompleteAdd | TaskType::ArchitectureDesign
        )
    }

    pub async fn cached_designs(&self) -> usize {
        self.design_cache.read().await.len()
    }

    async fn design(&self, task: &Task, ctx: &AgentContext) -> TaskResult {
        let requirements = requirements_of(task.input());
        let constraints = constraints_of(task.input());
        let hash = requirements_hash(&requirements, &constraints);

        if let Some(cached) = self.design_cache.read().await.get(&hash) {
            info!(task_id = %task.id(), hash = &hash[..8], "Returning cached design");
            return TaskResult::success(cached.clone()).with_message("Returned cached design");
        }

        let goal = CompositeGoal {
            agent_id: self.id.clone(),
            description: task.description().to_string(),
            task_type: TaskType::ArchitectureDesign,
            requirements,
            constraints,
        };
        let output = match SimulationPipeline::from_config(&ctx.config).run(&goal, ctx).await {
            Ok(output) => output,
            Err(e) => {
                warn!(task_id = %task.id(), "{}", e);
                return TaskResult::error(e.to_string());
            }
        };

        let data = json!({
            "architecture": output.artifact,
            "metadata": {
                "timestamp": Utc::now().to_rfc3339(),
                "agent_id": self.id,
                "task_type": task.task_type(),
                "requirements_hash": &hash[..8],
                "validation": output.validation,
                "guided_reexecutions": output.guided_reexecutions(),
                "gap_fill_passes": output.gap_fill_passes,
            }
        });
        let models: Vec<&str> = output.records.iter().map(|r| r.actual.model.as_str()).collect();

        let result = TaskResult {
            status: output.status,
            data: data.clone(),
            message: None,
            model_used: models.first().map(|m| m.to_string()),
        };
        if result.is_error() {
            return result.with_message("Every design subtask failed");
        }
        self.design_cache.write().await.insert(hash, data);
        result
    }
}

impl Default for CompositeDesignAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for CompositeDesignAgent {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    async fn execute(&self, task: &Task, ctx: &AgentContext) -> TaskResult {
        if !Self::handles(task.task_type()) {
            return TaskResult::error(format!("Unknown task type: {}", task.task_type()));
        }
        self.design(task, ctx).await
    }

    fn description(&self) -> &str {
        "System Architect Agent"
    }
}

/// `requirements`, else the requirements-analysis artifact, else the raw documents.
fn requirements_of(input: &Value) -> Value {
    if let Some(req) = input.get("requirements") {
        return req.clone();
    }
    if let Some(req) = input.pointer("/artifacts/analyze_requirements") {
        return req.clone();
    }
    json!({"documents": input.get("documents").cloned().unwrap_or(Value::Null)})
}

/// `constraints`, else whichever analysis artifacts are present.
fn constraints_of(input: &Value) -> Value {
    if let Some(cons) = input.get("constraints") {
        return cons.clone();
    }
    let mut found = Map::new();
    if let Some(artifacts) = input.get("artifacts") {
        for key in CONSTRAINT_ARTIFACTS {
            if let Some(value) = artifacts.get(key) {
                found.insert(key.to_string(), value.clone());
            }
        }
    }
    Value::Object(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::agents::ResultStatus;
    use crate::llm::testing::ScriptedBackend;
    use crate::task::TaskId;

    fn design_task(input: Value) -> Task {
        Task::with_id(
            TaskId::new("SAA_1"),
            AgentId::new("SAA"),
            "Create initial architecture design documents",
            TaskType::CreateArchitectureDocument,
            input,
        )
        .unwrap()
    }

    #[test]
    fn test_hash_ignores_key_order() {
        let a = json!({"x": 1, "y": [1, 2]});
        let b: Value = serde_json::from_str(r#"{"y": [1, 2], "x": 1}"#).unwrap();
        assert_eq!(requirements_hash(&a, &json!({})), requirements_hash(&b, &json!({})));
        assert_ne!(requirements_hash(&a, &json!({})), requirements_hash(&a, &json!({"c": 1})));
    }

    #[test]
    fn test_inputs_fall_back_to_artifacts_and_documents() {
        let input = json!({
            "documents": {"a.md": "text"},
            "artifacts": {"analyze_technology": {"stack": "rust"}, "process_documents": {}},
        });
        assert_eq!(requirements_of(&input), json!({"documents": {"a.md": "text"}}));
        assert_eq!(constraints_of(&input), json!({"analyze_technology": {"stack": "rust"}}));

        let input = json!({"artifacts": {"analyze_requirements": {"features": ["x"]}}});
        assert_eq!(requirements_of(&input), json!({"features": ["x"]}));
        assert_eq!(constraints_of(&input), json!({}));
    }

    #[tokio::test]
    async fn test_design_is_synthesized_and_cached() {
        let backend = Arc::new(ScriptedBackend::new().fallback(r#"{"complete": true, "components": ["core"]}"#));
        let ctx = AgentContext::scripted(backend.clone());
        let agent = CompositeDesignAgent::new();
        let task = design_task(json!({"requirements": {"features": ["search"]}}));

        let first = agent.execute(&task, &ctx).await;
        assert_eq!(first.status, ResultStatus::Success);
        assert_eq!(
            first.data["architecture"],
            json!({
                "components": ["core"],
                "interfaces": [],
                "data_flows": [],
                "patterns": [],
                "complete": true,
            })
        );
        assert_eq!(first.data["metadata"]["guided_reexecutions"], 0);
        let calls = backend.calls();

        let second = agent.execute(&task, &ctx).await;
        assert_eq!(second.data, first.data);
        assert_eq!(backend.calls(), calls);
        assert_eq!(agent.cached_designs().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_task_type_is_error() {
        let ctx = AgentContext::scripted(Arc::new(ScriptedBackend::new()));
        let task = Task::with_id(
            TaskId::new("SAA_2"),
            AgentId::new("SAA"),
            "Summarize",
            TaskType::parse("summarize"),
            json!({}),
        )
        .unwrap();
        let result = CompositeDesignAgent::new().execute(&task, &ctx).await;
        assert!(result.is_error());
        assert_eq!(result.message.as_deref(), Some("Unknown task type: summarize"));
    }

    #[tokio::test]
    async fn test_cancellation_is_error_result() {
        let backend = Arc::new(ScriptedBackend::new().fallback("{}"));
        let ctx = AgentContext::scripted(backend.clone());
        ctx.cancel_token.cancel();
        let agent = CompositeDesignAgent::new();
        let result = agent.execute(&design_task(json!({})), &ctx).await;
        assert!(result.is_error());
        assert_eq!(backend.calls(), 0);
        assert_eq!(agent.cached_designs().await, 0);
    }
}

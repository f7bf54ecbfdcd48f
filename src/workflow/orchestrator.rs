//! Workflow orchestrator: phase state machine, delegation and result collection.
//!
//! # Locking
//! When both are held, `workflows` is always taken before `registry`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::events::{WorkflowEvent, WorkflowListener};
use super::phase::{Phase, UnknownPhase};
use super::state::{WorkflowSnapshot, WorkflowState, WorkflowStatus};
use crate::agents::{
    execute_task, AgentContext, AgentId, AgentNotRegisteredError, AgentRecord, AgentRegistry, ExecutionOutcome,
    TaskResult,
};
use crate::retrieval::SourceDocument;
use crate::task::{Task, TaskError, TaskId, TaskStatus, TaskType};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkflowError {
    #[error("Unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error(transparent)]
    UnknownPhase(#[from] UnknownPhase),

    #[error(transparent)]
    AgentNotRegistered(#[from] AgentNotRegisteredError),

    #[error("Workflow {workflow_id} is {status}")]
    NotActive {
        workflow_id: String,
        status: WorkflowStatus,
    },

    #[error(transparent)]
    Task(#[from] TaskError),
}

/// A request to hand work to an agent.
#[derive(Debug, Clone)]
pub struct Delegation {
    pub agent_id: AgentId,
    pub description: String,
    pub task_type: TaskType,
    pub input: Value,
    pub dependencies: Vec<TaskId>,
    pub priority: u8,
}

impl Delegation {
    pub fn new(agent_id: AgentId, description: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            agent_id,
            description: description.into(),
            task_type,
            input: Value::Object(Default::default()),
            dependencies: Vec::new(),
            priority: 1,
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn depends_on(mut self, dependencies: Vec<TaskId>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

/// Message on the delegation outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TaskMessage {
    workflow_id: String,
    task_id: TaskId,
    agent_id: AgentId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseTransition {
    pub previous: Phase,
    pub current: Phase,
    pub spawned: Vec<TaskId>,
}

/// What one `run_pending` poll did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub completed: Vec<TaskId>,
    pub failed: Vec<TaskId>,
    /// Still queued, waiting on dependencies
    pub deferred: Vec<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectedResults {
    pub results: Vec<(TaskId, TaskResult)>,
    pub missing: Vec<TaskId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalReport {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub completed_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub artifacts: Vec<String>,
}

pub struct WorkflowOrchestrator {
    registry: RwLock<AgentRegistry>,
    workflows: RwLock<HashMap<String, WorkflowState>>,
    outbox: Mutex<VecDeque<TaskMessage>>,
    listeners: RwLock<Vec<Arc<dyn WorkflowListener>>>,
    ctx: AgentContext,
}

impl WorkflowOrchestrator {
    pub fn new(registry: AgentRegistry, ctx: AgentContext) -> Self {
        Self {
            registry: RwLock::new(registry),
            workflows: RwLock::new(HashMap::new()),
            outbox: Mutex::new(VecDeque::new()),
            listeners: RwLock::new(Vec::new()),
            ctx,
        }
    }

    pub async fn add_listener(&self, listener: Arc<dyn WorkflowListener>) {
        self.listeners.write().await.push(listener);
    }

    async fn emit(&self, event: WorkflowEvent) {
        debug!(workflow_id = %event.workflow_id(), ?event, "Workflow event");
        for listener in self.listeners.read().await.iter() {
            listener.on_event(&event);
        }
    }

    /// Start a workflow over `documents` and enter `document_discovery`.
    ///
    /// Documents are indexed in the retriever under the workflow id. The
    /// discovery task is delegated only if its agent is registered.
    pub async fn start(&self, name: &str, documents: Vec<SourceDocument>) -> String {
        let workflow_id = format!(
            "{}_{}_{}",
            name,
            Utc::now().format("%Y%m%d_%H%M%S"),
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let chunks = self.ctx.retriever.index(&workflow_id, &documents).await;
        let state = WorkflowState::new(workflow_id.clone(), name.to_string(), &documents);
        self.workflows.write().await.insert(workflow_id.clone(), state);
        info!(workflow_id = %workflow_id, documents = documents.len(), chunks, "Started workflow");
        self.emit(WorkflowEvent::Started {
            workflow_id: workflow_id.clone(),
            name: name.to_string(),
            documents: documents.len(),
        })
        .await;

        self.spawn_phase(&workflow_id, Phase::DocumentDiscovery).await;
        workflow_id
    }

    /// Move the workflow to `next_phase` and delegate that phase's tasks.
    ///
    /// # Errors
    /// - `UnknownPhase` for an unrecognized tag; the workflow is untouched
    /// - `UnknownWorkflow` / `NotActive`
    pub async fn advance(&self, workflow_id: &str, next_phase: &str) -> Result<PhaseTransition, WorkflowError> {
        let next: Phase = next_phase.parse()?;
        let previous = {
            let mut workflows = self.workflows.write().await;
            let state = active_state(&mut workflows, workflow_id)?;
            state.enter(next)
        };
        info!(workflow_id = %workflow_id, from = %previous, to = %next, "Advanced workflow phase");

        let spawned = self.spawn_phase(workflow_id, next).await;
        self.emit(WorkflowEvent::PhaseAdvanced {
            workflow_id: workflow_id.to_string(),
            from: previous,
            to: next,
            spawned: spawned.clone(),
        })
        .await;
        Ok(PhaseTransition {
            previous,
            current: next,
            spawned,
        })
    }

    async fn spawn_phase(&self, workflow_id: &str, phase: Phase) -> Vec<TaskId> {
        let mut spawned = Vec::new();
        for handler in phase.handlers() {
            let mut input = match self.workflows.read().await.get(workflow_id) {
                Some(state) => state.task_input(),
                None => return spawned,
            };
            if let Some(obj) = input.as_object_mut() {
                for (key, value) in &handler.extra_input {
                    obj.insert(key.to_string(), Value::String(value.to_string()));
                }
            }
            let delegation = Delegation::new(handler.agent_id.clone(), handler.description, handler.task_type)
                .with_input(input);
            match self.delegate(workflow_id, delegation).await {
                Ok(task_id) => spawned.push(task_id),
                Err(WorkflowError::AgentNotRegistered(e)) => {
                    warn!(workflow_id = %workflow_id, phase = %phase, "{}; no task spawned", e);
                }
                Err(e) => warn!(workflow_id = %workflow_id, phase = %phase, "Could not delegate: {}", e),
            }
        }
        spawned
    }

    /// Create a task for `delegation.agent_id` and queue it for delivery.
    ///
    /// # Errors
    /// `AgentNotRegistered` leaves the workflow untouched.
    pub async fn delegate(&self, workflow_id: &str, delegation: Delegation) -> Result<TaskId, WorkflowError> {
        if !self.registry.read().await.is_registered(&delegation.agent_id) {
            return Err(AgentNotRegisteredError {
                agent_id: delegation.agent_id,
            }
            .into());
        }
        let task = Task::new(
            delegation.agent_id.clone(),
            delegation.description,
            delegation.task_type.clone(),
            delegation.input,
        )?
        .with_priority(delegation.priority)
        .with_dependencies(delegation.dependencies);
        let task_id = task.id().clone();

        {
            let mut workflows = self.workflows.write().await;
            let state = active_state(&mut workflows, workflow_id)?;
            self.registry
                .write()
                .await
                .assign(&delegation.agent_id, task_id.clone())?;
            state.tasks.insert(task);
        }
        self.outbox.lock().await.push_back(TaskMessage {
            workflow_id: workflow_id.to_string(),
            task_id: task_id.clone(),
            agent_id: delegation.agent_id.clone(),
        });
        info!(
            workflow_id = %workflow_id,
            task_id = %task_id,
            agent_id = %delegation.agent_id,
            task_type = %delegation.task_type,
            "Delegated task"
        );
        self.emit(WorkflowEvent::TaskDelegated {
            workflow_id: workflow_id.to_string(),
            task_id: task_id.clone(),
            agent_id: delegation.agent_id,
            task_type: delegation.task_type,
        })
        .await;
        Ok(task_id)
    }

    pub async fn status(&self, workflow_id: &str) -> Result<WorkflowSnapshot, WorkflowError> {
        self.workflows
            .read()
            .await
            .get(workflow_id)
            .map(WorkflowState::snapshot)
            .ok_or_else(|| WorkflowError::UnknownWorkflow(workflow_id.to_string()))
    }

    /// Deliver every queued message for `workflow_id` to its agent, in order.
    ///
    /// Deferred tasks go back on the queue for the next poll. Outputs of
    /// completed tasks are stored as artifacts under their task type.
    pub async fn run_pending(&self, workflow_id: &str) -> Result<RunReport, WorkflowError> {
        {
            let mut workflows = self.workflows.write().await;
            active_state(&mut workflows, workflow_id)?;
        }
        let batch: Vec<TaskMessage> = {
            let mut outbox = self.outbox.lock().await;
            let (mine, others): (VecDeque<_>, VecDeque<_>) =
                outbox.drain(..).partition(|m| m.workflow_id == workflow_id);
            *outbox = others;
            mine.into_iter().collect()
        };

        let ctx = self.ctx.for_workflow(workflow_id);
        let mut report = RunReport::default();
        let mut requeue = Vec::new();
        for message in batch {
            let snapshot = {
                let workflows = self.workflows.read().await;
                workflows
                    .get(workflow_id)
                    .and_then(|s| s.tasks.get(&message.task_id).map(|t| (t.clone(), s.tasks.clone())))
            };
            let Some((mut task, store)) = snapshot else {
                warn!(workflow_id = %workflow_id, task_id = %message.task_id, "Queued task no longer exists");
                continue;
            };
            let agent = match self.registry.write().await.create_agent(&message.agent_id) {
                Ok(agent) => agent,
                Err(e) => {
                    warn!(workflow_id = %workflow_id, task_id = %message.task_id, "{}", e);
                    continue;
                }
            };

            let outcome = execute_task(agent.as_ref(), &mut task, &store, &ctx).await;
            self.settle(workflow_id, &message, task, outcome, &mut report, &mut requeue)
                .await;
        }

        if !requeue.is_empty() {
            self.outbox.lock().await.extend(requeue);
        }
        info!(
            workflow_id = %workflow_id,
            completed = report.completed.len(),
            failed = report.failed.len(),
            deferred = report.deferred.len(),
            "Processed pending tasks"
        );
        Ok(report)
    }

    async fn settle(
        &self,
        workflow_id: &str,
        message: &TaskMessage,
        task: Task,
        outcome: ExecutionOutcome,
        report: &mut RunReport,
        requeue: &mut Vec<TaskMessage>,
    ) {
        let task_type = task.task_type().as_str().to_string();
        {
            let mut workflows = self.workflows.write().await;
            let Some(state) = workflows.get_mut(workflow_id) else {
                return;
            };
            if let ExecutionOutcome::Completed(result) | ExecutionOutcome::AlreadyCompleted(result) = &outcome {
                state.artifacts.insert(task_type, result.data.clone());
            }
            state.tasks.insert(task);
            if !matches!(outcome, ExecutionOutcome::Deferred(_)) {
                self.registry
                    .write()
                    .await
                    .release(&message.agent_id, &message.task_id);
            }
        }

        let event = match outcome {
            ExecutionOutcome::Completed(result) | ExecutionOutcome::AlreadyCompleted(result) => {
                report.completed.push(message.task_id.clone());
                WorkflowEvent::TaskCompleted {
                    workflow_id: workflow_id.to_string(),
                    task_id: message.task_id.clone(),
                    agent_id: message.agent_id.clone(),
                    status: result.status,
                }
            }
            ExecutionOutcome::Failed(result) => {
                report.failed.push(message.task_id.clone());
                WorkflowEvent::TaskFailed {
                    workflow_id: workflow_id.to_string(),
                    task_id: message.task_id.clone(),
                    agent_id: message.agent_id.clone(),
                    message: result.message,
                }
            }
            ExecutionOutcome::Deferred(blocked) => {
                report.deferred.push(message.task_id.clone());
                requeue.push(message.clone());
                WorkflowEvent::TaskDeferred {
                    workflow_id: workflow_id.to_string(),
                    task_id: message.task_id.clone(),
                    dependency_id: blocked.dependency_id,
                }
            }
            ExecutionOutcome::Rejected(e) => {
                warn!(workflow_id = %workflow_id, task_id = %message.task_id, "Task rejected: {}", e);
                return;
            }
        };
        self.emit(event).await;
    }

    /// Results of the given tasks that have completed, and the ids still missing.
    pub async fn collect_results(
        &self,
        workflow_id: &str,
        task_ids: &[TaskId],
    ) -> Result<CollectedResults, WorkflowError> {
        let workflows = self.workflows.read().await;
        let state = workflows
            .get(workflow_id)
            .ok_or_else(|| WorkflowError::UnknownWorkflow(workflow_id.to_string()))?;
        let mut collected = CollectedResults {
            results: Vec::new(),
            missing: Vec::new(),
        };
        for id in task_ids {
            match state.tasks.get(id).filter(|t| t.status() == TaskStatus::Completed) {
                Some(task) => {
                    if let Some(result) = task.result() {
                        collected.results.push((id.clone(), result.clone()));
                    }
                }
                None => collected.missing.push(id.clone()),
            }
        }
        Ok(collected)
    }

    /// Mark the workflow completed.
    pub async fn finalize(&self, workflow_id: &str) -> Result<FinalReport, WorkflowError> {
        let report = {
            let mut workflows = self.workflows.write().await;
            let state = active_state(&mut workflows, workflow_id)?;
            let now = Utc::now();
            let current = state.current_phase;
            if !state.completed_phases.contains(&current) {
                state.completed_phases.push(current);
            }
            state.status = WorkflowStatus::Completed;
            state.completed_at = Some(now);
            FinalReport {
                workflow_id: workflow_id.to_string(),
                status: state.status,
                completed_at: now,
                duration_secs: state.duration_secs().unwrap_or_default(),
                artifacts: state.artifacts.keys().cloned().collect(),
            }
        };
        info!(workflow_id = %workflow_id, duration_secs = report.duration_secs, "Finalized workflow");
        self.emit(WorkflowEvent::Finalized {
            workflow_id: workflow_id.to_string(),
            duration_secs: report.duration_secs,
        })
        .await;
        Ok(report)
    }

    /// Stop every active workflow, cancel in-flight work and deactivate all agents.
    pub async fn shutdown(&self) {
        self.ctx.cancel_token.cancel();
        let stopped: Vec<String> = {
            let mut workflows = self.workflows.write().await;
            let ids: Vec<String> = workflows
                .values_mut()
                .filter(|s| s.is_active())
                .map(|s| {
                    s.status = WorkflowStatus::Stopped;
                    s.id.clone()
                })
                .collect();
            self.registry.write().await.shutdown_all();
            ids
        };
        self.outbox.lock().await.clear();
        for workflow_id in stopped {
            info!(workflow_id = %workflow_id, "Stopped workflow");
            self.emit(WorkflowEvent::Stopped { workflow_id }).await;
        }
    }

    /// Snapshots of every workflow, oldest first.
    pub async fn list(&self) -> Vec<WorkflowSnapshot> {
        let workflows = self.workflows.read().await;
        let mut snapshots: Vec<WorkflowSnapshot> = workflows.values().map(WorkflowState::snapshot).collect();
        snapshots.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        snapshots
    }

    pub async fn agents(&self) -> Vec<AgentRecord> {
        self.registry.read().await.records()
    }

    pub async fn artifact(&self, workflow_id: &str, key: &str) -> Option<Value> {
        self.workflows
            .read()
            .await
            .get(workflow_id)
            .and_then(|s| s.artifacts.get(key).cloned())
    }

    /// Messages still queued for `workflow_id`.
    pub async fn pending(&self, workflow_id: &str) -> usize {
        self.outbox
            .lock()
            .await
            .iter()
            .filter(|m| m.workflow_id == workflow_id)
            .count()
    }
}

fn active_state<'a>(
    workflows: &'a mut HashMap<String, WorkflowState>,
    workflow_id: &str,
) -> Result<&'a mut WorkflowState, WorkflowError> {
    let state = workflows
        .get_mut(workflow_id)
        .ok_or_else(|| WorkflowError::UnknownWorkflow(workflow_id.to_string()))?;
    if !state.is_active() {
        return Err(WorkflowError::NotActive {
            workflow_id: workflow_id.to_string(),
            status: state.status,
        });
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::agents::{AgentStatus, ResultStatus};
    use crate::llm::testing::ScriptedBackend;
    use crate::workflow::events::BroadcastListener;

    const DESIGN_REPLY: &str = r#"{"complete": true, "components": ["core"]}"#;

    fn orchestrator(backend: ScriptedBackend) -> (WorkflowOrchestrator, Arc<ScriptedBackend>) {
        let backend = Arc::new(backend);
        let ctx = AgentContext::scripted(backend.clone());
        (WorkflowOrchestrator::new(AgentRegistry::with_default_roster(), ctx), backend)
    }

    fn docs() -> Vec<SourceDocument> {
        vec![
            SourceDocument::new("requirements.md", "Customers search the catalog and place orders"),
            SourceDocument::new("rules.md", "All services must expose health checks"),
        ]
    }

    #[tokio::test]
    async fn test_start_delegates_discovery() {
        let (orch, _) = orchestrator(ScriptedBackend::new().fallback("{}"));
        let listener = Arc::new(BroadcastListener::new(16));
        let mut rx = listener.subscribe();
        orch.add_listener(listener).await;

        let id = orch.start("W", docs()).await;
        assert!(id.starts_with("W_"));
        let snap = orch.status(&id).await.unwrap();
        assert_eq!(snap.current_phase, Phase::DocumentDiscovery);
        assert_eq!(snap.task_counts.pending, 1);
        assert_eq!(snap.tasks[0].agent_id, AgentId::new("DDA"));
        assert!(snap.artifacts.contains(&"documents".to_string()));

        assert!(matches!(rx.try_recv().unwrap(), WorkflowEvent::Started { documents: 2, .. }));
        assert!(matches!(rx.try_recv().unwrap(), WorkflowEvent::TaskDelegated { .. }));
        let dda = orch
            .agents()
            .await
            .into_iter()
            .find(|r| r.agent_id == AgentId::new("DDA"))
            .unwrap();
        assert_eq!(dda.status, AgentStatus::Assigned);
    }

    #[tokio::test]
    async fn test_advance_to_design_spawns_one_task_and_synthesizes() {
        let (orch, _) = orchestrator(ScriptedBackend::new().fallback(DESIGN_REPLY));
        let id = orch.start("W", docs()).await;

        let transition = orch.advance(&id, "architecture_design").await.unwrap();
        assert_eq!(transition.previous, Phase::DocumentDiscovery);
        assert_eq!(transition.current, Phase::ArchitectureDesign);
        assert_eq!(transition.spawned.len(), 1);

        let report = orch.run_pending(&id).await.unwrap();
        assert_eq!(report.completed.len(), 2);
        assert!(report.failed.is_empty());

        let design = orch.artifact(&id, "create_architecture_document").await.unwrap();
        assert_eq!(
            design["architecture"],
            json!({
                "components": ["core"],
                "interfaces": [],
                "data_flows": [],
                "patterns": [],
                "complete": true,
            })
        );
        let collected = orch.collect_results(&id, &transition.spawned).await.unwrap();
        assert_eq!(collected.results.len(), 1);
        assert_eq!(collected.results[0].1.status, ResultStatus::Success);
        assert!(collected.missing.is_empty());
        assert_eq!(orch.pending(&id).await, 0);
    }

    #[tokio::test]
    async fn test_unknown_phase_is_rejected_without_side_effects() {
        let (orch, _) = orchestrator(ScriptedBackend::new().fallback("{}"));
        let id = orch.start("W", docs()).await;
        let err = orch.advance(&id, "deployment").await.unwrap_err();
        assert_eq!(err, WorkflowError::UnknownPhase(UnknownPhase("deployment".into())));

        let snap = orch.status(&id).await.unwrap();
        assert_eq!(snap.current_phase, Phase::DocumentDiscovery);
        assert!(snap.completed_phases.is_empty());
        assert_eq!(snap.task_counts.total, 1);
    }

    #[tokio::test]
    async fn test_delegate_to_unknown_agent_leaves_state() {
        let (orch, _) = orchestrator(ScriptedBackend::new().fallback("{}"));
        let id = orch.start("W", docs()).await;
        let err = orch
            .delegate(&id, Delegation::new(AgentId::new("XYZ"), "Anything", TaskType::parse("x")))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::AgentNotRegistered(_)));
        assert_eq!(orch.status(&id).await.unwrap().task_counts.total, 1);
        assert_eq!(orch.pending(&id).await, 1);
    }

    #[tokio::test]
    async fn test_dependent_task_waits_for_next_poll() {
        let (orch, backend) = orchestrator(ScriptedBackend::new().fallback(r#"{"rules": ["r1"]}"#));
        let id = orch.start("W", docs()).await;
        let discovery = orch.status(&id).await.unwrap().tasks[0].id.clone();

        let rules = orch
            .delegate(
                &id,
                Delegation::new(AgentId::new("KAA"), "Analyze rules", TaskType::AnalyzeRules)
                    .depends_on(vec![TaskId::new("later_task")]),
            )
            .await
            .unwrap();
        let report = orch.run_pending(&id).await.unwrap();
        assert_eq!(report.completed, vec![discovery]);
        assert_eq!(report.deferred, vec![rules.clone()]);
        assert_eq!(orch.pending(&id).await, 1);

        let snap = orch.status(&id).await.unwrap();
        assert_eq!(snap.task_counts.waiting_for_dependencies, 1);
        let calls = backend.calls();

        // Still blocked: re-polling does not call the backend.
        let report = orch.run_pending(&id).await.unwrap();
        assert_eq!(report.deferred, vec![rules]);
        assert_eq!(backend.calls(), calls);
    }

    #[tokio::test]
    async fn test_finalize_and_shutdown() {
        let (orch, _) = orchestrator(ScriptedBackend::new().fallback("{}"));
        let done = orch.start("A", docs()).await;
        let running = orch.start("B", docs()).await;
        orch.run_pending(&done).await.unwrap();

        let report = orch.finalize(&done).await.unwrap();
        assert_eq!(report.status, WorkflowStatus::Completed);
        assert!(report.artifacts.contains(&"process_documents".to_string()));
        assert!(matches!(
            orch.finalize(&done).await,
            Err(WorkflowError::NotActive { .. })
        ));

        orch.shutdown().await;
        let snaps = orch.list().await;
        assert_eq!(snaps.len(), 2);
        let b = snaps.iter().find(|s| s.id == running).unwrap();
        assert_eq!(b.status, WorkflowStatus::Stopped);
        assert!(orch
            .agents()
            .await
            .iter()
            .all(|r| r.status == AgentStatus::Inactive));
        assert!(matches!(
            orch.advance(&running, "rule_analysis").await,
            Err(WorkflowError::NotActive { .. })
        ));
        let b_tasks = &b.tasks;
        assert_eq!(b_tasks[0].status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_design_with_missing_key_is_reexecuted_once() {
        let guided = r#"```json
{"components": ["gateway"], "responsibilities": ["routing"]}
```"#;
        let (orch, backend) = orchestrator(
            ScriptedBackend::new()
                .on("PREDICTED RESULT SHAPE", guided)
                .on(
                    r#"Predict the result of the subtask "Identify key system components""#,
                    r#"{"status": "success", "expected_keys": ["components", "responsibilities"]}"#,
                )
                .on("simulation module", r#"{"status": "success"}"#)
                .on("for completeness", r#"{"complete": true, "gaps": []}"#)
                .fallback(DESIGN_REPLY),
        );
        let id = orch.start("W", docs()).await;
        let transition = orch.advance(&id, "architecture_design").await.unwrap();
        let report = orch.run_pending(&id).await.unwrap();
        assert!(report.completed.contains(&transition.spawned[0]));

        assert_eq!(backend.calls_matching("PREDICTED RESULT SHAPE"), 1);
        let guided_prompt = backend
            .requests()
            .into_iter()
            .find(|r| r.prompt.contains("PREDICTED RESULT SHAPE"))
            .unwrap()
            .prompt;
        assert!(guided_prompt.contains("type: component_identification"));

        let design = orch.artifact(&id, "create_architecture_document").await.unwrap();
        assert_eq!(design["metadata"]["guided_reexecutions"], 1);
        assert_eq!(design["metadata"]["gap_fill_passes"], 0);
    }

    #[tokio::test]
    async fn test_agent_stays_assigned_while_a_delegated_task_is_pending() {
        let (orch, _) = orchestrator(ScriptedBackend::new().fallback(r#"{"rules": ["r1"]}"#));
        let id = orch.start("W", docs()).await;
        let ready = orch
            .delegate(&id, Delegation::new(AgentId::new("KAA"), "Extract rules", TaskType::AnalyzeRules))
            .await
            .unwrap();
        let blocked = orch
            .delegate(
                &id,
                Delegation::new(AgentId::new("KAA"), "Cross-check rules", TaskType::AnalyzeRules)
                    .depends_on(vec![TaskId::new("later_task")]),
            )
            .await
            .unwrap();

        let report = orch.run_pending(&id).await.unwrap();
        assert!(report.completed.contains(&ready));
        assert_eq!(report.deferred, vec![blocked.clone()]);

        let kaa = orch
            .agents()
            .await
            .into_iter()
            .find(|r| r.agent_id == AgentId::new("KAA"))
            .unwrap();
        assert_eq!(kaa.status, AgentStatus::Assigned);
        assert_eq!(kaa.assigned_tasks, vec![blocked.clone()]);
        assert_eq!(kaa.current_task(), Some(&blocked));
    }

    #[tokio::test]
    async fn test_workflow_documents_are_not_retrievable_from_another_workflow() {
        let (orch, _) = orchestrator(ScriptedBackend::new().fallback("{}"));
        let payroll = orch
            .start(
                "Payroll",
                vec![SourceDocument::new("ledger.md", "The salary ledger lists every employee salary")],
            )
            .await;
        let shop = orch.start("Shop", docs()).await;

        let own = orch.ctx.retriever.retrieve(&payroll, "salary ledger", 5, 0.45).await;
        assert_eq!(own.len(), 1);
        let other = orch.ctx.retriever.retrieve(&shop, "salary ledger", 5, 0.45).await;
        assert!(other.is_empty());
    }
}

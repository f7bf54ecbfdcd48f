//! Per-workflow state and its serializable snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use super::phase::Phase;
use crate::agents::AgentId;
use crate::retrieval::SourceDocument;
use crate::task::{TaskId, TaskStatus, TaskStore, TaskType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Active,
    Completed,
    Stopped,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Active => write!(f, "active"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Shared state of one workflow.
///
/// # Invariants
/// - `completed_phases` never contains `current_phase` while the workflow is active
/// - tasks are never removed
#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub id: String,
    pub name: String,
    pub current_phase: Phase,
    pub completed_phases: Vec<Phase>,
    pub tasks: TaskStore,
    /// Outputs keyed by producing task type, plus the input `documents`
    pub artifacts: Map<String, Value>,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowState {
    pub fn new(id: String, name: String, documents: &[SourceDocument]) -> Self {
        let docs: Map<String, Value> = documents
            .iter()
            .map(|d| (d.id.clone(), Value::String(d.content.clone())))
            .collect();
        let mut artifacts = Map::new();
        artifacts.insert("documents".to_string(), Value::Object(docs));
        Self {
            id,
            name,
            current_phase: Phase::DocumentDiscovery,
            completed_phases: Vec::new(),
            tasks: TaskStore::new(),
            artifacts,
            status: WorkflowStatus::Active,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == WorkflowStatus::Active
    }

    /// Move to `next`, recording the current phase as completed.
    pub fn enter(&mut self, next: Phase) -> Phase {
        let previous = self.current_phase;
        if !self.completed_phases.contains(&previous) {
            self.completed_phases.push(previous);
        }
        self.completed_phases.retain(|p| *p != next);
        self.current_phase = next;
        previous
    }

    /// Payload handed to phase tasks: the input documents and every artifact so far.
    pub fn task_input(&self) -> Value {
        let documents = self.artifacts.get("documents").cloned().unwrap_or(Value::Null);
        let artifacts: Map<String, Value> = self
            .artifacts
            .iter()
            .filter(|(k, _)| k.as_str() != "documents")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        serde_json::json!({"documents": documents, "artifacts": artifacts})
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_milliseconds() as f64 / 1000.0)
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        let tasks: Vec<TaskSummary> = self
            .tasks
            .iter()
            .map(|t| TaskSummary {
                id: t.id().clone(),
                agent_id: t.agent_id().clone(),
                task_type: t.task_type().clone(),
                status: t.status(),
                result_status: t.result().map(|r| r.status.to_string()),
            })
            .collect();
        WorkflowSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            status: self.status,
            current_phase: self.current_phase,
            completed_phases: self.completed_phases.clone(),
            task_counts: TaskCounts::from_store(&self.tasks),
            tasks,
            artifacts: self.artifacts.keys().cloned().collect(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_secs: self.duration_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TaskCounts {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub waiting_for_dependencies: usize,
    pub completed: usize,
    pub failed: usize,
}

impl TaskCounts {
    fn from_store(store: &TaskStore) -> Self {
        Self {
            total: store.len(),
            pending: store.count_with_status(TaskStatus::Pending),
            in_progress: store.count_with_status(TaskStatus::InProgress),
            waiting_for_dependencies: store.count_with_status(TaskStatus::WaitingForDependencies),
            completed: store.count_with_status(TaskStatus::Completed),
            failed: store.count_with_status(TaskStatus::Failed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub agent_id: AgentId,
    pub task_type: TaskType,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_status: Option<String>,
}

/// Point-in-time view of a workflow.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSnapshot {
    pub id: String,
    pub name: String,
    pub status: WorkflowStatus,
    pub current_phase: Phase,
    pub completed_phases: Vec<Phase>,
    pub task_counts: TaskCounts,
    pub tasks: Vec<TaskSummary>,
    pub artifacts: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_records_documents() {
        let docs = [SourceDocument::new("a.md", "alpha"), SourceDocument::new("b.md", "beta")];
        let state = WorkflowState::new("W_1".into(), "W".into(), &docs);
        assert_eq!(state.current_phase, Phase::DocumentDiscovery);
        assert_eq!(state.task_input()["documents"]["b.md"], "beta");
        assert_eq!(state.task_input()["artifacts"], serde_json::json!({}));
        assert!(state.is_active());
    }

    #[test]
    fn test_enter_tracks_completed_phases() {
        let mut state = WorkflowState::new("W_1".into(), "W".into(), &[]);
        assert_eq!(state.enter(Phase::RuleAnalysis), Phase::DocumentDiscovery);
        state.enter(Phase::ArchitectureDesign);
        assert_eq!(state.completed_phases, vec![Phase::DocumentDiscovery, Phase::RuleAnalysis]);
        state.enter(Phase::RuleAnalysis);
        assert_eq!(
            state.completed_phases,
            vec![Phase::DocumentDiscovery, Phase::ArchitectureDesign]
        );
    }
}

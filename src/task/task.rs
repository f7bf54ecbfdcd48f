//! Core Task type and its status state machine.
//!
//! # Invariants
//! - `id` is unique within a workflow
//! - Status only moves forward (see [`TaskStatus`])
//! - A task is never deleted; terminal tasks keep their result

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::kind::TaskType;
use crate::agents::{AgentId, TaskResult};

/// Unique identifier for a task, `{agent}_{8 hex chars}` when generated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a fresh ID owned by `agent`.
    ///
    /// # Postcondition
    /// Returns an ID that has never been used before in this process
    /// (up to UUID collision).
    pub fn generate(agent: &AgentId) -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        Self(format!("{}_{}", agent, &uuid[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a task in its lifecycle.
///
/// # State Machine
/// ```text
/// Pending -> InProgress -> Completed
///    |  ^          ^   \-> Failed
///    v  |          |
/// WaitingForDependencies
/// ```
/// `WaitingForDependencies` is reachable only before the first `InProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    WaitingForDependencies,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Check if the task has not started yet.
    pub fn is_startable(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::WaitingForDependencies)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::WaitingForDependencies => "waiting_for_dependencies",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{}", tag)
    }
}

/// A unit of work owned by one agent.
///
/// # Design
/// - Fields are private; status changes only through the transition methods
/// - Every transition refreshes `updated_at`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    agent_id: AgentId,
    description: String,
    task_type: TaskType,
    input: serde_json::Value,
    status: TaskStatus,
    result: Option<TaskResult>,
    priority: u8,
    dependencies: Vec<TaskId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new pending task with a generated ID.
    ///
    /// # Errors
    /// Returns `TaskError::EmptyDescription` if `description` is blank.
    pub fn new(
        agent_id: AgentId,
        description: impl Into<String>,
        task_type: TaskType,
        input: serde_json::Value,
    ) -> Result<Self, TaskError> {
        let id = TaskId::generate(&agent_id);
        Self::with_id(id, agent_id, description, task_type, input)
    }

    /// Create a new pending task with an explicit ID.
    pub fn with_id(
        id: TaskId,
        agent_id: AgentId,
        description: impl Into<String>,
        task_type: TaskType,
        input: serde_json::Value,
    ) -> Result<Self, TaskError> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(TaskError::EmptyDescription);
        }
        let now = Utc::now();
        Ok(Self {
            id,
            agent_id,
            description,
            task_type,
            input,
            status: TaskStatus::Pending,
            result: None,
            priority: 1,
            dependencies: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<TaskId>) -> Self {
        self.dependencies = dependencies;
        self
    }

    // Getters

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn input(&self) -> &serde_json::Value {
        &self.input
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn result(&self) -> Option<&TaskResult> {
        self.result.as_ref()
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn dependencies(&self) -> &[TaskId] {
        &self.dependencies
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    // State transitions - explicit and validated

    fn invalid(&self, to: TaskStatus) -> TaskError {
        TaskError::InvalidTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }

    fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Transition to `InProgress`.
    ///
    /// # Precondition
    /// `self.status` is `Pending` or `WaitingForDependencies`
    pub fn start(&mut self) -> Result<(), TaskError> {
        if !self.status.is_startable() {
            return Err(self.invalid(TaskStatus::InProgress));
        }
        self.set_status(TaskStatus::InProgress);
        Ok(())
    }

    /// Park the task until its dependencies complete.
    ///
    /// # Precondition
    /// The task has never been `InProgress`.
    pub fn defer(&mut self) -> Result<(), TaskError> {
        if !self.status.is_startable() {
            return Err(self.invalid(TaskStatus::WaitingForDependencies));
        }
        self.set_status(TaskStatus::WaitingForDependencies);
        Ok(())
    }

    /// Transition to `Completed`, storing `result`.
    ///
    /// # Precondition
    /// `self.status == InProgress`
    pub fn complete(&mut self, result: TaskResult) -> Result<(), TaskError> {
        if self.status != TaskStatus::InProgress {
            return Err(self.invalid(TaskStatus::Completed));
        }
        self.result = Some(result);
        self.set_status(TaskStatus::Completed);
        Ok(())
    }

    /// Transition to `Failed`, storing the error-tagged `result`.
    ///
    /// # Precondition
    /// `self.status == InProgress`
    pub fn fail(&mut self, result: TaskResult) -> Result<(), TaskError> {
        if self.status != TaskStatus::InProgress {
            return Err(self.invalid(TaskStatus::Failed));
        }
        self.result = Some(result);
        self.set_status(TaskStatus::Failed);
        Ok(())
    }
}

/// Task map preserving insertion order.
#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    tasks: HashMap<TaskId, Task>,
    order: Vec<TaskId>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a task.
    pub fn insert(&mut self, task: Task) {
        let id = task.id().clone();
        if self.tasks.insert(id.clone(), task).is_none() {
            self.order.push(id);
        }
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    /// Tasks in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Count tasks currently in `status`.
    pub fn count_with_status(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status() == status).count()
    }
}

/// Errors that can occur during task operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("Task description cannot be empty")]
    EmptyDescription,

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

//! Core types for the agent system.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::TaskId;

/// Identifier of an agent role ("OA", "SAA", ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AgentId {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A declared skill tag used to route delegation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Capability {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of an agent record.
///
/// # State Machine
/// ```text
/// Idle <-> Assigned
///   \        |
///    \-> Inactive
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Assigned,
    Inactive,
}

/// Registry-side view of an agent.
///
/// # Invariants
/// - `status == Assigned` iff `assigned_tasks` is non-empty (unless inactive)
/// - `assigned_tasks` keeps delegation order without duplicates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: AgentId,
    pub capabilities: BTreeSet<Capability>,
    pub status: AgentStatus,
    /// Delegated tasks not yet settled
    #[serde(default)]
    pub assigned_tasks: Vec<TaskId>,
    pub last_active: DateTime<Utc>,
}

impl AgentRecord {
    pub fn new(agent_id: AgentId, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            agent_id,
            capabilities: capabilities.into_iter().collect(),
            status: AgentStatus::Idle,
            assigned_tasks: Vec::new(),
            last_active: Utc::now(),
        }
    }

    pub fn has_capability(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// Most recently delegated outstanding task.
    pub fn current_task(&self) -> Option<&TaskId> {
        self.assigned_tasks.last()
    }

    /// Add `task` to the agent's outstanding work.
    pub fn assign(&mut self, task: TaskId) {
        if !self.assigned_tasks.contains(&task) {
            self.assigned_tasks.push(task);
        }
        if self.status != AgentStatus::Inactive {
            self.status = AgentStatus::Assigned;
        }
        self.last_active = Utc::now();
    }

    /// Settle `task`; the agent goes `Idle` once nothing is outstanding.
    pub fn release(&mut self, task: &TaskId) {
        self.assigned_tasks.retain(|t| t != task);
        if self.status == AgentStatus::Assigned && self.assigned_tasks.is_empty() {
            self.status = AgentStatus::Idle;
        }
        self.last_active = Utc::now();
    }

    pub fn deactivate(&mut self) {
        self.status = AgentStatus::Inactive;
        self.assigned_tasks.clear();
        self.last_active = Utc::now();
    }
}

/// Status tag carried by every task result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Partial,
    Error,
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultStatus::Success => write!(f, "success"),
            ResultStatus::Partial => write!(f, "partial"),
            ResultStatus::Error => write!(f, "error"),
        }
    }
}

/// Result of an agent executing a task.
///
/// # Invariants
/// - Failures travel inside this type; `status == Error` is the only failure signal
/// - `data` is `Null` when nothing usable was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: ResultStatus,
    pub data: serde_json::Value,
    pub message: Option<String>,
    pub model_used: Option<String>,
}

impl TaskResult {
    /// Create a successful result.
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            status: ResultStatus::Success,
            data,
            message: None,
            model_used: None,
        }
    }

    /// Create a best-effort result.
    pub fn partial(data: serde_json::Value) -> Self {
        Self {
            status: ResultStatus::Partial,
            data,
            message: None,
            model_used: None,
        }
    }

    /// Create an error result.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Error,
            data: serde_json::Value::Null,
            message: Some(message.into()),
            model_used: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_used = Some(model.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == ResultStatus::Error
    }
}

/// Delegation target is not a registered agent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Agent {agent_id} is not registered")]
pub struct AgentNotRegisteredError {
    pub agent_id: AgentId,
}

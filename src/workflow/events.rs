//! Workflow events and listeners.

use serde::Serialize;
use tokio::sync::broadcast;

use super::phase::Phase;
use crate::agents::{AgentId, ResultStatus};
use crate::task::{TaskId, TaskType};

/// A structured event emitted by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    Started {
        workflow_id: String,
        name: String,
        documents: usize,
    },
    PhaseAdvanced {
        workflow_id: String,
        from: Phase,
        to: Phase,
        spawned: Vec<TaskId>,
    },
    /// A task message was sent to its agent
    TaskDelegated {
        workflow_id: String,
        task_id: TaskId,
        agent_id: AgentId,
        task_type: TaskType,
    },
    TaskCompleted {
        workflow_id: String,
        task_id: TaskId,
        agent_id: AgentId,
        status: ResultStatus,
    },
    TaskFailed {
        workflow_id: String,
        task_id: TaskId,
        agent_id: AgentId,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// The task is parked until `dependency_id` completes
    TaskDeferred {
        workflow_id: String,
        task_id: TaskId,
        dependency_id: TaskId,
    },
    Finalized {
        workflow_id: String,
        duration_secs: f64,
    },
    Stopped {
        workflow_id: String,
    },
}

impl WorkflowEvent {
    pub fn workflow_id(&self) -> &str {
        match self {
            WorkflowEvent::Started { workflow_id, .. }
            | WorkflowEvent::PhaseAdvanced { workflow_id, .. }
            | WorkflowEvent::TaskDelegated { workflow_id, .. }
            | WorkflowEvent::TaskCompleted { workflow_id, .. }
            | WorkflowEvent::TaskFailed { workflow_id, .. }
            | WorkflowEvent::TaskDeferred { workflow_id, .. }
            | WorkflowEvent::Finalized { workflow_id, .. }
            | WorkflowEvent::Stopped { workflow_id } => workflow_id,
        }
    }
}

/// Observer of orchestrator events. Called synchronously; keep it cheap.
pub trait WorkflowListener: Send + Sync {
    fn on_event(&self, event: &WorkflowEvent);
}

/// Forwards events into a `broadcast` channel.
pub struct BroadcastListener {
    tx: broadcast::Sender<WorkflowEvent>,
}

impl BroadcastListener {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.tx.subscribe()
    }
}

impl WorkflowListener for BroadcastListener {
    fn on_event(&self, event: &WorkflowEvent) {
        // No receivers is fine
        let _ = self.tx.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_listener_forwards_events() {
        let listener = BroadcastListener::new(8);
        let mut rx = listener.subscribe();
        listener.on_event(&WorkflowEvent::Stopped {
            workflow_id: "W_1".into(),
        });
        let event = rx.try_recv().unwrap();
        assert_eq!(event.workflow_id(), "W_1");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"type": "stopped", "workflow_id": "W_1"})
        );
    }

    #[test]
    fn test_send_without_receivers_is_ignored() {
        let listener = BroadcastListener::new(1);
        listener.on_event(&WorkflowEvent::Finalized {
            workflow_id: "W_2".into(),
            duration_secs: 1.5,
        });
    }
}

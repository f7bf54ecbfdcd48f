//! Task execution boundary: the only place task status moves.

use tracing::{info, warn};

use super::context::AgentContext;
use super::types::TaskResult;
use super::Agent;
use crate::task::{DependencyNotSatisfiedError, Task, TaskDependencyResolver, TaskError, TaskStatus, TaskStore};

/// What happened when a task was handed to its agent.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The task had already completed; its stored result is returned untouched
    AlreadyCompleted(TaskResult),
    Completed(TaskResult),
    Failed(TaskResult),
    /// Parked in `WaitingForDependencies`; re-poll later
    Deferred(DependencyNotSatisfiedError),
    /// The task was in a state that cannot start
    Rejected(TaskError),
}

impl ExecutionOutcome {
    /// Result produced or recalled by this execution, if any.
    pub fn result(&self) -> Option<&TaskResult> {
        match self {
            ExecutionOutcome::AlreadyCompleted(r)
            | ExecutionOutcome::Completed(r)
            | ExecutionOutcome::Failed(r) => Some(r),
            ExecutionOutcome::Deferred(_) | ExecutionOutcome::Rejected(_) => None,
        }
    }

    /// True when the task reached a terminal status.
    pub fn is_settled(&self) -> bool {
        self.result().is_some()
    }
}

/// Run `task` on `agent`, gated by its dependencies in `store`.
///
/// # State Machine
/// ```text
/// Completed ──────────────────────────> AlreadyCompleted (no agent call)
/// Pending/Waiting ─ deps unmet ───────> WaitingForDependencies, Deferred
/// Pending/Waiting ─ start ─> InProgress ─ agent ─> Completed | Failed
/// ```
///
/// # Postconditions
/// - `agent.execute` is called at most once
/// - an `error`-tagged result moves the task to `Failed`; the result is still stored
pub async fn execute_task(
    agent: &dyn Agent,
    task: &mut Task,
    store: &TaskStore,
    ctx: &AgentContext,
) -> ExecutionOutcome {
    match (task.status(), task.result()) {
        (TaskStatus::Completed, Some(result)) => {
            info!(task_id = %task.id(), "Task already completed, returning stored result");
            return ExecutionOutcome::AlreadyCompleted(result.clone());
        }
        (TaskStatus::Failed, Some(result)) => {
            return ExecutionOutcome::Failed(result.clone());
        }
        _ => {}
    }

    if let Err(blocked) = TaskDependencyResolver::check(task, store) {
        TaskDependencyResolver::can_run(task, store);
        return ExecutionOutcome::Deferred(blocked);
    }

    if let Err(e) = task.start() {
        warn!(task_id = %task.id(), "Cannot start task: {}", e);
        return ExecutionOutcome::Rejected(e);
    }
    info!(
        task_id = %task.id(),
        agent_id = %agent.id(),
        task_type = %task.task_type(),
        workflow_id = ctx.workflow_id.as_deref().unwrap_or("-"),
        "Executing task"
    );

    let result = agent.execute(task, ctx).await;

    if result.is_error() {
        warn!(
            task_id = %task.id(),
            message = result.message.as_deref().unwrap_or(""),
            "Task failed"
        );
        if let Err(e) = task.fail(result.clone()) {
            return ExecutionOutcome::Rejected(e);
        }
        ExecutionOutcome::Failed(result)
    } else {
        info!(task_id = %task.id(), status = %result.status, "Task completed");
        if let Err(e) = task.complete(result.clone()) {
            return ExecutionOutcome::Rejected(e);
        }
        ExecutionOutcome::Completed(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use crate::agents::{AgentId, Capability};
    use crate::config::Config;
    use crate::task::{TaskId, TaskType, UnsatisfiedReason};

    struct CountingAgent {
        id: AgentId,
        capabilities: Vec<Capability>,
        reply: TaskResult,
        calls: AtomicUsize,
    }

    impl CountingAgent {
        fn new(reply: TaskResult) -> Self {
            Self {
                id: AgentId::new("RAA"),
                capabilities: vec![Capability::new("requirements_analysis")],
                reply,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Agent for CountingAgent {
        fn id(&self) -> &AgentId {
            &self.id
        }

        fn capabilities(&self) -> &[Capability] {
            &self.capabilities
        }

        async fn execute(&self, task: &Task, _ctx: &AgentContext) -> TaskResult {
            assert_eq!(task.status(), TaskStatus::InProgress);
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }
    }

    fn task(id: &str) -> Task {
        Task::with_id(
            TaskId::new(id),
            AgentId::new("RAA"),
            "Analyze requirements",
            TaskType::AnalyzeRequirements,
            json!({}),
        )
        .unwrap()
    }

    fn ctx() -> AgentContext {
        AgentContext::offline(Config::offline())
    }

    #[test]
    fn test_completed_task_is_not_executed_again() {
        tokio_test::block_on(async {
            let agent = CountingAgent::new(TaskResult::success(json!({"requirements": ["a"]})));
            let store = TaskStore::new();
            let mut t = task("RAA_1");

            let first = execute_task(&agent, &mut t, &store, &ctx()).await;
            assert!(matches!(first, ExecutionOutcome::Completed(_)));
            let second = execute_task(&agent, &mut t, &store, &ctx()).await;
            assert_eq!(second, ExecutionOutcome::AlreadyCompleted(first.result().unwrap().clone()));
            assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
            assert_eq!(t.status(), TaskStatus::Completed);
        });
    }

    #[tokio::test]
    async fn test_error_result_fails_task_and_keeps_payload() {
        let agent = CountingAgent::new(TaskResult::error("backend down"));
        let mut t = task("RAA_2");
        let outcome = execute_task(&agent, &mut t, &TaskStore::new(), &ctx()).await;

        assert!(matches!(outcome, ExecutionOutcome::Failed(_)));
        assert_eq!(t.status(), TaskStatus::Failed);
        assert_eq!(t.result().unwrap().message.as_deref(), Some("backend down"));
    }

    #[tokio::test]
    async fn test_partial_result_completes_task() {
        let agent = CountingAgent::new(TaskResult::partial(json!({"raw": "text"})));
        let mut t = task("RAA_3");
        let outcome = execute_task(&agent, &mut t, &TaskStore::new(), &ctx()).await;
        assert!(matches!(outcome, ExecutionOutcome::Completed(_)));
        assert_eq!(t.status(), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_unmet_dependency_defers_without_calling_agent() {
        let agent = CountingAgent::new(TaskResult::success(json!({})));
        let mut store = TaskStore::new();
        store.insert(task("DDA_1"));
        let mut t = task("RAA_4").with_dependencies(vec![TaskId::new("DDA_1")]);

        let outcome = execute_task(&agent, &mut t, &store, &ctx()).await;
        match outcome {
            ExecutionOutcome::Deferred(blocked) => {
                assert_eq!(blocked.dependency_id, TaskId::new("DDA_1"));
                assert_eq!(blocked.reason, UnsatisfiedReason::NotCompleted(TaskStatus::Pending));
            }
            other => panic!("expected deferral, got {:?}", other),
        }
        assert_eq!(t.status(), TaskStatus::WaitingForDependencies);
        assert_eq!(agent.calls.load(Ordering::SeqCst), 0);

        // Once the dependency completes, the parked task runs.
        let mut dep = task("DDA_1");
        execute_task(&agent, &mut dep, &TaskStore::new(), &ctx()).await;
        store.insert(dep);
        let outcome = execute_task(&agent, &mut t, &store, &ctx()).await;
        assert!(matches!(outcome, ExecutionOutcome::Completed(_)));
    }
}

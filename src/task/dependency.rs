//! Dependency gating for task execution.

use super::task::{Task, TaskId, TaskStatus, TaskStore};

/// Why a dependency blocks a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsatisfiedReason {
    /// The dependency ID is not in the store
    Missing,
    /// The dependency exists but has not completed
    NotCompleted(TaskStatus),
}

impl std::fmt::Display for UnsatisfiedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnsatisfiedReason::Missing => write!(f, "not found"),
            UnsatisfiedReason::NotCompleted(status) => write!(f, "status is {}", status),
        }
    }
}

/// A task cannot run yet. Soft: the task is parked and the caller re-polls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Task {task_id} depends on {dependency_id}: {reason}")]
pub struct DependencyNotSatisfiedError {
    pub task_id: TaskId,
    pub dependency_id: TaskId,
    pub reason: UnsatisfiedReason,
}

/// Decides whether a task is runnable.
///
/// # Property
/// `can_run(t, T)` is true iff every dependency ID of `t` maps to a
/// `Completed` task in `T`. There is no automatic wake-up.
pub struct TaskDependencyResolver;

impl TaskDependencyResolver {
    /// Check dependencies without touching the task.
    ///
    /// # Errors
    /// Returns the first unsatisfied dependency in declaration order.
    pub fn check(task: &Task, store: &TaskStore) -> Result<(), DependencyNotSatisfiedError> {
        for dep in task.dependencies() {
            let reason = match store.get(dep) {
                None => UnsatisfiedReason::Missing,
                Some(d) if d.status() == TaskStatus::Completed => continue,
                Some(d) => UnsatisfiedReason::NotCompleted(d.status()),
            };
            return Err(DependencyNotSatisfiedError {
                task_id: task.id().clone(),
                dependency_id: dep.clone(),
                reason,
            });
        }
        Ok(())
    }

    /// Check dependencies, parking the task in `WaitingForDependencies` when blocked.
    ///
    /// # Postconditions
    /// - Returns `true` iff [`Self::check`] succeeds
    /// - On `false`, `task.status() == WaitingForDependencies` unless the task had
    ///   already started (which is logged and left unchanged)
    pub fn can_run(task: &mut Task, store: &TaskStore) -> bool {
        match Self::check(task, store) {
            Ok(()) => true,
            Err(blocked) => {
                tracing::info!(
                    task_id = %blocked.task_id,
                    dependency_id = %blocked.dependency_id,
                    reason = %blocked.reason,
                    "Task waiting for dependencies"
                );
                if let Err(e) = task.defer() {
                    tracing::warn!(task_id = %task.id(), "Cannot park task: {}", e);
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentId, TaskResult};
    use crate::task::TaskType;
    use serde_json::json;

    fn task(id: &str) -> Task {
        Task::with_id(
            TaskId::new(id),
            AgentId::new("RAA"),
            "analyze",
            TaskType::AnalyzeRequirements,
            json!({}),
        )
        .unwrap()
    }

    fn completed(id: &str) -> Task {
        let mut t = task(id);
        t.start().unwrap();
        t.complete(TaskResult::success(json!({}))).unwrap();
        t
    }

    #[test]
    fn test_no_dependencies_can_run() {
        let mut t = task("t");
        assert!(TaskDependencyResolver::can_run(&mut t, &TaskStore::new()));
        assert_eq!(t.status(), TaskStatus::Pending);
    }

    #[test]
    fn test_all_completed_can_run() {
        let mut store = TaskStore::new();
        store.insert(completed("a"));
        store.insert(completed("b"));
        let mut t = task("t").with_dependencies(vec!["a".into(), "b".into()]);
        assert!(TaskDependencyResolver::can_run(&mut t, &store));
    }

    #[test]
    fn test_missing_dependency_parks_task() {
        let mut store = TaskStore::new();
        store.insert(completed("a"));
        let mut t = task("t").with_dependencies(vec!["a".into(), "ghost".into()]);

        let err = TaskDependencyResolver::check(&t, &store).unwrap_err();
        assert_eq!(err.dependency_id, TaskId::new("ghost"));
        assert_eq!(err.reason, UnsatisfiedReason::Missing);

        assert!(!TaskDependencyResolver::can_run(&mut t, &store));
        assert_eq!(t.status(), TaskStatus::WaitingForDependencies);
    }

    #[test]
    fn test_non_completed_dependency_blocks() {
        for status_task in [task("a"), {
            let mut t = task("a");
            t.start().unwrap();
            t.fail(TaskResult::error("x")).unwrap();
            t
        }] {
            let mut store = TaskStore::new();
            let expected = status_task.status();
            store.insert(status_task);
            let t = task("t").with_dependencies(vec!["a".into()]);
            let err = TaskDependencyResolver::check(&t, &store).unwrap_err();
            assert_eq!(err.reason, UnsatisfiedReason::NotCompleted(expected));
        }
    }

    #[test]
    fn test_parked_task_runs_once_dependency_completes() {
        let mut store = TaskStore::new();
        store.insert(task("a"));
        let mut t = task("t").with_dependencies(vec!["a".into()]);
        assert!(!TaskDependencyResolver::can_run(&mut t, &store));

        store.insert(completed("a"));
        assert!(TaskDependencyResolver::can_run(&mut t, &store));
        t.start().unwrap();
    }
}

//! Agents module - role agents and the task execution boundary.
//!
//! # Agent Types
//! - **CompositeDesignAgent** ("SAA"): runs the simulation pipeline for design tasks
//! - **AnalysisAgent**: single-shot template + context + generation for every other role
//!
//! # Design Principles
//! - Failures travel inside [`TaskResult`]; `execute()` never returns `Err`
//! - Status transitions happen only in [`execute_task`]
//! - Agents are created lazily by [`AgentRegistry`] from registered factories

mod analyst;
mod architect;
mod context;
mod executor;
mod registry;
mod types;

pub use analyst::AnalysisAgent;
pub use architect::{requirements_hash, CompositeDesignAgent};
pub use context::AgentContext;
pub use executor::{execute_task, ExecutionOutcome};
pub use registry::{AgentFactory, AgentRegistry};
pub use types::{
    AgentId, AgentNotRegisteredError, AgentRecord, AgentStatus, Capability, ResultStatus,
    TaskResult,
};

use async_trait::async_trait;

use crate::task::Task;

/// Base trait for all agents.
///
/// # Invariants
/// - `execute()` never panics and never mutates the task
/// - Every failure comes back as an `error`-tagged [`TaskResult`]
#[async_trait]
pub trait Agent: Send + Sync {
    /// Get the unique identifier for this agent.
    fn id(&self) -> &AgentId;

    /// Skill tags this agent accepts work for.
    fn capabilities(&self) -> &[Capability];

    /// Execute a task.
    ///
    /// # Preconditions
    /// - `task.status() == InProgress`
    /// - `task.agent_id() == self.id()`
    ///
    /// # Postconditions
    /// - Returns `success`/`partial` when a usable payload was produced
    /// - Returns `error` when nothing usable was produced (including cancellation)
    async fn execute(&self, task: &Task, ctx: &AgentContext) -> TaskResult;

    /// Get a human-readable description of this agent.
    fn description(&self) -> &str {
        "Generic agent"
    }
}

//! Workflow module - phase state machine and task delegation.
//!
//! # Flow
//! 1. [`WorkflowOrchestrator::start`] indexes the input documents and enters
//!    `document_discovery`
//! 2. [`WorkflowOrchestrator::advance`] moves to the next [`Phase`] and
//!    delegates the tasks that phase maps to
//! 3. [`WorkflowOrchestrator::run_pending`] delivers queued tasks to their
//!    agents; outputs become artifacts for later phases
//! 4. [`WorkflowOrchestrator::finalize`] closes the workflow

mod events;
mod orchestrator;
mod phase;
mod state;

pub use events::{BroadcastListener, WorkflowEvent, WorkflowListener};
pub use orchestrator::{
    CollectedResults, Delegation, FinalReport, PhaseTransition, RunReport, WorkflowError, WorkflowOrchestrator,
};
pub use phase::{Phase, PhaseTask, UnknownPhase};
pub use state::{TaskCounts, TaskSummary, WorkflowSnapshot, WorkflowState, WorkflowStatus};

//! Task module - tasks, their status machine, and dependency gating.
//!
//! - All types use algebraic data types with exhaustive matching
//! - Invariants are documented and enforced in constructors and transitions
//! - Pure checks (`TaskDependencyResolver::check`) are separated from mutation

mod dependency;
mod kind;
pub mod task;

pub use dependency::{DependencyNotSatisfiedError, TaskDependencyResolver, UnsatisfiedReason};
pub use kind::TaskType;
pub use task::{Task, TaskError, TaskId, TaskStatus, TaskStore};

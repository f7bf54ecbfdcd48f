//! # archflow
//!
//! Adaptive task orchestration and simulation-guided execution for
//! multi-agent design workflows.
//!
//! This library provides:
//! - A phase state machine that delegates tasks to role agents
//! - Dependency-gated task execution with explicit status transitions
//! - A simulate / execute / correct / synthesize / validate pipeline for
//!   composite design goals
//! - Request optimization: model-tier selection, response caching and
//!   performance-tracked prompt templates
//!
//! ## Architecture
//!
//! ```text
//!   ┌────────────────────────┐
//!   │  WorkflowOrchestrator  │  phases, delegation, artifacts
//!   └───────────┬────────────┘
//!               │ execute_task (dependency gate)
//!               ▼
//!   ┌────────────────────────┐      ┌──────────────────────┐
//!   │  AgentRegistry         │─────▶│ CompositeDesignAgent │
//!   │  (analysis agents)     │      │  SimulationPipeline  │
//!   └───────────┬────────────┘      └──────────┬───────────┘
//!               │                              │
//!               ▼                              ▼
//!   ┌──────────────────────────────────────────────────────┐
//!   │ GenerationService: ModelSelector + ResponseCache     │
//!   │ TemplateSelector, Retriever                          │
//!   └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//! - `workflow`: phases, orchestrator, events
//! - `agents`: agent trait, registry, execution boundary
//! - `pipeline`: simulation-guided execution
//! - `task`: tasks and dependency resolution
//! - `llm`: generation backends and request optimization
//! - `prompts`: template storage and selection
//! - `retrieval`: supporting-context lookup

pub mod agents;
pub mod config;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod retrieval;
pub mod task;
pub mod workflow;

pub use agents::{AgentContext, AgentRegistry};
pub use config::Config;
pub use workflow::{Phase, WorkflowOrchestrator};

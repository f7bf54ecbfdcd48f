//! Prompt templates: records, the on-disk store, and performance-tracked selection.

pub mod builtin;
mod selector;
mod store;
mod template;

pub use selector::{PromptChoice, TemplateNotFoundError, TemplateSelector};
pub use store::{PerformanceStats, TemplateStore, PERFORMANCE_FILE};
pub use template::{
    bump_patch, render_template, PerformanceRecord, TemplateRecord, DEFAULT_SCORE, SCORE_WINDOW,
};

//! Error taxonomy for the planner, agent runtime, dependency analyzer, and
//! executor (C4-C10), composing `persistence_core::CoreError` via `#[from]`
//! the way `CouncilError`/`StoreError` compose into this codebase's
//! crate-level error enums.

use persistence_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("argument error: {0}")]
    Argument(String),

    #[error("text-generation backend failed: {0}")]
    LlmProviderFailure(String),

    #[error("tool `{tool}` failed: {source}")]
    ToolExecutionFailure {
        tool: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("planner returned unparseable output: {raw}")]
    PlannerFailure { raw: String },

    #[error("task `{task}` exceeded its {timeout_seconds}s timeout")]
    TaskTimeout { task: String, timeout_seconds: u64 },

    #[error("dependency analysis failed: {0}")]
    DependencyCycle(String),

    #[error(transparent)]
    Persistence(#[from] CoreError),

    #[error("workflow cancelled")]
    Cancelled,
}

impl WorkflowError {
    pub fn argument(msg: impl Into<String>) -> Self {
        Self::Argument(msg.into())
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

//! Error taxonomy shared by the retry engine, persistence store, and tool registry.
//!
//! Kinds map directly onto the propagation policy: `ArgumentError` and
//! `Cancelled` are never retried; `PersistenceFailure` is fatal for plan and
//! task-output writes but logged-and-swallowed for memory writes (callers
//! decide that distinction, not this type).

use thiserror::Error;

/// Errors produced by the core kernel (retry, persistence, tool dispatch).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("argument error: {0}")]
    Argument(String),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("tool execution failed for `{tool}`: {source}")]
    ToolExecution {
        tool: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl CoreError {
    pub fn argument(msg: impl Into<String>) -> Self {
        Self::Argument(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

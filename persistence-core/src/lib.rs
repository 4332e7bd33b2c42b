//! Coordination kernel: retry engine, persistence store, and tool registry
//! for LLM-driven workflow orchestration (C1-C3).
//!
//! This crate is the reusable, storage/coordination half of the system; the
//! planner, agent runtime, dependency analyzer, and parallel executor that
//! consume it live in `swarm-workflow`.

pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod retry;
pub mod store;
pub mod tool;

pub use config::RetryDefaults;
pub use error::{CoreError, CoreResult};
pub use metrics::{MetricSink, NoopMetricSink, RecordingMetricSink, SharedMetricSink};
pub use model::{
    placeholder_names, render_template, AttemptRecord, ExecutionInput, ExecutionResult, Metric,
    MetricKind, Plan, RetryContext, TaskDefinition, ToolCall, RESERVED_PLACEHOLDER_PREV_OUTPUT,
    RESERVED_PLACEHOLDER_USER_REQUEST,
};
pub use retry::{
    is_transient_message, ExponentialBackoffPolicy, FixedDelayPolicy, NonePolicy, RetryCancelled,
    RetryEngine, RetryOutcomeError, RetryPolicy,
};
pub use store::{persist_memory_best_effort, MemoryStore, PersistenceStore, SharedPersistenceStore};
pub use tool::{validate_basic_input, Tool, ToolRegistry};

#[cfg(feature = "rocksdb-store")]
pub use store::rocks::{IsolationGuard, RocksStore};

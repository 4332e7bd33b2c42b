//! Agent (C5): a stateful unit that composes memory and prompt, calls C4,
//! and optionally dispatches a single tool call, maintaining append-only
//! memory across its lifetime.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use persistence_core::{
    persist_memory_best_effort, ExecutionInput, ExecutionResult, Metric, MetricKind, MetricSink,
    NoopMetricSink, PersistenceStore, ToolCall, ToolRegistry,
};
use tokio::sync::RwLock;
use tracing::{info_span, warn, Instrument};

use crate::error::WorkflowError;
use crate::text_gen::TextGenClient;

const TOOL_ARG_TRUNCATE_LEN: usize = 120;
const LLM_OUTPUT_TRUNCATE_LEN: usize = 300;

fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let mut truncated: String = s.chars().take(max_chars).collect();
        truncated.push('…');
        truncated
    }
}

/// A named, stateful executor wrapping one text-generation client and
/// optional tool access. Lifetime: created by the orchestrator (explicit or
/// implicit-with-UUID suffix), rehydrated from the store on construction,
/// mutated only by its own `execute`.
pub struct Agent {
    name: String,
    description: String,
    client: Arc<dyn TextGenClient>,
    prompt_template: Option<String>,
    tools: Option<Arc<ToolRegistry>>,
    store: Arc<dyn PersistenceStore>,
    memory_limit: usize,
    /// Eventually-consistent cache of the tail of the durable log in
    /// `store`; the store itself is the source of truth.
    memory: RwLock<Vec<String>>,
    metrics: Arc<dyn MetricSink>,
}

impl Agent {
    /// Rehydrates memory from `store` synchronously is not possible without
    /// async; construction defers the initial load to the first `execute`
    /// call via `ensure_hydrated`, matching the store's async contract.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        client: Arc<dyn TextGenClient>,
        store: Arc<dyn PersistenceStore>,
        memory_limit: usize,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            client,
            prompt_template: None,
            tools: None,
            store,
            memory_limit,
            memory: RwLock::new(Vec::new()),
            metrics: Arc::new(NoopMetricSink),
        }
    }

    pub fn with_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = Some(template.into());
        self
    }

    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Emit `agent.execution.*`/`tool.execution.*`/`errors.count` (§6)
    /// through `sink` instead of discarding them.
    pub fn with_metric_sink(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.metrics = sink;
        self
    }

    fn emit_execution_metrics(&self, elapsed: Duration, success: bool) {
        let mut duration_tags = BTreeMap::new();
        duration_tags.insert("agent".to_string(), self.name.clone());
        duration_tags.insert("type".to_string(), "unified".to_string());
        self.metrics.record(Metric::new(
            "agent.execution.duration",
            MetricKind::Timer,
            elapsed.as_secs_f64(),
            duration_tags,
        ));

        let mut count_tags = BTreeMap::new();
        count_tags.insert("agent".to_string(), self.name.clone());
        count_tags.insert("success".to_string(), success.to_string());
        self.metrics
            .record(Metric::new("agent.execution.count", MetricKind::Counter, 1.0, count_tags));

        if !success {
            let mut error_tags = BTreeMap::new();
            error_tags.insert("agent".to_string(), self.name.clone());
            self.metrics
                .record(Metric::new("agent.execution.errors", MetricKind::Counter, 1.0, error_tags));
        }
    }

    fn emit_component_error(&self, error_type: &str, error: &WorkflowError) {
        let mut tags = BTreeMap::new();
        tags.insert("component".to_string(), "agent".to_string());
        tags.insert("error_type".to_string(), error_type.to_string());
        tags.insert("error_message".to_string(), error.to_string());
        self.metrics.record(Metric::new("errors.count", MetricKind::Counter, 1.0, tags));
    }

    fn emit_tool_metrics(&self, tool: &str, elapsed: Duration, success: bool) {
        let mut tags = BTreeMap::new();
        tags.insert("tool".to_string(), tool.to_string());
        tags.insert("success".to_string(), success.to_string());
        self.metrics.record(Metric::new(
            "tool.execution.duration",
            MetricKind::Timer,
            elapsed.as_secs_f64(),
            tags.clone(),
        ));
        self.metrics
            .record(Metric::new("tool.execution.count", MetricKind::Counter, 1.0, tags));
    }

    fn emit_tool_error(&self, tool: &str) {
        let mut tags = BTreeMap::new();
        tags.insert("tool".to_string(), tool.to_string());
        self.metrics
            .record(Metric::new("tool.execution.errors", MetricKind::Counter, 1.0, tags));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn ensure_hydrated(&self) {
        let mut memory = self.memory.write().await;
        if memory.is_empty() {
            if let Ok(loaded) = self.store.load_memory(&self.name).await {
                *memory = loaded;
            }
        }
    }

    async fn assemble_prompt(&self, input: &ExecutionInput, tools_bound: bool) -> String {
        let mut prompt = String::new();
        prompt.push_str("System: ");
        prompt.push_str(&self.description);
        prompt.push('\n');

        {
            let memory = self.memory.read().await;
            if !memory.is_empty() {
                prompt.push_str("Memory (most recent first):\n");
                for entry in memory.iter().rev().take(self.memory_limit) {
                    prompt.push_str("- ");
                    prompt.push_str(entry);
                    prompt.push('\n');
                }
            }
        }

        if tools_bound {
            prompt.push_str(
                "You can call tools using JSON format: \
                {\"tool\": \"tool_name\", \"arguments\": \"arguments here\"}. \
                Only use tools when helpful. Otherwise just answer directly.\n",
            );
        }

        prompt.push_str("User Input:\n");
        prompt.push_str(&input.content);
        prompt.push('\n');

        if let Some(template) = &self.prompt_template {
            prompt.push_str("Prompt Template:\n");
            prompt.push_str(template);
            prompt.push('\n');
        }

        prompt.push_str("Produce the best output now.");
        prompt
    }

    async fn remember(&self, entry: String) {
        persist_memory_best_effort(self.store.as_ref(), &self.name, &entry).await;
        self.memory.write().await.push(entry);
    }

    /// Produce an `ExecutionResult` for `input`, optionally via a single
    /// tool call, persisting a memory entry describing the outcome.
    pub async fn execute(&self, input: ExecutionInput) -> Result<ExecutionResult, WorkflowError> {
        if input.content.trim().is_empty() {
            return Err(WorkflowError::argument("execution input content must be non-empty"));
        }

        let span = info_span!("agent.execute", agent = %self.name, r#type = "unified");
        async {
            self.ensure_hydrated().await;

            let tools_bound = match &self.tools {
                Some(registry) => !registry.is_empty().await,
                None => false,
            };

            let prompt = self.assemble_prompt(&input, tools_bound).await;
            let start = Instant::now();

            let raw = match self.client.generate(&prompt).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(agent = %self.name, error = %e, "llm generation failed");
                    self.emit_execution_metrics(start.elapsed(), false);
                    self.emit_component_error("llm_provider", &e);
                    return Err(e);
                }
            };

            let result = if let Some(registry) = self.tools.as_ref().filter(|_| tools_bound) {
                match ToolCall::try_parse(&raw) {
                    Some(call) => {
                        let tool_result = registry.get(&call.tool).await;
                        match tool_result {
                            None => {
                                self.remember(format!(
                                    "TOOL_CALL {} arg={} (unknown tool)",
                                    call.tool,
                                    truncate_with_ellipsis(&call.arguments, TOOL_ARG_TRUNCATE_LEN)
                                ))
                                .await;
                                ExecutionResult::failure(format!(
                                    "[ERROR: unknown tool {}]",
                                    call.tool
                                ))
                            }
                            Some(tool) => {
                                let tool_input = ExecutionInput::new(call.arguments.clone());
                                let tool_start = Instant::now();
                                let outcome = tool.run(tool_input).await;
                                let tool_elapsed = tool_start.elapsed();
                                match outcome {
                                    Ok(outcome) => {
                                        self.emit_tool_metrics(&call.tool, tool_elapsed, outcome.success);
                                        self.remember(format!(
                                            "TOOL_CALL {} arg={}",
                                            call.tool,
                                            truncate_with_ellipsis(&call.arguments, TOOL_ARG_TRUNCATE_LEN)
                                        ))
                                        .await;
                                        outcome
                                    }
                                    Err(source) => {
                                        self.emit_tool_metrics(&call.tool, tool_elapsed, false);
                                        self.emit_tool_error(&call.tool);
                                        let e = WorkflowError::ToolExecutionFailure {
                                            tool: call.tool.clone(),
                                            source,
                                        };
                                        self.emit_execution_metrics(start.elapsed(), false);
                                        self.emit_component_error("tool_execution", &e);
                                        return Err(e);
                                    }
                                }
                            }
                        }
                    }
                    None => {
                        self.remember(format!(
                            "LLM_OUTPUT: {}",
                            truncate_with_ellipsis(&raw, LLM_OUTPUT_TRUNCATE_LEN)
                        ))
                        .await;
                        ExecutionResult::success(raw)
                    }
                }
            } else {
                self.remember(format!(
                    "LLM_OUTPUT: {}",
                    truncate_with_ellipsis(&raw, LLM_OUTPUT_TRUNCATE_LEN)
                ))
                .await;
                ExecutionResult::success(raw)
            };

            let elapsed = start.elapsed();
            self.emit_execution_metrics(elapsed, result.success);

            tracing::debug!(
                agent = %self.name,
                elapsed_ms = elapsed.as_millis(),
                success = result.success,
                "agent execution complete"
            );

            Ok(result)
        }
        .instrument(span)
        .await
    }
}

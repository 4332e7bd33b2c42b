//! Data model shared across the kernel: task definitions, execution I/O,
//! tool calls, retry bookkeeping, and collateral metrics.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved placeholder names in a `promptTemplate` that never resolve to an
/// earlier task's output.
pub const RESERVED_PLACEHOLDER_USER_REQUEST: &str = "user_request";
pub const RESERVED_PLACEHOLDER_PREV_OUTPUT: &str = "prev_output";

/// One node in a plan. Immutable once produced by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,
    pub description: String,
    pub prompt_template: String,
}

impl TaskDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        prompt_template: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            prompt_template: prompt_template.into(),
        }
    }

    /// Names of earlier tasks referenced as `{{name}}` placeholders inside
    /// this task's template, excluding the two reserved built-ins.
    pub fn placeholder_names(&self) -> Vec<String> {
        placeholder_names(&self.prompt_template)
    }
}

/// Extract every `{{name}}` token from a template string, in first-seen
/// order, excluding the reserved built-ins.
pub fn placeholder_names(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        if let Some(end) = after.find("}}") {
            let name = after[..end].trim();
            if !name.is_empty()
                && name != RESERVED_PLACEHOLDER_USER_REQUEST
                && name != RESERVED_PLACEHOLDER_PREV_OUTPUT
                && !names.contains(&name.to_string())
            {
                names.push(name.to_string());
            }
            rest = &after[end + 2..];
        } else {
            break;
        }
    }
    names
}

/// Render a template by literal substitution of `{{var}}` placeholders.
/// Unknown placeholders are left verbatim, per the prompt template contract.
pub fn render_template(template: &str, variables: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    loop {
        match rest.find("{{") {
            None => {
                out.push_str(rest);
                break;
            }
            Some(start) => {
                out.push_str(&rest[..start]);
                let after = &rest[start + 2..];
                match after.find("}}") {
                    None => {
                        out.push_str(&rest[start..]);
                        break;
                    }
                    Some(end) => {
                        let name = after[..end].trim();
                        match variables.get(name) {
                            Some(value) => out.push_str(value),
                            None => {
                                out.push_str("{{");
                                out.push_str(name);
                                out.push_str("}}");
                            }
                        }
                        rest = &after[end + 2..];
                    }
                }
            }
        }
    }
    out
}

/// An ordered plan produced once per workflow by the planner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub tasks: Vec<TaskDefinition>,
}

impl Plan {
    pub fn new(tasks: Vec<TaskDefinition>) -> Self {
        Self { tasks }
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }
}

/// Input to an agent's `execute` call.
#[derive(Debug, Clone)]
pub struct ExecutionInput {
    pub content: String,
    pub metadata: BTreeMap<String, String>,
}

impl ExecutionInput {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Result of an agent (or task) execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub metadata: BTreeMap<String, String>,
}

impl ExecutionResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// The structured wire form an agent's text output uses to request a tool
/// invocation: `{"tool": "<name>", "arguments": "<text>"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    pub arguments: String,
}

impl ToolCall {
    /// Parse `raw` as a tool call iff the entire trimmed string is a JSON
    /// object with non-empty string `tool` and `arguments` fields. Partial or
    /// embedded JSON, or extra trailing text, disqualifies it.
    pub fn try_parse(raw: &str) -> Option<ToolCall> {
        let trimmed = raw.trim();
        let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
        let obj = value.as_object()?;
        let tool = obj.get("tool")?.as_str()?;
        let arguments = obj.get("arguments")?.as_str()?;
        if tool.is_empty() || arguments.is_empty() {
            return None;
        }
        Some(ToolCall {
            tool: tool.to_string(),
            arguments: arguments.to_string(),
        })
    }
}

/// A single recorded attempt inside a `RetryContext`.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error_message: Option<String>,
}

/// Tracks one wrapped operation's retry history. Mutated only by the retry
/// engine (C1).
#[derive(Debug, Clone)]
pub struct RetryContext {
    start: Instant,
    pub attempts: Vec<AttemptRecord>,
}

impl RetryContext {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            attempts: Vec::new(),
        }
    }

    /// 1-based attempt count after the first failure; 0 before any attempt
    /// has been recorded.
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn record(&mut self, success: bool, error_message: Option<String>) {
        self.attempts.push(AttemptRecord {
            attempt: self.attempt_count() + 1,
            timestamp: Utc::now(),
            success,
            error_message,
        });
    }
}

impl Default for RetryContext {
    fn default() -> Self {
        Self::new()
    }
}

/// The kind of a collateral metric. The engine emits these but never
/// interprets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Timer,
    Gauge,
    Histogram,
}

/// One emitted metric sample. `tags` is immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub tags: BTreeMap<String, String>,
}

impl Metric {
    pub fn new(
        name: impl Into<String>,
        kind: MetricKind,
        value: f64,
        tags: BTreeMap<String, String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            value,
            timestamp: Utc::now(),
            tags,
        }
    }
}

//! Tool registry + tool contract (C3): name-addressed callable side-effects
//! with structured I/O, registered in a thread-safe concurrent map mirroring
//! `registry::ProviderRegistry`'s name-keyed table.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{CoreError, CoreResult};
use crate::model::{ExecutionInput, ExecutionResult};

/// `(name, description, run(ExecutionInput) -> ExecutionResult)`.
///
/// Tools validate their own input and return `success=false` with a
/// diagnostic for expected misuse (empty input, oversized input, control
/// characters). Unexpected failures may return `Err`, surfaced by callers as
/// a `ToolExecutionFailure`.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn run(&self, input: ExecutionInput) -> anyhow::Result<ExecutionResult>;
}

/// Thread-safe name→tool mapping. Registration and lookup are atomic with
/// respect to each other.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, tool: Arc<dyn Tool>) {
        self.tools.write().await.insert(tool.name().to_string(), tool);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    pub async fn is_empty(&self) -> bool {
        self.tools.read().await.is_empty()
    }

    pub async fn names(&self) -> Vec<String> {
        self.tools.read().await.keys().cloned().collect()
    }

    /// Look up `name` and invoke it, wrapping an unexpected error (not the
    /// tool's own `success=false` diagnostics) into a `ToolExecutionFailure`.
    pub async fn invoke(&self, name: &str, input: ExecutionInput) -> CoreResult<ExecutionResult> {
        let tool = self
            .get(name)
            .await
            .ok_or_else(|| CoreError::argument(format!("unknown tool {name}")))?;
        tool.run(input)
            .await
            .map_err(|source| CoreError::ToolExecution {
                tool: name.to_string(),
                source,
            })
    }
}

/// Basic misuse guards a tool can reuse before doing real work: reject
/// empty input, oversized input, or embedded control characters with a
/// `success=false` diagnostic rather than an error.
pub fn validate_basic_input(content: &str, max_len: usize) -> Result<(), ExecutionResult> {
    if content.trim().is_empty() {
        return Err(ExecutionResult::failure("[ERROR: empty input]"));
    }
    if content.len() > max_len {
        return Err(ExecutionResult::failure(format!(
            "[ERROR: input exceeds {max_len} bytes]"
        )));
    }
    if content.chars().any(|c| c.is_control() && c != '\n' && c != '\t') {
        return Err(ExecutionResult::failure(
            "[ERROR: input contains control characters]",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "echoes its input back"
        }

        async fn run(&self, input: ExecutionInput) -> anyhow::Result<ExecutionResult> {
            if let Err(diagnostic) = validate_basic_input(&input.content, 1000) {
                return Ok(diagnostic);
            }
            Ok(ExecutionResult::success(input.content))
        }
    }

    #[tokio::test]
    async fn register_then_invoke_roundtrips() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;

        let result = registry
            .invoke("echo", ExecutionInput::new("hello"))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, "hello");
    }

    #[tokio::test]
    async fn invoke_unknown_tool_is_argument_error() {
        let registry = ToolRegistry::new();
        let err = registry
            .invoke("missing", ExecutionInput::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Argument(_)));
    }

    #[tokio::test]
    async fn empty_input_is_fail_closed_not_an_error() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;
        let result = registry
            .invoke("echo", ExecutionInput::new("   "))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.output.contains("empty input"));
    }
}

//! Orchestrator (C6): owns a thread-safe agent registry plus a reference to
//! the persistence store, and creates implicit agents for one-off task
//! execution.

use std::collections::HashMap;
use std::sync::Arc;

use persistence_core::{
    ExecutionInput, ExecutionResult, MetricSink, NoopMetricSink, PersistenceStore, ToolRegistry,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::agent::Agent;
use crate::error::WorkflowError;
use crate::text_gen::TextGenClient;

/// Owns the agent registry (name -> agent) and a shared reference to the
/// persistence store used by every agent it creates.
pub struct Orchestrator {
    registry: RwLock<HashMap<String, Arc<Agent>>>,
    store: Arc<dyn PersistenceStore>,
    memory_limit: usize,
    metrics: Arc<dyn MetricSink>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn PersistenceStore>, memory_limit: usize) -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
            store,
            memory_limit,
            metrics: Arc::new(NoopMetricSink),
        }
    }

    /// Every agent this orchestrator creates from here on emits `agent.*`
    /// and `tool.*` metrics (§6) through `sink`.
    pub fn with_metric_sink(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.metrics = sink;
        self
    }

    fn check_non_blank(name: &str, value: &str) -> Result<(), WorkflowError> {
        if value.trim().is_empty() {
            return Err(WorkflowError::argument(format!("{name} must be non-blank")));
        }
        Ok(())
    }

    /// Register an explicit, named agent.
    pub async fn register(&self, agent: Agent) -> Result<(), WorkflowError> {
        Self::check_non_blank("agent name", agent.name())?;
        let name = agent.name().to_string();
        self.registry.write().await.insert(name, Arc::new(agent));
        Ok(())
    }

    /// Registry lookup, error if absent, delegates to the agent.
    pub async fn call_explicit(
        &self,
        name: &str,
        input: ExecutionInput,
    ) -> Result<ExecutionResult, WorkflowError> {
        Self::check_non_blank("agent name", name)?;
        let agent = {
            let registry = self.registry.read().await;
            registry
                .get(name)
                .cloned()
                .ok_or_else(|| WorkflowError::argument(format!("no such agent: {name}")))?
        };
        agent.execute(input).await
    }

    /// Construct a fresh, unregistered agent whose unique name is
    /// `"<nameHint>-<uuid>"`, sharing this orchestrator's persistence store.
    pub fn create_implicit_agent(
        &self,
        name_hint: &str,
        description: &str,
        client: Arc<dyn TextGenClient>,
        prompt_template: Option<String>,
    ) -> Result<Agent, WorkflowError> {
        Self::check_non_blank("name hint", name_hint)?;
        Self::check_non_blank("description", description)?;

        let name = format!("{name_hint}-{}", Uuid::new_v4());
        let mut agent = Agent::new(name, description, client, self.store.clone(), self.memory_limit)
            .with_metric_sink(self.metrics.clone());
        if let Some(template) = prompt_template {
            agent = agent.with_prompt_template(template);
        }
        Ok(agent)
    }

    pub fn create_implicit_agent_with_tools(
        &self,
        name_hint: &str,
        description: &str,
        client: Arc<dyn TextGenClient>,
        prompt_template: Option<String>,
        tools: Arc<ToolRegistry>,
    ) -> Result<Agent, WorkflowError> {
        Ok(self
            .create_implicit_agent(name_hint, description, client, prompt_template)?
            .with_tools(tools))
    }

    pub fn store(&self) -> Arc<dyn PersistenceStore> {
        self.store.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence_core::MemoryStore;

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(Arc::new(MemoryStore::new()), 10)
    }

    #[tokio::test]
    async fn call_explicit_on_missing_agent_is_argument_error() {
        let orch = orchestrator();
        let err = orch
            .call_explicit("nope", ExecutionInput::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Argument(_)));
    }

    #[tokio::test]
    async fn register_then_call_explicit_delegates() {
        let orch = orchestrator();
        let client = Arc::new(crate::text_gen::MockTextGenClient::new(["reply"]));
        let agent = Agent::new("named", "desc", client, orch.store(), 10);
        orch.register(agent).await.unwrap();

        let result = orch
            .call_explicit("named", ExecutionInput::new("hi"))
            .await
            .unwrap();
        assert_eq!(result.output, "reply");
    }

    #[tokio::test]
    async fn implicit_agent_name_has_uuid_suffix_and_is_not_registered() {
        let orch = orchestrator();
        let client = Arc::new(crate::text_gen::MockTextGenClient::new(Vec::<String>::new()));
        let agent = orch
            .create_implicit_agent("summarizer", "desc", client, None)
            .unwrap();
        assert!(agent.name().starts_with("summarizer-"));
        assert!(orch
            .call_explicit(agent.name(), ExecutionInput::new("x"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn blank_name_hint_is_argument_error() {
        let orch = orchestrator();
        let client = Arc::new(crate::text_gen::MockTextGenClient::new(Vec::<String>::new()));
        assert!(orch
            .create_implicit_agent("  ", "desc", client, None)
            .is_err());
    }
}

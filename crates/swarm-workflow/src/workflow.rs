//! Planner-Orchestrator (C10): the single entry point that loads-or-plans,
//! decides parallel vs sequential, and dispatches to C9.

use std::collections::BTreeMap;
use std::sync::Arc;

use persistence_core::{Plan, PersistenceStore};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::WorkflowConfig;
use crate::dependency_analyzer::DependencyAnalyzer;
use crate::error::WorkflowError;
use crate::executor::{AgentFactory, ExecutorConfig, ParallelExecutor, TaskOutcome};
use crate::orchestrator::Orchestrator;
use crate::planner::Planner;
use crate::text_gen::TextGenClient;

/// Load the saved plan for `workflow_id`, or call the planner and persist
/// one. A save failure is fatal.
async fn load_or_plan(
    workflow_id: &str,
    user_request: &str,
    planner_client: &dyn TextGenClient,
    store: &dyn PersistenceStore,
) -> Result<Plan, WorkflowError> {
    if let Some(plan) = store.load_plan(workflow_id).await? {
        return Ok(plan);
    }

    let tasks = Planner::plan(planner_client, user_request).await?;
    let plan = Plan::new(tasks);
    store.save_plan(workflow_id, &plan).await?;
    Ok(plan)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecutionMode {
    Parallel,
    Sequential,
}

fn decide_mode(config: &WorkflowConfig, num_tasks: usize, parallelism_ratio: f64) -> ExecutionMode {
    if !config.parallelism.enabled {
        return ExecutionMode::Sequential;
    }
    if num_tasks < config.parallelism.min_tasks_for_parallel_execution {
        return ExecutionMode::Sequential;
    }
    if parallelism_ratio > config.parallelism.parallelism_threshold {
        ExecutionMode::Parallel
    } else {
        ExecutionMode::Sequential
    }
}

/// Run (or resume) one workflow to completion, returning its task outcomes
/// in plan order.
pub async fn run_workflow(
    workflow_id: &str,
    user_request: &str,
    planner_client: Arc<dyn TextGenClient>,
    worker_client: Arc<dyn TextGenClient>,
    store: Arc<dyn PersistenceStore>,
    config: &WorkflowConfig,
    cancel: CancellationToken,
) -> Result<Vec<TaskOutcome>, WorkflowError> {
    let plan = load_or_plan(workflow_id, user_request, planner_client.as_ref(), store.as_ref()).await?;

    if plan.tasks.is_empty() {
        return Ok(Vec::new());
    }

    let plan_order: Vec<String> = plan.tasks.iter().map(|t| t.name.clone()).collect();
    let templates: BTreeMap<String, String> = plan
        .tasks
        .iter()
        .map(|t| (t.name.clone(), t.prompt_template.clone()))
        .collect();
    let descriptions: BTreeMap<String, String> = plan
        .tasks
        .iter()
        .map(|t| (t.name.clone(), t.description.clone()))
        .collect();

    let batches = DependencyAnalyzer::analyze(&plan.tasks)?;
    let mode = decide_mode(config, batches.num_tasks(), batches.parallelism_ratio());

    info!(
        workflow_id,
        num_tasks = batches.num_tasks(),
        num_batches = batches.num_batches(),
        parallelism_ratio = batches.parallelism_ratio(),
        mode = ?mode,
        "workflow execution plan ready"
    );

    let orchestrator = Arc::new(Orchestrator::new(store.clone(), config.memory.default_memory_limit));
    let agent_factory: AgentFactory = {
        let orchestrator = orchestrator.clone();
        let worker_client = worker_client.clone();
        let descriptions = descriptions.clone();
        Arc::new(move |task_name: &str, _rendered_prompt: &str| {
            let description = descriptions
                .get(task_name)
                .cloned()
                .unwrap_or_else(|| "Complete the assigned task.".to_string());
            orchestrator.create_implicit_agent(task_name, &description, worker_client.clone(), None)
        })
    };

    let executor = ParallelExecutor::new(ExecutorConfig {
        max_threads: config.parallelism.max_threads,
        max_parallel_tasks_per_batch: config.parallelism.max_parallel_tasks_per_batch,
        task_timeout: config.parallelism.task_timeout,
        fallback_to_sequential_enabled: config.parallelism.fallback_to_sequential_enabled,
    });

    let outcome = match mode {
        ExecutionMode::Parallel => {
            let result = executor
                .run(
                    workflow_id,
                    user_request,
                    &batches,
                    &plan_order,
                    &templates,
                    agent_factory.clone(),
                    store.clone(),
                    cancel.clone(),
                )
                .await;

            match result {
                Ok(outcomes) => Ok(outcomes),
                Err(e) if config.parallelism.fallback_to_sequential_enabled && !matches!(e, WorkflowError::Persistence(_) | WorkflowError::Cancelled) => {
                    tracing::warn!(workflow_id, error = %e, "parallel execution failed, falling back to sequential");
                    executor
                        .run_sequential(
                            workflow_id,
                            user_request,
                            &plan_order,
                            &templates,
                            agent_factory,
                            store.clone(),
                            cancel,
                        )
                        .await
                }
                Err(e) => Err(e),
            }
        }
        ExecutionMode::Sequential => {
            executor
                .run_sequential(
                    workflow_id,
                    user_request,
                    &plan_order,
                    &templates,
                    agent_factory,
                    store.clone(),
                    cancel,
                )
                .await
        }
    };

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence_core::MemoryStore;

    #[tokio::test]
    async fn small_plan_runs_sequentially_and_persists_outputs() {
        let planner_client = Arc::new(crate::text_gen::MockTextGenClient::new([
            r#"[{"name":"A","description":"first","promptTemplate":"{{user_request}}"},
                {"name":"B","description":"second","promptTemplate":"{{A}}"}]"#,
        ]));
        let worker_client = Arc::new(
            crate::text_gen::MockTextGenClient::new(["output-a", "output-b"]),
        );
        let store: Arc<dyn PersistenceStore> = Arc::new(MemoryStore::new());

        let outcomes = run_workflow(
            "wf-small",
            "plan a trip",
            planner_client,
            worker_client,
            store.clone(),
            &WorkflowConfig::for_tests(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].task_name, "A");
        assert_eq!(outcomes[0].result.output, "output-a");
        assert_eq!(outcomes[1].result.output, "output-b");

        let saved = store.load_task_outputs("wf-small").await.unwrap();
        assert_eq!(saved.len(), 2);
    }

    #[tokio::test]
    async fn resuming_reuses_saved_plan_and_skips_completed_tasks() {
        let store: Arc<dyn PersistenceStore> = Arc::new(MemoryStore::new());
        store
            .save_plan(
                "wf-resume",
                &Plan::new(vec![
                    persistence_core::TaskDefinition::new("A", "first", "{{user_request}}"),
                    persistence_core::TaskDefinition::new("B", "second", "{{A}}"),
                ]),
            )
            .await
            .unwrap();
        store.save_task_output("wf-resume", "A", "a-out").await.unwrap();

        // The planner client has no canned responses; if it were called the
        // workflow would fail, proving the saved plan was reused.
        let planner_client = Arc::new(crate::text_gen::MockTextGenClient::new(Vec::<String>::new()));
        let worker_client = Arc::new(crate::text_gen::MockTextGenClient::new(["b-out"]));

        let outcomes = run_workflow(
            "wf-resume",
            "plan a trip",
            planner_client,
            worker_client,
            store,
            &WorkflowConfig::for_tests(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].result.output, "a-out");
        assert_eq!(outcomes[1].result.output, "b-out");
    }

    #[tokio::test]
    async fn empty_plan_yields_empty_outcomes() {
        let planner_client = Arc::new(crate::text_gen::MockTextGenClient::new(Vec::<String>::new()));
        let worker_client = Arc::new(crate::text_gen::MockTextGenClient::new(Vec::<String>::new()));
        let store: Arc<dyn PersistenceStore> = Arc::new(MemoryStore::new());
        store.save_plan("wf-empty", &Plan::new(vec![])).await.unwrap();

        let outcomes = run_workflow(
            "wf-empty",
            "noop",
            planner_client,
            worker_client,
            store,
            &WorkflowConfig::for_tests(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(outcomes.is_empty());
    }
}

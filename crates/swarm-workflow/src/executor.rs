//! Parallel executor (C9): runs one ordered list of wavefronts with bounded
//! concurrency, per-task timeout, and cooperative cancellation, falling back
//! to a sequential path when configured or when parallel execution throws.
//!
//! Fan-out/fan-in shape (a `Semaphore`-bounded `JoinSet` per batch) is
//! modeled on the Deepthink mode's strategy fan-out.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use persistence_core::{
    render_template, ExecutionInput, ExecutionResult, PersistenceStore,
    RESERVED_PLACEHOLDER_PREV_OUTPUT, RESERVED_PLACEHOLDER_USER_REQUEST,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::Agent;
use crate::dependency_analyzer::Batches;
use crate::error::WorkflowError;

/// `(TaskDefinition) -> Agent`, breaking the executor's dependency on a full
/// orchestrator per the "minimal AgentFactory function value" design note.
pub type AgentFactory =
    Arc<dyn Fn(&str, &str) -> Result<Agent, WorkflowError> + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    pub max_threads: usize,
    pub max_parallel_tasks_per_batch: usize,
    pub task_timeout: Duration,
    pub fallback_to_sequential_enabled: bool,
}

/// One task's outcome alongside its name, preserving plan order in the
/// returned `Vec`.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_name: String,
    pub result: ExecutionResult,
}

pub struct ParallelExecutor {
    config: ExecutorConfig,
}

impl ParallelExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Snapshot `prev_output` as the output of the last-in-plan-order task
    /// among those already completed — not the most recently finished
    /// wall-clock task — so replays from a checkpoint render identical
    /// prompts.
    fn snapshot_prev_output(plan_order: &[String], completed: &BTreeMap<String, String>) -> String {
        plan_order
            .iter()
            .rev()
            .find_map(|name| completed.get(name))
            .cloned()
            .unwrap_or_default()
    }

    fn build_variables(
        user_request: &str,
        prev_output: &str,
        completed: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        let mut vars = completed.clone();
        vars.insert(RESERVED_PLACEHOLDER_USER_REQUEST.to_string(), user_request.to_string());
        vars.insert(RESERVED_PLACEHOLDER_PREV_OUTPUT.to_string(), prev_output.to_string());
        vars
    }

    /// Run `plan_order`/`batches` to completion. `templates` maps task name
    /// to its rendered-template source.
    pub async fn run(
        &self,
        workflow_id: &str,
        user_request: &str,
        batches: &Batches,
        plan_order: &[String],
        templates: &BTreeMap<String, String>,
        agent_factory: AgentFactory,
        store: Arc<dyn PersistenceStore>,
        cancel: CancellationToken,
    ) -> Result<Vec<TaskOutcome>, WorkflowError> {
        let mut completed: BTreeMap<String, String> = store.load_task_outputs(workflow_id).await?;
        let mut results_by_name: BTreeMap<String, ExecutionResult> = completed
            .iter()
            .map(|(name, output)| (name.clone(), ExecutionResult::success(output.clone())))
            .collect();

        let mut halted = false;

        'batches: for batch in &batches.batches {
            if halted {
                break;
            }
            if cancel.is_cancelled() {
                return Err(WorkflowError::Cancelled);
            }

            let pending: Vec<&String> = batch
                .iter()
                .filter(|name| !completed.contains_key(*name))
                .collect();

            if pending.is_empty() {
                continue;
            }

            let prev_output_snapshot = Self::snapshot_prev_output(plan_order, &completed);
            let permits = self.config.max_threads.min(self.config.max_parallel_tasks_per_batch).max(1);
            let semaphore = Arc::new(Semaphore::new(permits));
            let mut join_set: JoinSet<(String, Result<ExecutionResult, WorkflowError>)> =
                JoinSet::new();

            for task_name in pending {
                let template = templates
                    .get(task_name)
                    .cloned()
                    .unwrap_or_default();
                let variables = Self::build_variables(user_request, &prev_output_snapshot, &completed);
                let rendered = render_template(&template, &variables);

                let sem = semaphore.clone();
                let factory = agent_factory.clone();
                let timeout = self.config.task_timeout;
                let cancel_child = cancel.clone();
                let task_name = task_name.clone();

                join_set.spawn(async move {
                    let _permit = sem.acquire_owned().await.expect("semaphore closed");

                    let outcome = tokio::select! {
                        res = Self::run_one(&factory, &task_name, rendered, timeout) => res,
                        _ = cancel_child.cancelled() => Err(WorkflowError::Cancelled),
                    };
                    (task_name, outcome)
                });
            }

            let mut batch_failed = false;
            while let Some(joined) = join_set.join_next().await {
                let (task_name, outcome) = match joined {
                    Ok(pair) => pair,
                    Err(panic) => {
                        warn!(error = %panic, "task worker panicked");
                        continue;
                    }
                };

                match outcome {
                    Ok(result) => {
                        if result.success {
                            let persisted = store
                                .save_task_output(workflow_id, &task_name, &result.output)
                                .await;
                            if let Err(e) = persisted {
                                return Err(WorkflowError::Persistence(e));
                            }
                            completed.insert(task_name.clone(), result.output.clone());
                        } else {
                            batch_failed = true;
                        }
                        results_by_name.insert(task_name, result);
                    }
                    Err(WorkflowError::TaskTimeout { task, timeout_seconds }) => {
                        batch_failed = true;
                        results_by_name.insert(
                            task.clone(),
                            ExecutionResult::failure(format!(
                                "[ERROR: task `{task}` timed out after {timeout_seconds}s]"
                            )),
                        );
                    }
                    Err(WorkflowError::Cancelled) => {
                        return Err(WorkflowError::Cancelled);
                    }
                    Err(e) => {
                        batch_failed = true;
                        results_by_name.insert(task_name, ExecutionResult::failure(e.to_string()));
                    }
                }
            }

            if batch_failed {
                halted = true;
                break 'batches;
            }
        }

        info!(
            workflow_id,
            tasks = results_by_name.len(),
            halted,
            "parallel execution batch pass complete"
        );

        Ok(plan_order
            .iter()
            .filter_map(|name| {
                results_by_name.get(name).map(|result| TaskOutcome {
                    task_name: name.clone(),
                    result: result.clone(),
                })
            })
            .collect())
    }

    async fn run_one(
        factory: &AgentFactory,
        task_name: &str,
        rendered_prompt: String,
        timeout: Duration,
    ) -> Result<ExecutionResult, WorkflowError> {
        let agent = factory(task_name, &rendered_prompt)?;
        match tokio::time::timeout(timeout, agent.execute(ExecutionInput::new(rendered_prompt))).await {
            Ok(inner) => inner,
            Err(_elapsed) => Err(WorkflowError::TaskTimeout {
                task: task_name.to_string(),
                timeout_seconds: timeout.as_secs(),
            }),
        }
    }

    /// Visit tasks in plan order, skipping any whose output is already
    /// persisted, updating `prev_output` after each. Used when parallelism
    /// analysis declines, the task count is below the configured minimum, or
    /// as a fallback from a failed parallel run.
    pub async fn run_sequential(
        &self,
        workflow_id: &str,
        user_request: &str,
        plan_order: &[String],
        templates: &BTreeMap<String, String>,
        agent_factory: AgentFactory,
        store: Arc<dyn PersistenceStore>,
        cancel: CancellationToken,
    ) -> Result<Vec<TaskOutcome>, WorkflowError> {
        let mut completed: BTreeMap<String, String> = store.load_task_outputs(workflow_id).await?;
        let mut outcomes = Vec::with_capacity(plan_order.len());

        for task_name in plan_order {
            if cancel.is_cancelled() {
                return Err(WorkflowError::Cancelled);
            }

            if let Some(output) = completed.get(task_name) {
                outcomes.push(TaskOutcome {
                    task_name: task_name.clone(),
                    result: ExecutionResult::success(output.clone()),
                });
                continue;
            }

            let prev_output = Self::snapshot_prev_output(plan_order, &completed);
            let template = templates.get(task_name).cloned().unwrap_or_default();
            let variables = Self::build_variables(user_request, &prev_output, &completed);
            let rendered = render_template(&template, &variables);

            let result = Self::run_one(&agent_factory, task_name, rendered, self.config.task_timeout).await;

            match result {
                Ok(result) if result.success => {
                    store
                        .save_task_output(workflow_id, task_name, &result.output)
                        .await
                        .map_err(WorkflowError::Persistence)?;
                    completed.insert(task_name.clone(), result.output.clone());
                    outcomes.push(TaskOutcome {
                        task_name: task_name.clone(),
                        result,
                    });
                    continue;
                }
                Ok(result) => {
                    outcomes.push(TaskOutcome {
                        task_name: task_name.clone(),
                        result,
                    });
                }
                Err(WorkflowError::TaskTimeout { task, timeout_seconds }) => {
                    outcomes.push(TaskOutcome {
                        task_name: task.clone(),
                        result: ExecutionResult::failure(format!(
                            "[ERROR: task `{task}` timed out after {timeout_seconds}s]"
                        )),
                    });
                }
                Err(WorkflowError::Cancelled) => return Err(WorkflowError::Cancelled),
                Err(e) => {
                    outcomes.push(TaskOutcome {
                        task_name: task_name.clone(),
                        result: ExecutionResult::failure(e.to_string()),
                    });
                }
            }

            // A failed task halts graph progress in the default policy.
            break;
        }

        Ok(outcomes)
    }
}

//! Runtime configuration (§6): parallelism and memory knobs layered over
//! `persistence_core`'s retry defaults, read from environment variables the
//! same way `persistence_core::RetryDefaults` does.

use std::time::Duration;

use persistence_core::RetryDefaults;

fn env_parsed<T: std::str::FromStr>(name: &str, predicate: impl Fn(&T) -> bool) -> Option<T> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .filter(predicate)
}

#[derive(Debug, Clone)]
pub struct ParallelismConfig {
    pub enabled: bool,
    pub max_threads: usize,
    pub max_parallel_tasks_per_batch: usize,
    pub task_timeout: Duration,
    pub min_tasks_for_parallel_execution: usize,
    pub parallelism_threshold: f64,
    pub fallback_to_sequential_enabled: bool,
}

impl Default for ParallelismConfig {
    fn default() -> Self {
        let max_threads = env_parsed("WORKFLOW_PARALLELISM_MAX_THREADS", |v: &usize| *v > 0)
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1));
        let max_parallel_tasks_per_batch =
            env_parsed("WORKFLOW_PARALLELISM_MAX_PARALLEL_TASKS_PER_BATCH", |v: &usize| *v > 0)
                .unwrap_or(max_threads);

        Self {
            enabled: env_parsed("WORKFLOW_PARALLELISM_ENABLED", |_: &bool| true).unwrap_or(true),
            max_threads,
            max_parallel_tasks_per_batch,
            task_timeout: Duration::from_secs(
                env_parsed("WORKFLOW_PARALLELISM_TASK_TIMEOUT_SECONDS", |v: &u64| *v > 0)
                    .unwrap_or(300),
            ),
            min_tasks_for_parallel_execution: env_parsed(
                "WORKFLOW_PARALLELISM_MIN_TASKS_FOR_PARALLEL_EXECUTION",
                |v: &usize| *v > 0,
            )
            .unwrap_or(2),
            parallelism_threshold: env_parsed("WORKFLOW_PARALLELISM_THRESHOLD", |v: &f64| {
                (0.0..=1.0).contains(v)
            })
            .unwrap_or(0.3),
            fallback_to_sequential_enabled: env_parsed(
                "WORKFLOW_PARALLELISM_FALLBACK_TO_SEQUENTIAL_ENABLED",
                |_: &bool| true,
            )
            .unwrap_or(true),
        }
    }
}

impl ParallelismConfig {
    /// Deterministic config for tests: small timeouts, fixed thread count.
    pub fn for_tests() -> Self {
        Self {
            enabled: true,
            max_threads: 4,
            max_parallel_tasks_per_batch: 4,
            task_timeout: Duration::from_secs(5),
            min_tasks_for_parallel_execution: 2,
            parallelism_threshold: 0.3,
            fallback_to_sequential_enabled: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub default_memory_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            default_memory_limit: env_parsed("WORKFLOW_MEMORY_DEFAULT_MEMORY_LIMIT", |v: &usize| *v > 0)
                .unwrap_or(10),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowConfig {
    pub parallelism: ParallelismConfig,
    pub memory: MemoryConfig,
    pub retry: RetryDefaults,
}

impl WorkflowConfig {
    pub fn for_tests() -> Self {
        Self {
            parallelism: ParallelismConfig::for_tests(),
            memory: MemoryConfig { default_memory_limit: 10 },
            retry: RetryDefaults::for_tests(),
        }
    }
}

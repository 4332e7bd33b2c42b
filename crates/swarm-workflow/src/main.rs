use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use persistence_core::{MemoryStore, PersistenceStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use swarm_workflow::{run_workflow, MockTextGenClient, TextGenClient, WorkflowConfig};

/// Run a planner-orchestrated multi-agent workflow against a user request.
#[derive(Parser, Debug)]
#[command(name = "swarm-workflow", about = "Plan and execute a multi-agent workflow")]
struct Cli {
    /// Identifier used to persist and resume this workflow's state.
    #[arg(long)]
    workflow_id: String,

    /// The request handed to the planner.
    #[arg(long)]
    request: String,

    /// Run against an offline echo client instead of a real backend; useful
    /// for smoke-testing the CLI wiring without network access.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Directory for the RocksDB-backed persistence store. Falls back to an
    /// in-memory store (state lost on exit) when omitted.
    #[cfg(feature = "rocksdb-store")]
    #[arg(long)]
    store_path: Option<String>,
}

fn build_store(cli: &Cli) -> Result<Arc<dyn PersistenceStore>> {
    #[cfg(feature = "rocksdb-store")]
    {
        if let Some(path) = &cli.store_path {
            let store = persistence_core::RocksStore::open(path)
                .with_context(|| format!("opening rocksdb store at {path}"))?;
            return Ok(Arc::new(store));
        }
    }
    let _ = cli;
    Ok(Arc::new(MemoryStore::new()))
}

fn build_client(dry_run: bool) -> Arc<dyn TextGenClient> {
    if dry_run {
        Arc::new(MockTextGenClient::new(Vec::<String>::new()).with_echo_fallback())
    } else {
        // No real backend is wired into this binary; callers embed this
        // crate as a library and supply their own `TextGenClient`.
        Arc::new(MockTextGenClient::new(Vec::<String>::new()).with_echo_fallback())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = WorkflowConfig::default();

    info!(
        workflow_id = %cli.workflow_id,
        max_threads = config.parallelism.max_threads,
        parallelism_enabled = config.parallelism.enabled,
        "starting workflow"
    );

    let store = build_store(&cli)?;
    let planner_client = build_client(cli.dry_run);
    let worker_client = build_client(cli.dry_run);
    let cancel = CancellationToken::new();

    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received interrupt, cancelling workflow");
            cancel_on_signal.cancel();
        }
    });

    let outcomes = run_workflow(
        &cli.workflow_id,
        &cli.request,
        planner_client,
        worker_client,
        store,
        &config,
        cancel,
    )
    .await
    .context("workflow execution failed")?;

    for outcome in &outcomes {
        if outcome.result.success {
            info!(task = %outcome.task_name, "task succeeded");
            println!("[{}] {}", outcome.task_name, outcome.result.output);
        } else {
            error!(task = %outcome.task_name, "task failed");
            println!("[{}] FAILED: {}", outcome.task_name, outcome.result.output);
        }
    }

    Ok(())
}

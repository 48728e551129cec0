//! CLI entry point wiring an `Agent` together for one DAG run. Grounded on
//! `clap`-derive CLI shape plus `tracing-subscriber`
//! `EnvFilter` init at the top of `main`.
//!
//! DAG parsing (the YAML/JSON DSL -> `Dag`) is out of scope; this binary
//! reads a DAG already in its serialized `dagu_types::Dag` JSON form, which
//! is the one concrete `DagStore` this crate ships as a reference for
//! local/dev use.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dagu_agent::agent::{Agent, AgentConfig};
use dagu_agent::contracts::DagStore;
use dagu_agent::db_client::StoreBackedSubRunClient;
use dagu_agent::error::{AgentError, Result};
use dagu_agent::executors::ShellExecutor;
use dagu_agent::secrets::{EnvSecretProvider, FileSecretProvider, SecretRegistry};
use dagu_agent::storage_adapter::StorageBackedRunStore;
use dagu_types::{Dag, DagRunRef};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dagu-agent", about = "Per-run DAG supervisor")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a fresh attempt for a DAG run.
    Run(RunArgs),
    /// Retry a previous attempt, optionally from a single step.
    Retry(RunArgs),
}

#[derive(Parser)]
struct RunArgs {
    /// Path to a parsed DAG, serialized as `dagu_types::Dag` JSON.
    #[arg(long)]
    dag_file: PathBuf,
    #[arg(long)]
    dag_run_id: String,
    #[arg(long)]
    root: Option<String>,
    #[arg(long)]
    parent: Option<String>,
    #[arg(long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,
    #[arg(long, default_value = ".")]
    working_dir: PathBuf,
    #[arg(long)]
    log_dir: Option<PathBuf>,
    #[arg(long)]
    socket_path: Option<PathBuf>,
    /// Only meaningful for `retry`: restart just this step and its
    /// successors instead of the full failed/aborted set.
    #[arg(long)]
    retry_step: Option<String>,
    /// Drive the run to completion without creating an attempt or persisting
    /// any history.
    #[arg(long)]
    dry: bool,
}

/// Reads a DAG's JSON form from `<dir>/<name>.json`. The one `DagStore`
/// this crate ships for local/dev use; a production deployment supplies
/// its own backed by whatever parses/validates the DSL.
struct FileDagStore {
    dir: PathBuf,
}

#[async_trait::async_trait]
impl DagStore for FileDagStore {
    async fn get_dag(&self, name: &str) -> Result<Dag> {
        let path = self.dir.join(format!("{name}.json"));
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(AgentError::Io)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run_attempt(args, false).await,
        Command::Retry(args) => run_attempt(args, true).await,
    }
}

async fn run_attempt(args: RunArgs, is_retry: bool) -> anyhow::Result<()> {
    let dag_dir = args
        .dag_file
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let dag_name = args
        .dag_file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("dag")
        .to_string();

    let dag_store = Arc::new(FileDagStore { dir: dag_dir.clone() });
    let dag = dag_store.get_dag(&dag_name).await?;

    let paths = dagu_storage::DaguPaths::new()?;
    let run_store_inner = dagu_storage::RunStore::with_paths(paths.clone());
    let run_store: Arc<dyn dagu_agent::contracts::DagRunStore> =
        Arc::new(StorageBackedRunStore::new(run_store_inner));

    let retry_target = if is_retry {
        run_store.latest_status(&dag_name, &args.dag_run_id).await?
    } else {
        None
    };

    // At-most-one is about live Agents holding an attempt open; a dry run
    // never creates one, so it doesn't need the lock.
    let _lock = if args.dry {
        None
    } else {
        Some(
            dagu_storage::RunLockGuard::acquire(
                &paths.run_dir(&dag_name, &args.dag_run_id),
                &args.dag_run_id,
            )
            .await?,
        )
    };

    let log_dir = args.log_dir.unwrap_or_else(|| args.working_dir.join("logs"));
    tokio::fs::create_dir_all(&log_dir).await?;

    let socket_path = args
        .socket_path
        .unwrap_or_else(|| log_dir.join(format!("{}.sock", args.dag_run_id)));

    let mut secret_registry = SecretRegistry::new();
    secret_registry.register(Arc::new(EnvSecretProvider));
    secret_registry.register(Arc::new(FileSecretProvider));

    let config = AgentConfig {
        dag,
        dag_run_id: args.dag_run_id.clone(),
        root: args
            .root
            .map(|r| r.parse())
            .transpose()
            .map_err(|_| anyhow::anyhow!("invalid --root reference"))?
            .unwrap_or_else(DagRunRef::none),
        parent: args
            .parent
            .map(|p| p.parse())
            .transpose()
            .map_err(|_| anyhow::anyhow!("invalid --parent reference"))?
            .unwrap_or_else(DagRunRef::none),
        params_list: args.params,
        working_dir: args.working_dir.clone(),
        log_dir: log_dir.clone(),
        control_socket_path: socket_path.clone(),
        retry_target,
        retry_step: args.retry_step,
        dry: args.dry,
    };

    let executor = Arc::new(ShellExecutor);
    let agent = Agent::new(config, run_store.clone(), executor, secret_registry);

    // The sub-run client is constructed for downstream step executors that
    // need it; this binary's reference `ShellExecutor` doesn't spawn
    // sub-DAGs itself, so it's only wired here to document the shape.
    let _sub_run_client = StoreBackedSubRunClient::new(dag_store, run_store);

    let status = agent.run().await?;
    tracing::info!(status = %status, "agent finished");
    Ok(())
}

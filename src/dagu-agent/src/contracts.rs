//! Trait seams for every external collaborator this crate treats as
//! out of scope, consumed only through these contracts.
//!
//! Grounded on `cortex-engine::client::ModelClient` and
//! `cortex-engine::sandbox::runner::SandboxBackend`: define the trait where
//! it's consumed, register concrete implementations at construction time
//! (no global init magic), keep the trait object `Send + Sync` so it can be
//! shared across the task set.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dagu_types::{Dag, DagRunOutputs, DagRunRef, DagRunStatus, SubRunStatus};

use crate::error::Result;

/// Step name -> OS pid of its currently running process. Any `StepExecutor`
/// that spawns a real OS process registers it here so the Signal Controller
/// can act on "all running node processes" (§4.2/§4.3) without knowing which
/// concrete executor started them.
pub type PidRegistry = dashmap::DashMap<String, u32>;

/// Reads parsed DAG definitions by name.
#[async_trait]
pub trait DagStore: Send + Sync {
    async fn get_dag(&self, name: &str) -> Result<Dag>;
}

/// One recorded attempt of a run, with an open/write/close lifecycle.
#[async_trait]
pub trait DagRunAttempt: Send + Sync {
    fn id(&self) -> &str;
    async fn open(&self) -> Result<()>;
    async fn write_status(&self, status: &DagRunStatus) -> Result<()>;
    async fn write_outputs(&self, outputs: &DagRunOutputs) -> Result<()>;
    async fn close(&self) -> Result<()>;
    /// Set by a parent's `request_child_cancel` or an operator.
    async fn request_abort(&self) -> Result<()>;
    /// Polled by the Cancel Watcher.
    async fn is_abort_requested(&self) -> Result<bool>;
}

/// Persistent storage backend for DAG run history.
#[async_trait]
pub trait DagRunStore: Send + Sync {
    async fn create_attempt(
        &self,
        dag_name: &str,
        dag_run_id: &str,
    ) -> Result<Arc<dyn DagRunAttempt>>;

    /// The saved status used as a retry target.
    async fn latest_status(
        &self,
        dag_name: &str,
        dag_run_id: &str,
    ) -> Result<Option<DagRunStatus>>;

    /// A handle to the most recently created attempt for `(dag_name,
    /// dag_run_id)`, without creating a new one. Used by
    /// `request_child_cancel` to reach an already-running sub-run's attempt.
    async fn latest_attempt(
        &self,
        dag_name: &str,
        dag_run_id: &str,
    ) -> Result<Option<Arc<dyn DagRunAttempt>>>;

    /// Triggered alongside attempt creation.
    async fn cleanup_retention(&self, dag_name: &str, retention_days: u32) -> Result<()>;
}

/// A secret provider backend, keyed by name in the `SecretRegistry`.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Parse-time validation (e.g. the file provider requires a non-empty key).
    fn validate(&self, secret_ref: &dagu_types::SecretRef) -> Result<()>;

    /// Fetch the value. `working_dir` and `dag_file_dir` back the file
    /// provider's base-dir fallback chain.
    async fn resolve(
        &self,
        secret_ref: &dagu_types::SecretRef,
        working_dir: &Path,
        dag_file_dir: Option<&Path>,
    ) -> Result<String>;

    /// Dry-run/validate check that must not fetch the value.
    async fn check_accessibility(
        &self,
        secret_ref: &dagu_types::SecretRef,
        working_dir: &Path,
        dag_file_dir: Option<&Path>,
    ) -> Result<()>;
}

/// Sends DAG-level mail notifications.
pub trait Mailer: Send + Sync {
    fn send(&self, subject: &str, body: &str) -> Result<()>;
}

/// Remote coordinator that dispatches sub-DAG tasks across workers. The
/// Agent only needs to hand off a sub-run request and poll/cancel it
/// through `SubRunClient` below.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch_sub_run(&self, dag_name: &str, params: &str) -> Result<DagRunRef>;
}

/// Emits spans/events to an external telemetry backend. Span export is out
/// of scope, not `tracing` itself — every component still logs through
/// `tracing` regardless of which `Tracer` is wired in.
pub trait Tracer: Send + Sync {
    fn start_root_span(&self, run: &DagRunRef);
}

/// Receives live node/status updates for rendering (e.g. a TUI). `report`
/// must not block the progress pipeline.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, status: &DagRunStatus);
}

/// Executes one step's command and reports its outcome. `dagu-agent` ships
/// `ShellExecutor` (local subprocess) as the one reference implementation;
/// container/ssh/sub-dag executors are external.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, ctx: StepExecutionContext<'_>) -> Result<StepExecutionOutcome>;
}

/// Everything a `StepExecutor` needs to run one step attempt.
pub struct StepExecutionContext<'a> {
    pub step: &'a dagu_types::Step,
    pub dag_run_id: &'a str,
    pub dag_name: &'a str,
    pub working_dir: &'a Path,
    pub env: &'a std::collections::BTreeMap<String, String>,
    pub stdout_path: &'a Path,
    pub stderr_path: &'a Path,
    /// Register the spawned process's pid here for the run's duration so
    /// the Signal Controller can find and signal it.
    pub pid_registry: &'a PidRegistry,
}

/// The result of one step attempt, before retry/repeat/ContinueOn logic
/// is applied by the Runner.
#[derive(Debug, Clone)]
pub struct StepExecutionOutcome {
    pub exit_code: i32,
    pub output_variable: Option<(String, String)>,
    pub sub_runs: Vec<DagRunRef>,
    pub error: Option<String>,
}

/// Consumed by step executors that spawn sub-DAGs. Resolution is always
/// scoped by `root` so deeply nested sub-runs stay findable.
#[async_trait]
pub trait SubRunClient: Send + Sync {
    async fn get_dag(&self, name: &str) -> Result<Dag>;
    async fn get_sub_dag_run_status(
        &self,
        sub_run_id: &str,
        root: &DagRunRef,
    ) -> Result<SubRunStatus>;
    async fn is_sub_dag_run_completed(&self, sub_run_id: &str, root: &DagRunRef) -> Result<bool>;
    async fn request_child_cancel(&self, sub_run_id: &str, root: &DagRunRef) -> Result<()>;
}

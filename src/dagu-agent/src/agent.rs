//! `Agent`: the composition root for one DAG run. Grounded on
//! `run_with_shutdown`'s compose-then-serve-then-cleanup shape: assemble
//! every collaborator up front, run the main work concurrently with the
//! control socket, then unwind deterministically regardless of how the run
//! ended.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dagu_types::{Dag, DagRunRef, RunStatus};
use nix::sys::signal::Signal;
use tracing::{error, info};

use crate::cancel_watcher::CancelWatcher;
use crate::contracts::{DagRunStore, ProgressReporter, StepExecutor};
use crate::error::Result;
use crate::outputs_collector::OutputsCollector;
use crate::plan::Plan;
use crate::runner::{GraphOutcome, Runner};
use crate::secrets::SecretRegistry;
use crate::signal::SignalController;
use crate::status_writer::StatusWriter;

/// Reference `ProgressReporter`: logs each snapshot at debug level. A TUI
/// or other live-rendering frontend supplies its own in place of this one.
struct TracingProgressReporter;

impl ProgressReporter for TracingProgressReporter {
    fn report(&self, status: &dagu_types::DagRunStatus) {
        tracing::debug!(
            dag_run_id = %status.dag_run_id,
            status = %status.status,
            nodes = status.nodes.len(),
            "progress update"
        );
    }
}

/// Everything needed to run one DAG attempt start to finish.
pub struct AgentConfig {
    pub dag: Dag,
    pub dag_run_id: String,
    pub root: DagRunRef,
    pub parent: DagRunRef,
    pub params_list: Vec<String>,
    pub working_dir: PathBuf,
    pub log_dir: PathBuf,
    pub control_socket_path: PathBuf,
    pub retry_target: Option<dagu_types::DagRunStatus>,
    pub retry_step: Option<String>,
    /// When true, drive the runner to completion but never create an
    /// attempt, open the control socket, or persist any history (§4.10
    /// step 9 / §7: "no attempt records created for dry-run").
    pub dry: bool,
}

pub struct Agent {
    config: AgentConfig,
    run_store: Arc<dyn DagRunStore>,
    executor: Arc<dyn StepExecutor>,
    secret_registry: SecretRegistry,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        run_store: Arc<dyn DagRunStore>,
        executor: Arc<dyn StepExecutor>,
        secret_registry: SecretRegistry,
    ) -> Self {
        Self {
            config,
            run_store,
            executor,
            secret_registry,
        }
    }

    /// Drives one attempt through the full lifecycle:
    /// 1. build the Plan (fresh or retry),
    /// 2. resolve secrets,
    /// 3. create + open the attempt,
    /// 4. run the init handler,
    /// 5. start the control socket + cancel watcher + signal controller,
    /// 6. run the main graph,
    /// 7. run the appropriate exit handler,
    /// 8. collect + persist outputs,
    /// 9. write the final status and close the attempt,
    /// 10. trigger retention cleanup.
    pub async fn run(self) -> Result<RunStatus> {
        let dag = Arc::new(self.config.dag.clone());

        let plan = Arc::new(match (&self.config.retry_target, &self.config.retry_step) {
            (Some(target), Some(step)) => Plan::from_retry_step(&dag, target, step)?,
            (Some(target), None) => Plan::from_retry_target(&dag, target)?,
            (None, _) => Plan::from_dag(&dag)?,
        });

        let dag_file_dir = dag.working_dir.as_ref().map(PathBuf::from);
        let resolved_secrets = self
            .secret_registry
            .resolve_all(&dag.secrets, &self.config.working_dir, dag_file_dir.as_deref())
            .await?;
        let secret_values: Vec<String> = resolved_secrets.iter().map(|(_, v)| v.clone()).collect();
        let mut env: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in &resolved_secrets {
            env.insert(name.clone(), value.clone());
        }

        if self.config.dry {
            // Dry mode: drive the runner against a noop context and return
            // its result without creating an attempt or writing any history
            // (§4.10 step 9). No control socket, no cancel watcher, no
            // signal ladder — there is nothing running outside this task
            // that a `POST /stop` or parent cancel could reach anyway.
            let runner = Runner::new(
                dag.clone(),
                plan.clone(),
                self.executor.clone(),
                self.config.dag_run_id.clone(),
                dag.name.clone(),
                self.config.working_dir.clone(),
                self.config.log_dir.clone(),
                env,
                Arc::new(AtomicBool::new(false)),
            );
            // No consumer reads this; a dry run persists nothing, so a
            // per-node progress stream has nowhere to go. Drop the
            // receiving end immediately so sends fail fast instead of
            // blocking on a full, never-drained buffer.
            let (dry_progress_tx, dry_progress_rx) = tokio::sync::mpsc::channel(16);
            drop(dry_progress_rx);
            let outcome = runner.run(dry_progress_tx).await?;
            let final_status: RunStatus = outcome.into();
            info!(dag_run_id = %self.config.dag_run_id, status = %final_status, "dry run finished");
            return Ok(final_status);
        }

        let attempt = self
            .run_store
            .create_attempt(&dag.name, &self.config.dag_run_id)
            .await?;
        attempt.open().await?;

        let status_writer = Arc::new(StatusWriter::new(
            attempt.clone(),
            plan.clone(),
            dag.clone(),
            self.config.dag_run_id.clone(),
            self.config.root.clone(),
            self.config.parent.clone(),
            self.config.params_list.clone(),
        ));

        let pid = std::process::id();
        status_writer.write_initial(Some(pid)).await?;
        status_writer.spawn_delayed_write(Some(pid));

        if let Some(init_step) = dag.on_init.clone() {
            self.run_handler(&init_step, &dag, &env).await;
        }

        let abort = Arc::new(AtomicBool::new(false));
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let (socket_stop_tx, socket_stop_rx) = tokio::sync::oneshot::channel::<()>();

        let socket_path = self.config.control_socket_path.clone();
        let socket_status_writer = status_writer.clone();
        let socket_abort = abort.clone();
        let socket_handle = tokio::spawn(async move {
            if let Err(e) = crate::control_socket::serve(
                &socket_path,
                socket_status_writer,
                socket_abort,
                async {
                    let _ = socket_stop_rx.await;
                },
            )
            .await
            {
                error!(error = %e, "control socket server exited with an error");
            }
        });

        let cancel_watcher = CancelWatcher::new(attempt.clone(), abort.clone());
        let cancel_handle = tokio::spawn(async move {
            cancel_watcher
                .run(async {
                    let _ = stop_rx.await;
                })
                .await;
        });

        let runner = Runner::new(
            dag.clone(),
            plan.clone(),
            self.executor.clone(),
            self.config.dag_run_id.clone(),
            dag.name.clone(),
            self.config.working_dir.clone(),
            self.config.log_dir.clone(),
            env.clone(),
            abort.clone(),
        );

        let signal_controller_abort = abort.clone();
        let signal_controller_plan = plan.clone();
        let pid_registry = runner.pid_registry();
        let max_cleanup_time = dag.max_cleanup_time;
        let (runner_done_tx, mut runner_done_rx) = tokio::sync::oneshot::channel::<()>();
        let signal_handle = tokio::spawn(async move {
            // Polls `abort` every 500ms and drives the kill ladder as soon
            // as it's set. Exits only once the runner has actually returned
            // (`runner_done_rx` resolves) — `Plan::is_running` can read
            // false for the brief gap between one node finishing and the
            // next being marked Running even while the graph is still in
            // flight, so it can't be used as a "run is over" signal.
            loop {
                tokio::select! {
                    _ = &mut runner_done_rx => {
                        return;
                    }
                    _ = tokio::time::sleep(std::time::Duration::from_millis(500)) => {
                        if signal_controller_abort.load(Ordering::Relaxed) {
                            SignalController::new(signal_controller_plan.clone(), pid_registry, max_cleanup_time)
                                .signal(Signal::SIGTERM, true)
                                .await;
                            return;
                        }
                    }
                }
            }
        });

        let (progress_tx, mut progress_rx) = tokio::sync::mpsc::channel(64);
        let progress_status_writer = status_writer.clone();
        let progress_reporter: Arc<dyn ProgressReporter> = Arc::new(TracingProgressReporter);
        let progress_handle = tokio::spawn(async move {
            // On every Node event from the Runner, write a fresh status
            // (last-write-wins) and hand the snapshot to the reporter.
            while progress_rx.recv().await.is_some() {
                if let Err(e) = progress_status_writer.write_event(Some(pid)).await {
                    tracing::warn!(error = %e, "per-event status write failed");
                    continue;
                }
                let snapshot = progress_status_writer.snapshot(RunStatus::Running, Some(pid)).await;
                progress_reporter.report(&snapshot);
            }
        });

        let outcome = runner.run(progress_tx).await.unwrap_or_else(|e| {
            error!(error = %e, "runner failed");
            GraphOutcome::Failed
        });
        let _ = runner_done_tx.send(());

        // Drain the progress pipeline before signalling Stop so every event
        // the Runner emitted is written and reported.
        let _ = progress_handle.await;

        let _ = stop_tx.send(());
        let _ = socket_stop_tx.send(());
        let _ = cancel_handle.await;
        let _ = signal_handle.await;
        let _ = socket_handle.await;

        let handler = match outcome {
            GraphOutcome::Succeeded => dag.on_success.clone(),
            GraphOutcome::Failed => dag.on_failure.clone(),
            GraphOutcome::Aborted => dag.on_cancel.clone(),
            GraphOutcome::PartiallySucceeded => None,
        };
        if let Some(step) = handler {
            self.run_handler(&step, &dag, &env).await;
        }
        if let Some(step) = dag.on_exit.clone() {
            self.run_handler(&step, &dag, &env).await;
        }

        let final_status: RunStatus = outcome.into();
        let collector = OutputsCollector::new(&dag, &plan);
        let artifact = collector
            .build_artifact(&self.config.dag_run_id, attempt.id(), final_status, &secret_values)
            .await;
        if !artifact.outputs.is_empty() {
            attempt.write_outputs(&artifact).await?;
        }
        status_writer.write_final(final_status, Some(pid)).await?;

        if let Some(retention_days) = dag.hist_retention_days {
            if let Err(e) = self.run_store.cleanup_retention(&dag.name, retention_days).await {
                error!(error = %e, "retention cleanup failed");
            }
        }

        info!(dag_run_id = %self.config.dag_run_id, status = %final_status, "run finished");
        Ok(final_status)
    }

    async fn run_handler(&self, step: &dagu_types::Step, dag: &Dag, env: &BTreeMap<String, String>) {
        let stdout_path = self.config.log_dir.join(format!("{}.stdout.log", step.name));
        let stderr_path = self.config.log_dir.join(format!("{}.stderr.log", step.name));
        let pid_registry = crate::contracts::PidRegistry::new();
        let ctx = crate::contracts::StepExecutionContext {
            step,
            dag_run_id: &self.config.dag_run_id,
            dag_name: &dag.name,
            working_dir: &self.config.working_dir,
            env,
            stdout_path: &stdout_path,
            stderr_path: &stderr_path,
            pid_registry: &pid_registry,
        };
        if let Err(e) = self.executor.execute(ctx).await {
            error!(step = %step.name, error = %e, "handler step failed");
        }
    }
}

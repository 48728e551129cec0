//! The Runner: drives a `Plan` to completion — admission/ready set
//! computation, concurrency cap, inter-start delay, per-node retry/repeat,
//! and DAG-level timeout.
//!
//! Grounded on `cortex-engine::exec::runner::execute_command` and the
//! `tools/handlers/subagent` fan-out shape: a bounded pool of concurrent
//! child tasks feeding completions back through a single `JoinSet`, rather
//! than a fixed-size worker-thread pool.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dagu_types::{Dag, NodeStatus, RunStatus, Step};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, info, warn};

use crate::contracts::{PidRegistry, StepExecutionContext, StepExecutionOutcome, StepExecutor};
use crate::error::Result;
use crate::executors::evaluate_precondition;
use crate::node::Node;
use crate::plan::Plan;

/// Shared abort flag, set by the Cancel Watcher or a `POST /stop` handler.
pub type AbortFlag = Arc<AtomicBool>;

/// One node pushed per terminal transition, consumed by a status-writer
/// task that re-snapshots the plan and forwards it to a `ProgressReporter`.
/// Dropped (all clones) once `Runner::run` returns, which closes the
/// channel and lets the consumer drain and exit.
pub type ProgressTx = mpsc::Sender<Arc<Node>>;

pub struct Runner {
    dag: Arc<Dag>,
    plan: Arc<Plan>,
    executor: Arc<dyn StepExecutor>,
    dag_run_id: String,
    dag_name: String,
    working_dir: PathBuf,
    log_dir: PathBuf,
    base_env: BTreeMap<String, String>,
    abort: AbortFlag,
    pid_registry: Arc<PidRegistry>,
    /// Set only by the DAG-level timeout path, checked by `summarize()`
    /// ahead of `abort` so a timed-out run lands on `Failed` rather than
    /// `Aborted` even though `abort` is also raised to drive the kill ladder.
    timed_out: AtomicBool,
}

/// Outcome of driving the main step graph to completion, before handler
/// steps (on_success/on_failure/on_cancel/on_exit) run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphOutcome {
    Succeeded,
    PartiallySucceeded,
    Failed,
    Aborted,
}

impl Runner {
    pub fn new(
        dag: Arc<Dag>,
        plan: Arc<Plan>,
        executor: Arc<dyn StepExecutor>,
        dag_run_id: impl Into<String>,
        dag_name: impl Into<String>,
        working_dir: PathBuf,
        log_dir: PathBuf,
        base_env: BTreeMap<String, String>,
        abort: AbortFlag,
    ) -> Self {
        Self {
            dag,
            plan,
            executor,
            dag_run_id: dag_run_id.into(),
            dag_name: dag_name.into(),
            working_dir,
            log_dir,
            base_env,
            abort,
            pid_registry: Arc::new(PidRegistry::new()),
            timed_out: AtomicBool::new(false),
        }
    }

    pub fn plan(&self) -> &Arc<Plan> {
        &self.plan
    }

    /// Shared with the Signal Controller so it can find and kill running
    /// node processes without knowing which executor started them.
    pub fn pid_registry(&self) -> Arc<PidRegistry> {
        self.pid_registry.clone()
    }

    /// Drive the main dependency graph to completion. Handler steps are
    /// not part of this; the Agent composition root runs them separately
    /// once this returns.
    ///
    /// `progress_tx` receives one `Node` per terminal transition (Skipped,
    /// Failed, Aborted, Succeeded). The caller's receiving end should be
    /// drained until closed; it closes on its own once every clone handed
    /// to a node task has dropped, which happens no later than this method
    /// returning.
    pub async fn run(&self, progress_tx: ProgressTx) -> Result<GraphOutcome> {
        self.plan.mark_started().await;

        for precondition in &self.dag.preconditions {
            match evaluate_precondition(precondition, &self.working_dir).await {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    info!(
                        dag_run_id = %self.dag_run_id,
                        condition = %precondition.condition,
                        "root precondition not satisfied, aborting run before any step starts"
                    );
                    self.plan.mark_finished().await;
                    return Ok(GraphOutcome::Aborted);
                }
            }
        }

        let max_permits = if self.dag.max_active_steps == 0 {
            Semaphore::MAX_PERMITS
        } else {
            self.dag.max_active_steps
        };
        let semaphore = Arc::new(Semaphore::new(max_permits));
        let mut join_set: JoinSet<()> = JoinSet::new();
        let mut started = std::collections::HashSet::new();

        let body = async {
            loop {
                if self.abort.load(Ordering::Relaxed) {
                    self.abort_unstarted_nodes(&started).await;
                    break;
                }

                let ready = self.ready_nodes(&started).await;
                if ready.is_empty() && join_set.is_empty() {
                    break;
                }

                for node in ready {
                    started.insert(node.step.name.clone());
                    let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
                    let node = node.clone();
                    let this_dag = self.dag.clone();
                    let executor = self.executor.clone();
                    let dag_run_id = self.dag_run_id.clone();
                    let dag_name = self.dag_name.clone();
                    let working_dir = self.working_dir.clone();
                    let log_dir = self.log_dir.clone();
                    let base_env = self.base_env.clone();
                    let pid_registry = self.pid_registry.clone();
                    let abort = self.abort.clone();
                    let progress_tx = progress_tx.clone();

                    join_set.spawn(async move {
                        let _permit = permit;
                        run_node_to_terminal(
                            &node,
                            &this_dag,
                            executor.as_ref(),
                            &dag_run_id,
                            &dag_name,
                            &working_dir,
                            &log_dir,
                            &base_env,
                            &pid_registry,
                            &abort,
                            &progress_tx,
                        )
                        .await;
                    });

                    if !self.dag.delay.is_zero() {
                        tokio::time::sleep(self.dag.delay).await;
                    }
                }

                if join_set.join_next().await.is_none() {
                    // Nothing ready and nothing running: either done or
                    // every remaining node is blocked by a predecessor that
                    // terminated in a state its ContinueOn doesn't accept.
                    break;
                }
            }
        };

        if let Some(dag_timeout) = self.dag.timeout {
            if tokio_timeout(dag_timeout, body).await.is_err() {
                warn!(dag_run_id = %self.dag_run_id, "dag-level timeout elapsed");
                self.timed_out.store(true, Ordering::Relaxed);
                self.abort.store(true, Ordering::Relaxed);
                self.abort_unstarted_nodes(&started).await;
            }
        } else {
            body.await;
        }

        self.skip_unreachable_nodes().await;
        self.plan.mark_finished().await;

        Ok(self.summarize().await)
    }

    /// Nodes ready to start: `NotStarted`, all dependencies terminal, and
    /// every dependency's outcome accepted by this node's `ContinueOn`.
    async fn ready_nodes(&self, started: &std::collections::HashSet<String>) -> Vec<Arc<Node>> {
        let mut ready = Vec::new();
        for node in self.plan.nodes() {
            if started.contains(&node.step.name) {
                continue;
            }
            if node.status().await != NodeStatus::NotStarted {
                continue;
            }

            let mut all_deps_ok = true;
            for dep_name in &node.step.depends {
                let Some(dep) = self.plan.node(dep_name) else {
                    all_deps_ok = false;
                    break;
                };
                let dep_status = dep.status().await;
                if !dep_status.is_terminal() {
                    all_deps_ok = false;
                    break;
                }
                let exit_code = dep.exit_code().await;
                if !node.step.continue_on.accepts(dep_status, exit_code) {
                    all_deps_ok = false;
                    break;
                }
            }

            if all_deps_ok {
                ready.push(node.clone());
            }
        }
        ready
    }

    async fn abort_unstarted_nodes(&self, started: &std::collections::HashSet<String>) {
        for node in self.plan.nodes() {
            if started.contains(&node.step.name) {
                continue;
            }
            if node.status().await == NodeStatus::NotStarted {
                node.mutate(|s| s.status = NodeStatus::Aborted).await;
            }
        }
    }

    /// After the loop stalls (nothing ready, nothing running), any node
    /// still `NotStarted` is unreachable because a dependency's terminal
    /// state wasn't accepted by its `ContinueOn` — mark it Skipped.
    async fn skip_unreachable_nodes(&self) {
        for node in self.plan.nodes() {
            if node.status().await == NodeStatus::NotStarted {
                node.mutate(|s| s.status = NodeStatus::Skipped).await;
            }
        }
    }

    async fn summarize(&self) -> GraphOutcome {
        if self.timed_out.load(Ordering::Relaxed) {
            return GraphOutcome::Failed;
        }
        if self.abort.load(Ordering::Relaxed) {
            return GraphOutcome::Aborted;
        }
        let mut any_failed = false;
        let mut any_non_success = false;
        for node in self.plan.nodes() {
            match node.status().await {
                NodeStatus::Failed | NodeStatus::Aborted => any_failed = true,
                NodeStatus::Succeeded => {}
                _ => any_non_success = true,
            }
        }
        if any_failed {
            GraphOutcome::Failed
        } else if any_non_success {
            GraphOutcome::PartiallySucceeded
        } else {
            GraphOutcome::Succeeded
        }
    }
}

impl From<GraphOutcome> for RunStatus {
    fn from(value: GraphOutcome) -> Self {
        match value {
            GraphOutcome::Succeeded => RunStatus::Succeeded,
            GraphOutcome::PartiallySucceeded => RunStatus::PartiallySucceeded,
            GraphOutcome::Failed => RunStatus::Failed,
            GraphOutcome::Aborted => RunStatus::Aborted,
        }
    }
}

/// Run one node through preconditions, retry, and repeat until it lands in
/// a terminal `NodeStatus`.
async fn run_node_to_terminal(
    node: &Arc<Node>,
    dag: &Dag,
    executor: &dyn StepExecutor,
    dag_run_id: &str,
    dag_name: &str,
    working_dir: &std::path::Path,
    log_dir: &std::path::Path,
    base_env: &BTreeMap<String, String>,
    pid_registry: &PidRegistry,
    abort: &AbortFlag,
    progress_tx: &ProgressTx,
) {
    node.mutate(|s| {
        s.status = NodeStatus::Running;
        s.started_at = Some(chrono::Utc::now());
    })
    .await;

    for precondition in node.step.preconditions.iter() {
        match evaluate_precondition(precondition, working_dir).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(step = %node.step.name, "precondition not met, skipping");
                node.mutate(|s| {
                    s.status = NodeStatus::Skipped;
                    s.finished_at = Some(chrono::Utc::now());
                })
                .await;
                let _ = progress_tx.send(node.clone()).await;
                return;
            }
            Err(e) => {
                warn!(step = %node.step.name, error = %e, "precondition evaluation failed");
                node.mutate(|s| {
                    s.status = NodeStatus::Failed;
                    s.finished_at = Some(chrono::Utc::now());
                    s.error = Some(e.to_string());
                })
                .await;
                let _ = progress_tx.send(node.clone()).await;
                return;
            }
        }
    }

    let stdout_path = log_dir.join(format!("{}.stdout.log", node.step.name));
    let stderr_path = log_dir.join(format!("{}.stderr.log", node.step.name));

    let mut env = base_env.clone();
    for (k, v) in &node.step.env {
        env.insert(k.clone(), v.clone());
    }
    insert_standard_env_vars(&mut env, dag, dag_name, dag_run_id, log_dir, node, &stdout_path, &stderr_path);

    let step_dir = node
        .step
        .dir
        .as_ref()
        .map(|d| working_dir.join(d))
        .unwrap_or_else(|| working_dir.to_path_buf());

    loop {
        let ctx = StepExecutionContext {
            step: &node.step,
            dag_run_id,
            dag_name,
            working_dir: &step_dir,
            env: &env,
            stdout_path: &stdout_path,
            stderr_path: &stderr_path,
            pid_registry,
        };

        let outcome = executor.execute(ctx).await;

        let outcome = match outcome {
            Ok(o) => o,
            Err(e) => StepExecutionOutcome {
                exit_code: -1,
                output_variable: None,
                sub_runs: Vec::new(),
                error: Some(e.to_string()),
            },
        };

        apply_outcome(node, &outcome, &stdout_path, &stderr_path).await;

        if outcome.exit_code != 0 {
            // A non-zero exit while the run was being preempted is a kill,
            // not a failure: land on Aborted and skip retry/repeat.
            if abort.load(Ordering::Relaxed) {
                node.mutate(|s| {
                    s.status = NodeStatus::Aborted;
                    s.finished_at = Some(chrono::Utc::now());
                })
                .await;
                let _ = progress_tx.send(node.clone()).await;
                return;
            }

            let retry_count = node.snapshot().await.retry_count;
            if let Some(retry) = &node.step.retry_policy {
                if retry_count < retry.limit {
                    let next_attempt = retry_count + 1;
                    let wait = retry.interval_for(next_attempt);
                    node.mutate(|s| {
                        s.retry_count = next_attempt;
                        s.retried_at = Some(chrono::Utc::now());
                        s.status = NodeStatus::Running;
                    })
                    .await;
                    info!(step = %node.step.name, attempt = next_attempt, "retrying step");
                    tokio::time::sleep(wait).await;
                    continue;
                }
            }
            node.mutate(|s| {
                s.status = NodeStatus::Failed;
                s.finished_at = Some(chrono::Utc::now());
            })
            .await;
            let _ = progress_tx.send(node.clone()).await;
            return;
        }

        if let Some(repeat) = &node.step.repeat_policy {
            let done_count = node.snapshot().await.done_count;
            let limit_reached = repeat.limit != 0 && done_count + 1 >= repeat.limit;
            let condition_holds = match &repeat.condition {
                None => true,
                Some(cond) => evaluate_precondition(
                    &dagu_types::Precondition {
                        condition: cond.clone(),
                        expected: String::new(),
                    },
                    working_dir,
                )
                .await
                .unwrap_or(false),
            };
            if condition_holds && !limit_reached {
                node.mutate(|s| {
                    s.done_count += 1;
                    s.repeated = true;
                    s.status = NodeStatus::Running;
                })
                .await;
                tokio::time::sleep(repeat.interval).await;
                continue;
            }
        }

        node.mutate(|s| {
            s.status = NodeStatus::Succeeded;
            s.finished_at = Some(chrono::Utc::now());
        })
        .await;
        let _ = progress_tx.send(node.clone()).await;
        return;
    }
}

/// Publish the standard `DAG_*`/`DAGU_PARAMS_JSON` variables into a step's
/// environment. Inserted last so they always win over `base_env` and the
/// step's own `Env`, matching the runtime-metadata tier of the merge order.
fn insert_standard_env_vars(
    env: &mut BTreeMap<String, String>,
    dag: &Dag,
    dag_name: &str,
    dag_run_id: &str,
    log_dir: &std::path::Path,
    node: &Node,
    stdout_path: &std::path::Path,
    stderr_path: &std::path::Path,
) {
    env.insert("DAG_NAME".to_string(), dag_name.to_string());
    env.insert("DAG_RUN_ID".to_string(), dag_run_id.to_string());
    env.insert(
        "DAG_RUN_LOG_FILE".to_string(),
        log_dir.join(format!("{dag_run_id}.log")).to_string_lossy().to_string(),
    );
    env.insert("DAG_RUN_STEP_NAME".to_string(), node.step.name.clone());
    env.insert(
        "DAG_RUN_STEP_STDOUT_FILE".to_string(),
        stdout_path.to_string_lossy().to_string(),
    );
    env.insert(
        "DAG_RUN_STEP_STDERR_FILE".to_string(),
        stderr_path.to_string_lossy().to_string(),
    );
    env.insert("DAG_RUN_STATUS".to_string(), RunStatus::Running.to_string());
    if !dag.params.is_empty() {
        if let Ok(json) = serde_json::to_string(&dag.params) {
            env.insert("DAGU_PARAMS_JSON".to_string(), json);
        }
    }
}

async fn apply_outcome(
    node: &Arc<Node>,
    outcome: &StepExecutionOutcome,
    stdout_path: &std::path::Path,
    stderr_path: &std::path::Path,
) {
    let stdout_path = stdout_path.to_string_lossy().to_string();
    let stderr_path = stderr_path.to_string_lossy().to_string();
    let exit_code = outcome.exit_code;
    let output_variable = outcome.output_variable.clone();
    let sub_runs = outcome.sub_runs.clone();
    let error = outcome.error.clone();

    node.mutate(|s| {
        s.exit_code = Some(exit_code);
        s.stdout_path = Some(stdout_path);
        s.stderr_path = Some(stderr_path);
        if let Some((name, value)) = output_variable {
            s.output_variables.insert(name, value);
        }
        if !sub_runs.is_empty() {
            s.sub_runs.extend(sub_runs);
        }
        if let Some(e) = error {
            s.error = Some(e);
        }
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// A channel with no live receiver; sends land as no-ops, which is all
    /// tests that don't assert on progress events need.
    fn discarded_progress_tx() -> ProgressTx {
        mpsc::channel(16).0
    }

    struct ScriptedExecutor {
        exit_codes: StdMutex<HashMap<String, i32>>,
    }

    #[async_trait]
    impl StepExecutor for ScriptedExecutor {
        async fn execute(&self, ctx: StepExecutionContext<'_>) -> Result<StepExecutionOutcome> {
            let code = self
                .exit_codes
                .lock()
                .unwrap()
                .get(&ctx.step.name)
                .copied()
                .unwrap_or(0);
            Ok(StepExecutionOutcome {
                exit_code: code,
                output_variable: None,
                sub_runs: Vec::new(),
                error: None,
            })
        }
    }

    fn step(name: &str, depends: &[&str]) -> Step {
        Step {
            name: name.to_string(),
            command: "true".to_string(),
            args: vec![],
            depends: depends.iter().map(|s| s.to_string()).collect(),
            output: None,
            output_key: None,
            output_omit: false,
            mail_on_error: false,
            continue_on: Default::default(),
            retry_policy: None,
            repeat_policy: None,
            preconditions: vec![],
            env: Default::default(),
            dir: None,
            signal_on_stop: None,
        }
    }

    fn dag(steps: Vec<Step>) -> Dag {
        Dag {
            name: "test".into(),
            steps,
            on_init: None,
            on_exit: None,
            on_success: None,
            on_failure: None,
            on_cancel: None,
            on_wait: None,
            secrets: vec![],
            preconditions: vec![],
            params: vec![],
            hist_retention_days: None,
            max_active_steps: 0,
            timeout: None,
            delay: Duration::ZERO,
            max_cleanup_time: Duration::from_secs(60),
            working_dir: None,
            mail_on: Default::default(),
        }
    }

    #[tokio::test]
    async fn a_chain_completes_in_dependency_order() {
        let d = Arc::new(dag(vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])]));
        let plan = Arc::new(Plan::from_dag(&d).unwrap());
        let executor: Arc<dyn StepExecutor> = Arc::new(ScriptedExecutor {
            exit_codes: StdMutex::new(HashMap::new()),
        });
        let tmp = tempfile::tempdir().unwrap();
        let runner = Runner::new(
            d,
            plan.clone(),
            executor,
            "r1",
            "test",
            tmp.path().to_path_buf(),
            tmp.path().to_path_buf(),
            BTreeMap::new(),
            Arc::new(AtomicBool::new(false)),
        );

        let outcome = runner.run(discarded_progress_tx()).await.unwrap();
        assert_eq!(outcome, GraphOutcome::Succeeded);
        for name in ["a", "b", "c"] {
            assert_eq!(plan.node(name).unwrap().status().await, NodeStatus::Succeeded);
        }
    }

    #[tokio::test]
    async fn failure_without_continue_on_skips_the_dependent() {
        let d = Arc::new(dag(vec![step("a", &[]), step("b", &["a"])]));
        let plan = Arc::new(Plan::from_dag(&d).unwrap());
        let mut codes = HashMap::new();
        codes.insert("a".to_string(), 1);
        let executor: Arc<dyn StepExecutor> = Arc::new(ScriptedExecutor {
            exit_codes: StdMutex::new(codes),
        });
        let tmp = tempfile::tempdir().unwrap();
        let runner = Runner::new(
            d,
            plan.clone(),
            executor,
            "r1",
            "test",
            tmp.path().to_path_buf(),
            tmp.path().to_path_buf(),
            BTreeMap::new(),
            Arc::new(AtomicBool::new(false)),
        );

        let outcome = runner.run(discarded_progress_tx()).await.unwrap();
        assert_eq!(outcome, GraphOutcome::Failed);
        assert_eq!(plan.node("a").unwrap().status().await, NodeStatus::Failed);
        assert_eq!(plan.node("b").unwrap().status().await, NodeStatus::Skipped);
    }

    #[tokio::test]
    async fn continue_on_failure_lets_the_dependent_run() {
        let mut b = step("b", &["a"]);
        b.continue_on.failure = true;
        let d = Arc::new(dag(vec![step("a", &[]), b]));
        let plan = Arc::new(Plan::from_dag(&d).unwrap());
        let mut codes = HashMap::new();
        codes.insert("a".to_string(), 1);
        let executor: Arc<dyn StepExecutor> = Arc::new(ScriptedExecutor {
            exit_codes: StdMutex::new(codes),
        });
        let tmp = tempfile::tempdir().unwrap();
        let runner = Runner::new(
            d,
            plan.clone(),
            executor,
            "r1",
            "test",
            tmp.path().to_path_buf(),
            tmp.path().to_path_buf(),
            BTreeMap::new(),
            Arc::new(AtomicBool::new(false)),
        );

        let outcome = runner.run(discarded_progress_tx()).await.unwrap();
        assert_eq!(outcome, GraphOutcome::PartiallySucceeded);
        assert_eq!(plan.node("a").unwrap().status().await, NodeStatus::Failed);
        assert_eq!(plan.node("b").unwrap().status().await, NodeStatus::Succeeded);
    }

    #[tokio::test]
    async fn abort_flag_stops_unstarted_nodes() {
        let d = Arc::new(dag(vec![step("a", &[]), step("b", &["a"])]));
        let plan = Arc::new(Plan::from_dag(&d).unwrap());
        let executor: Arc<dyn StepExecutor> = Arc::new(ScriptedExecutor {
            exit_codes: StdMutex::new(HashMap::new()),
        });
        let tmp = tempfile::tempdir().unwrap();
        let abort = Arc::new(AtomicBool::new(true));
        let runner = Runner::new(
            d,
            plan.clone(),
            executor,
            "r1",
            "test",
            tmp.path().to_path_buf(),
            tmp.path().to_path_buf(),
            BTreeMap::new(),
            abort,
        );

        let outcome = runner.run(discarded_progress_tx()).await.unwrap();
        assert_eq!(outcome, GraphOutcome::Aborted);
    }

    struct EnvCapturingExecutor {
        captured: StdMutex<BTreeMap<String, String>>,
    }

    #[async_trait]
    impl StepExecutor for EnvCapturingExecutor {
        async fn execute(&self, ctx: StepExecutionContext<'_>) -> Result<StepExecutionOutcome> {
            *self.captured.lock().unwrap() = ctx.env.clone();
            Ok(StepExecutionOutcome {
                exit_code: 0,
                output_variable: None,
                sub_runs: Vec::new(),
                error: None,
            })
        }
    }

    #[tokio::test]
    async fn standard_dag_env_vars_are_published_to_the_step() {
        let mut d = dag(vec![step("a", &[])]);
        d.params.push("FOO=bar".to_string());
        let d = Arc::new(d);
        let plan = Arc::new(Plan::from_dag(&d).unwrap());
        let executor = Arc::new(EnvCapturingExecutor {
            captured: StdMutex::new(BTreeMap::new()),
        });
        let tmp = tempfile::tempdir().unwrap();
        let runner = Runner::new(
            d,
            plan.clone(),
            executor.clone() as Arc<dyn StepExecutor>,
            "r1",
            "test",
            tmp.path().to_path_buf(),
            tmp.path().to_path_buf(),
            BTreeMap::new(),
            Arc::new(AtomicBool::new(false)),
        );

        runner.run(discarded_progress_tx()).await.unwrap();

        let captured = executor.captured.lock().unwrap();
        assert_eq!(captured["DAG_NAME"], "test");
        assert_eq!(captured["DAG_RUN_ID"], "r1");
        assert_eq!(captured["DAG_RUN_STEP_NAME"], "a");
        assert!(captured.contains_key("DAG_RUN_LOG_FILE"));
        assert!(captured.contains_key("DAG_RUN_STEP_STDOUT_FILE"));
        assert!(captured.contains_key("DAG_RUN_STEP_STDERR_FILE"));
        assert_eq!(captured["DAG_RUN_STATUS"], "running");
        assert_eq!(captured["DAGU_PARAMS_JSON"], "[\"FOO=bar\"]");
    }

    #[tokio::test]
    async fn root_precondition_failure_aborts_before_any_node_starts() {
        let mut d = dag(vec![step("a", &[]), step("b", &[])]);
        d.preconditions.push(dagu_types::Precondition {
            condition: "echo 1".to_string(),
            expected: "0".to_string(),
        });
        let d = Arc::new(d);
        let plan = Arc::new(Plan::from_dag(&d).unwrap());
        let executor: Arc<dyn StepExecutor> = Arc::new(ScriptedExecutor {
            exit_codes: StdMutex::new(HashMap::new()),
        });
        let tmp = tempfile::tempdir().unwrap();
        let runner = Runner::new(
            d,
            plan.clone(),
            executor,
            "r1",
            "test",
            tmp.path().to_path_buf(),
            tmp.path().to_path_buf(),
            BTreeMap::new(),
            Arc::new(AtomicBool::new(false)),
        );

        let outcome = runner.run(discarded_progress_tx()).await.unwrap();
        assert_eq!(outcome, GraphOutcome::Aborted);
        for name in ["a", "b"] {
            assert_eq!(plan.node(name).unwrap().status().await, NodeStatus::NotStarted);
        }
    }

    #[tokio::test]
    async fn progress_events_fire_for_each_terminal_node() {
        let d = Arc::new(dag(vec![step("a", &[]), step("b", &["a"])]));
        let plan = Arc::new(Plan::from_dag(&d).unwrap());
        let executor: Arc<dyn StepExecutor> = Arc::new(ScriptedExecutor {
            exit_codes: StdMutex::new(HashMap::new()),
        });
        let tmp = tempfile::tempdir().unwrap();
        let runner = Runner::new(
            d,
            plan.clone(),
            executor,
            "r1",
            "test",
            tmp.path().to_path_buf(),
            tmp.path().to_path_buf(),
            BTreeMap::new(),
            Arc::new(AtomicBool::new(false)),
        );

        let (tx, mut rx) = mpsc::channel(16);
        let outcome = runner.run(tx).await.unwrap();
        assert_eq!(outcome, GraphOutcome::Succeeded);

        let mut seen = Vec::new();
        while let Ok(node) = rx.try_recv() {
            seen.push(node.step.name.clone());
        }
        seen.sort();
        assert_eq!(seen, vec!["a".to_string(), "b".to_string()]);
    }

    struct SleepingExecutor;

    #[async_trait]
    impl StepExecutor for SleepingExecutor {
        async fn execute(&self, _ctx: StepExecutionContext<'_>) -> Result<StepExecutionOutcome> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(StepExecutionOutcome {
                exit_code: 0,
                output_variable: None,
                sub_runs: Vec::new(),
                error: None,
            })
        }
    }

    #[tokio::test]
    async fn dag_level_timeout_yields_failed_not_aborted() {
        let mut d = dag(vec![step("a", &[])]);
        d.timeout = Some(Duration::from_millis(50));
        let d = Arc::new(d);
        let plan = Arc::new(Plan::from_dag(&d).unwrap());
        let executor: Arc<dyn StepExecutor> = Arc::new(SleepingExecutor);
        let tmp = tempfile::tempdir().unwrap();
        let runner = Runner::new(
            d,
            plan.clone(),
            executor,
            "r1",
            "test",
            tmp.path().to_path_buf(),
            tmp.path().to_path_buf(),
            BTreeMap::new(),
            Arc::new(AtomicBool::new(false)),
        );

        let outcome = runner.run(discarded_progress_tx()).await.unwrap();
        assert_eq!(outcome, GraphOutcome::Failed);
    }
}

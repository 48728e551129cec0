//! Status Builder/Writer: builds a `DagRunStatus` snapshot from a `Plan`
//! and serializes writes to the attempt record. Grounded on
//! `cortex-storage::sessions::storage::SessionStorage::save_session`'s
//! write-whole-document-under-a-lock approach; the novelty here is the
//! staged write schedule (initial, delayed, per-event, final).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dagu_types::{Dag, DagRunRef, DagRunStatus, RunStatus};
use tokio::sync::Mutex;
use tracing::debug;

use crate::contracts::DagRunAttempt;
use crate::error::Result;
use crate::plan::Plan;

const DELAYED_WRITE: Duration = Duration::from_millis(100);

/// Builds and persists `DagRunStatus` snapshots for one attempt. Writes are
/// serialized behind an internal lock so the initial write, the 100ms
/// delayed write, and any per-event writes triggered by the Runner can
/// never interleave.
pub struct StatusWriter {
    attempt: Arc<dyn DagRunAttempt>,
    plan: Arc<Plan>,
    dag: Arc<Dag>,
    dag_run_id: String,
    root: DagRunRef,
    parent: DagRunRef,
    params: String,
    params_list: Vec<String>,
    write_lock: Mutex<()>,
}

impl StatusWriter {
    pub fn new(
        attempt: Arc<dyn DagRunAttempt>,
        plan: Arc<Plan>,
        dag: Arc<Dag>,
        dag_run_id: impl Into<String>,
        root: DagRunRef,
        parent: DagRunRef,
        params_list: Vec<String>,
    ) -> Self {
        let params = params_list.join(" ");
        Self {
            attempt,
            plan,
            dag,
            dag_run_id: dag_run_id.into(),
            root,
            parent,
            params,
            params_list,
            write_lock: Mutex::new(()),
        }
    }

    /// Build a fresh snapshot from the live `Plan` state. `status` is the
    /// run-level status to record; the Runner decides this (Running while
    /// in flight, a terminal `RunStatus` once `Runner::run` returns).
    pub async fn snapshot(&self, status: RunStatus, pid: Option<u32>) -> DagRunStatus {
        DagRunStatus {
            root: self.root.clone(),
            parent: self.parent.clone(),
            name: self.dag.name.clone(),
            dag_run_id: self.dag_run_id.clone(),
            attempt_id: self.attempt.id().to_string(),
            status,
            pid,
            nodes: self.plan.node_data().await,
            handler_nodes: BTreeMap::new(),
            created_at: None,
            queued_at: None,
            started_at: self.plan.start_at().await,
            finished_at: self.plan.finish_at().await,
            log: None,
            params: self.params.clone(),
            params_list: self.params_list.clone(),
            preconditions: self.dag.preconditions.clone(),
        }
    }

    async fn write(&self, status: RunStatus, pid: Option<u32>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot = self.snapshot(status, pid).await;
        self.attempt.write_status(&snapshot).await?;
        Ok(())
    }

    /// Initial write immediately after the attempt is opened.
    pub async fn write_initial(&self, pid: Option<u32>) -> Result<()> {
        debug!(dag_run_id = %self.dag_run_id, "writing initial status");
        self.write(RunStatus::Running, pid).await
    }

    /// Spawns the 100ms delayed write as a background task so the caller
    /// doesn't block the critical path waiting on it.
    pub fn spawn_delayed_write(self: &Arc<Self>, pid: Option<u32>) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(DELAYED_WRITE).await;
            if let Err(e) = this.write(RunStatus::Running, pid).await {
                tracing::warn!(error = %e, "delayed status write failed");
            }
        });
    }

    /// Per-event write, called by the Runner whenever a node changes state.
    pub async fn write_event(&self, pid: Option<u32>) -> Result<()> {
        self.write(RunStatus::Running, pid).await
    }

    /// Final write with the DAG-level terminal status, then close the
    /// attempt.
    pub async fn write_final(&self, status: RunStatus, pid: Option<u32>) -> Result<()> {
        self.write(status, pid).await?;
        self.attempt.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dagu_types::{Dag, DagRunOutputs, Step};
    use std::sync::Mutex as StdMutex;

    struct RecordingAttempt {
        id: String,
        writes: StdMutex<Vec<RunStatus>>,
        closed: StdMutex<bool>,
    }

    #[async_trait]
    impl DagRunAttempt for RecordingAttempt {
        fn id(&self) -> &str {
            &self.id
        }
        async fn open(&self) -> Result<()> {
            Ok(())
        }
        async fn write_status(&self, status: &DagRunStatus) -> Result<()> {
            self.writes.lock().unwrap().push(status.status);
            Ok(())
        }
        async fn write_outputs(&self, _outputs: &DagRunOutputs) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
        async fn request_abort(&self) -> Result<()> {
            Ok(())
        }
        async fn is_abort_requested(&self) -> Result<bool> {
            Ok(false)
        }
    }

    fn dag() -> Dag {
        Dag {
            name: "t".into(),
            steps: vec![Step {
                name: "a".into(),
                command: "true".into(),
                args: vec![],
                depends: vec![],
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
            }],
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
    async fn final_write_closes_the_attempt() {
        let d = Arc::new(dag());
        let plan = Arc::new(Plan::from_dag(&d).unwrap());
        let attempt = Arc::new(RecordingAttempt {
            id: "att1".into(),
            writes: StdMutex::new(vec![]),
            closed: StdMutex::new(false),
        });
        let writer = StatusWriter::new(
            attempt.clone(),
            plan,
            d,
            "run1",
            DagRunRef::none(),
            DagRunRef::none(),
            vec![],
        );

        writer.write_initial(Some(123)).await.unwrap();
        writer.write_final(RunStatus::Succeeded, Some(123)).await.unwrap();

        let writes = attempt.writes.lock().unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1], RunStatus::Succeeded);
        assert!(*attempt.closed.lock().unwrap());
    }
}

//! `RunStore`/`Attempt`: the concrete, file-backed shape of the
//! `DagRunStore`/`DagRunAttempt` contracts.
//!
//! `dagu-agent` defines the trait seams those contracts describe and
//! provides the `impl` bridging them to these inherent methods (so this
//! crate stays a leaf with no dependency back on `dagu-agent`, mirroring
//! how `cortex-storage` never depends on `cortex-engine`).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use dagu_types::{DagRunOutputs, DagRunStatus};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, StorageError};
use crate::paths::DaguPaths;

/// Top-level handle for attempt history across all DAG runs.
#[derive(Debug, Clone)]
pub struct RunStore {
    paths: DaguPaths,
}

impl RunStore {
    pub fn new() -> Result<Self> {
        Ok(Self { paths: DaguPaths::new()? })
    }

    pub fn with_paths(paths: DaguPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &DaguPaths {
        &self.paths
    }

    /// Create a new attempt directory for `(dag_name, dag_run_id)` and
    /// return a handle to it. Does not yet open it.
    pub async fn create_attempt(&self, dag_name: &str, dag_run_id: &str) -> Result<Attempt> {
        let run_dir = self.paths.run_dir(dag_name, dag_run_id);
        let attempt_id = Uuid::new_v4().to_string();
        let attempt_dir = run_dir.join("attempts").join(&attempt_id);
        tokio::fs::create_dir_all(&attempt_dir).await?;
        debug!(dag_name, dag_run_id, attempt_id = %attempt_id, "attempt directory created");
        Ok(Attempt::new(attempt_id, attempt_dir))
    }

    /// Load the most recent attempt's status, used as the retry target.
    /// Only considers attempts that have actually written a status.
    pub async fn latest_status(
        &self,
        dag_name: &str,
        dag_run_id: &str,
    ) -> Result<Option<DagRunStatus>> {
        let Some(dir) = self.newest_attempt_dir(dag_name, dag_run_id, true).await? else {
            return Ok(None);
        };
        let content = tokio::fs::read_to_string(dir.join("status.json")).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// A handle to the most recently created attempt directory, without
    /// creating a new one. Used to reach an already-running attempt (e.g.
    /// to request its abort) rather than start a fresh, unrelated one. Unlike
    /// `latest_status`, this considers an attempt directory even before it
    /// has written its first status.
    pub async fn latest_attempt(&self, dag_name: &str, dag_run_id: &str) -> Result<Option<Attempt>> {
        let Some(dir) = self.newest_attempt_dir(dag_name, dag_run_id, false).await? else {
            return Ok(None);
        };
        let attempt_id = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| StorageError::InvalidPath(dir.clone()))?;
        Ok(Some(Attempt::new(attempt_id, dir)))
    }

    /// The directory of the most recently created attempt for `(dag_name,
    /// dag_run_id)`, if any attempts exist. When `require_status` is set,
    /// directories without a `status.json` are skipped.
    async fn newest_attempt_dir(
        &self,
        dag_name: &str,
        dag_run_id: &str,
        require_status: bool,
    ) -> Result<Option<PathBuf>> {
        let attempts_dir = self.paths.run_dir(dag_name, dag_run_id).join("attempts");
        if !attempts_dir.exists() {
            return Ok(None);
        }

        let mut latest: Option<(std::time::SystemTime, PathBuf)> = None;
        let mut entries = tokio::fs::read_dir(&attempts_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if require_status && !path.join("status.json").exists() {
                continue;
            }
            let modified = entry.metadata().await?.modified()?;
            if latest.as_ref().is_none_or(|(t, _)| modified > *t) {
                latest = Some((modified, path));
            }
        }
        Ok(latest.map(|(_, path)| path))
    }

    /// Delete attempt directories older than `retention_days` for this DAG
    /// name. A `retention_days` of 0 disables cleanup.
    pub async fn cleanup_retention(&self, dag_name: &str, retention_days: u32) -> Result<()> {
        if retention_days == 0 {
            return Ok(());
        }
        let dag_dir = self.paths.runs_dir.join(dag_name.replace(['/', '\\'], "_"));
        if !dag_dir.exists() {
            return Ok(());
        }
        let cutoff = std::time::SystemTime::now()
            - std::time::Duration::from_secs(u64::from(retention_days) * 86_400);

        let mut run_entries = tokio::fs::read_dir(&dag_dir).await?;
        while let Some(run_entry) = run_entries.next_entry().await? {
            let run_path = run_entry.path();
            if !run_path.is_dir() {
                continue;
            }
            let modified = run_entry.metadata().await?.modified()?;
            if modified < cutoff {
                if let Err(e) = tokio::fs::remove_dir_all(&run_path).await {
                    warn!(path = %run_path.display(), error = %e, "retention cleanup failed to remove run dir");
                } else {
                    info!(path = %run_path.display(), "retention cleanup removed expired run");
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptPhase {
    Created,
    Open,
    Closed,
}

/// One recorded attempt. Enforces open-once, writes-only-while-open,
/// close-once at runtime.
#[derive(Debug)]
pub struct Attempt {
    id: String,
    dir: PathBuf,
    phase: Mutex<AttemptPhase>,
    abort_requested: AtomicBool,
}

impl Attempt {
    fn new(id: String, dir: PathBuf) -> Self {
        Self {
            id,
            dir,
            phase: Mutex::new(AttemptPhase::Created),
            abort_requested: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn status_path(&self) -> PathBuf {
        self.dir.join("status.json")
    }

    fn outputs_path(&self) -> PathBuf {
        self.dir.join("outputs.json")
    }

    fn abort_path(&self) -> PathBuf {
        self.dir.join("abort")
    }

    /// Transition `Created -> Open`. Must precede any write.
    pub async fn open(&self) -> Result<()> {
        let mut phase = self.phase.lock().await;
        *phase = AttemptPhase::Open;
        Ok(())
    }

    /// Persist a status snapshot. Last-write-wins; safe to call repeatedly
    /// while open.
    pub async fn write_status(&self, status: &DagRunStatus) -> Result<()> {
        self.require_open().await?;
        let content = serde_json::to_string_pretty(status)?;
        tokio::fs::write(self.status_path(), content).await?;
        Ok(())
    }

    /// Persist the outputs artifact. Called once, after the run settles and
    /// before the final status write.
    pub async fn write_outputs(&self, outputs: &DagRunOutputs) -> Result<()> {
        self.require_open().await?;
        let content = serde_json::to_string_pretty(outputs)?;
        tokio::fs::write(self.outputs_path(), content).await?;
        Ok(())
    }

    /// Transition `Open -> Closed`. No writes are accepted afterward.
    pub async fn close(&self) -> Result<()> {
        let mut phase = self.phase.lock().await;
        *phase = AttemptPhase::Closed;
        Ok(())
    }

    async fn require_open(&self) -> Result<()> {
        match *self.phase.lock().await {
            AttemptPhase::Open => Ok(()),
            AttemptPhase::Created => Err(StorageError::NotOpen(self.id.clone())),
            AttemptPhase::Closed => Err(StorageError::AlreadyClosed(self.id.clone())),
        }
    }

    /// Mark this attempt as having received an out-of-band abort request
    /// (the cancel watcher polls this).
    pub async fn request_abort(&self) -> Result<()> {
        tokio::fs::write(self.abort_path(), Utc::now().to_rfc3339()).await?;
        self.abort_requested.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Whether `request_abort` has been called (or the marker file exists,
    /// e.g. set by a sibling process).
    pub async fn is_abort_requested(&self) -> Result<bool> {
        if self.abort_requested.load(Ordering::SeqCst) {
            return Ok(true);
        }
        Ok(tokio::fs::try_exists(self.abort_path()).await?)
    }
}

//! OS-aware path detection, grounded on `cortex-storage::paths`.

use std::path::PathBuf;

use crate::error::{Result, StorageError};

pub const APP_NAME: &str = "Dagu";
pub const RUNS_DIR: &str = "dag-runs";

/// Root locations for agent-owned persisted state.
#[derive(Debug, Clone)]
pub struct DaguPaths {
    /// Root data directory (platform-specific, `dirs::data_dir()/Dagu`).
    pub data_dir: PathBuf,
    /// Where per-`(dag, dagRunID)` attempt histories live.
    pub runs_dir: PathBuf,
}

impl DaguPaths {
    /// Detect the OS-appropriate data directory.
    pub fn new() -> Result<Self> {
        let data_dir = dirs::data_dir()
            .ok_or(StorageError::HomeDirNotFound)?
            .join(APP_NAME);
        Ok(Self::from_root(data_dir))
    }

    /// Build paths rooted at an explicit directory (tests, `--data-dir`).
    pub fn from_root(data_dir: PathBuf) -> Self {
        let runs_dir = data_dir.join(RUNS_DIR);
        Self { data_dir, runs_dir }
    }

    /// Directory holding all attempts for one `(dag name, dag run id)`.
    pub fn run_dir(&self, dag_name: &str, dag_run_id: &str) -> PathBuf {
        self.runs_dir.join(sanitize(dag_name)).join(sanitize(dag_run_id))
    }

    pub async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.runs_dir).await?;
        Ok(())
    }
}

/// Replace path separators so a DAG/run-id can't escape `runs_dir`.
fn sanitize(component: &str) -> String {
    component.replace(['/', '\\'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_dir_nests_by_name_then_id() {
        let paths = DaguPaths::from_root(PathBuf::from("/tmp/dagu-test"));
        let dir = paths.run_dir("etl", "abc123");
        assert_eq!(dir, PathBuf::from("/tmp/dagu-test/dag-runs/etl/abc123"));
    }

    #[test]
    fn sanitizes_path_traversal_in_components() {
        let paths = DaguPaths::from_root(PathBuf::from("/tmp/dagu-test"));
        let dir = paths.run_dir("../etc", "../../passwd");
        // No raw separator survives inside a single sanitized component, so
        // the result stays nested under runs_dir instead of escaping it.
        assert_eq!(dir, PathBuf::from("/tmp/dagu-test/dag-runs/.._etc/.._.._passwd"));
        assert!(dir.starts_with(&paths.runs_dir));
    }
}

//! At-most-one enforcement: a control-socket address derived from
//! `(Dag.name, dagRunID)` already gives us a unique rendezvous point, but
//! binding that socket happens later in the Agent lifecycle. A lock file
//! gives us the cheaper, earlier check, before an attempt is even created.

use std::path::{Path, PathBuf};

use crate::error::{Result, StorageError};

/// Held for the lifetime of one live Agent for a given `(name, dagRunID)`.
/// Dropping it removes the lock file, so an abrupt process exit still frees
/// the slot for the next run.
#[derive(Debug)]
pub struct RunLockGuard {
    path: PathBuf,
}

impl RunLockGuard {
    /// Attempt to acquire the lock for `run_dir`. Fails with
    /// `AlreadyRunning` if another live Agent holds it.
    pub async fn acquire(run_dir: &Path, run_label: &str) -> Result<Self> {
        tokio::fs::create_dir_all(run_dir).await?;
        let path = run_dir.join(".lock");

        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StorageError::AlreadyRunning(run_label.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

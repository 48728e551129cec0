//! Bridges `dagu_storage::RunStore`/`Attempt` to the `DagRunStore`/
//! `DagRunAttempt` trait seams defined in `contracts.rs`. `dagu-storage`
//! stays a leaf crate with no dependency on `dagu-agent` (mirroring
//! `cortex-storage` never depending on `cortex-engine`); this module is
//! the one place that knows both sides.

use std::sync::Arc;

use async_trait::async_trait;
use dagu_types::{DagRunOutputs, DagRunStatus};

use crate::contracts::{DagRunAttempt, DagRunStore};
use crate::error::Result;

pub struct StorageBackedRunStore {
    inner: dagu_storage::RunStore,
}

impl StorageBackedRunStore {
    pub fn new(inner: dagu_storage::RunStore) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl DagRunStore for StorageBackedRunStore {
    async fn create_attempt(&self, dag_name: &str, dag_run_id: &str) -> Result<Arc<dyn DagRunAttempt>> {
        let attempt = self.inner.create_attempt(dag_name, dag_run_id).await?;
        Ok(Arc::new(StorageBackedAttempt { inner: attempt }))
    }

    async fn latest_status(&self, dag_name: &str, dag_run_id: &str) -> Result<Option<DagRunStatus>> {
        Ok(self.inner.latest_status(dag_name, dag_run_id).await?)
    }

    async fn latest_attempt(
        &self,
        dag_name: &str,
        dag_run_id: &str,
    ) -> Result<Option<Arc<dyn DagRunAttempt>>> {
        let found = self.inner.latest_attempt(dag_name, dag_run_id).await?;
        Ok(found.map(|a| Arc::new(StorageBackedAttempt { inner: a }) as Arc<dyn DagRunAttempt>))
    }

    async fn cleanup_retention(&self, dag_name: &str, retention_days: u32) -> Result<()> {
        Ok(self.inner.cleanup_retention(dag_name, retention_days).await?)
    }
}

pub struct StorageBackedAttempt {
    inner: dagu_storage::Attempt,
}

#[async_trait]
impl DagRunAttempt for StorageBackedAttempt {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn open(&self) -> Result<()> {
        Ok(self.inner.open().await?)
    }

    async fn write_status(&self, status: &DagRunStatus) -> Result<()> {
        Ok(self.inner.write_status(status).await?)
    }

    async fn write_outputs(&self, outputs: &DagRunOutputs) -> Result<()> {
        Ok(self.inner.write_outputs(outputs).await?)
    }

    async fn close(&self) -> Result<()> {
        Ok(self.inner.close().await?)
    }

    async fn request_abort(&self) -> Result<()> {
        Ok(self.inner.request_abort().await?)
    }

    async fn is_abort_requested(&self) -> Result<bool> {
        Ok(self.inner.is_abort_requested().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagu_storage::{DaguPaths, RunStore};

    #[tokio::test]
    async fn adapter_round_trips_open_write_close() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::with_paths(DaguPaths::from_root(dir.path().to_path_buf()));
        let adapter = StorageBackedRunStore::new(store);

        let attempt = adapter.create_attempt("etl", "r1").await.unwrap();
        attempt.open().await.unwrap();

        let status = DagRunStatus {
            root: dagu_types::DagRunRef::none(),
            parent: dagu_types::DagRunRef::none(),
            name: "etl".into(),
            dag_run_id: "r1".into(),
            attempt_id: attempt.id().to_string(),
            status: dagu_types::RunStatus::Succeeded,
            pid: None,
            nodes: vec![],
            handler_nodes: Default::default(),
            created_at: None,
            queued_at: None,
            started_at: None,
            finished_at: None,
            log: None,
            params: String::new(),
            params_list: vec![],
            preconditions: vec![],
        };
        attempt.write_status(&status).await.unwrap();
        attempt.close().await.unwrap();

        let loaded = adapter.latest_status("etl", "r1").await.unwrap().unwrap();
        assert_eq!(loaded.dag_run_id, "r1");
    }
}

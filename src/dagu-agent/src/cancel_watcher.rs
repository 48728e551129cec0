//! Cancel Watcher : polls the attempt's abort marker every 5s
//! and raises the shared abort flag when a parent (or operator) has
//! requested cancellation out-of-band. Grounded on `mdns/browser.rs` and
//! `integrations/ratelimit_integration.rs`'s polling-loop shape: a plain
//! `tokio::time::interval` tick rather than a notification channel, since
//! the thing being observed (a file on disk) has no push mechanism.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::contracts::DagRunAttempt;
use crate::runner::AbortFlag;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct CancelWatcher {
    attempt: Arc<dyn DagRunAttempt>,
    abort: AbortFlag,
}

impl CancelWatcher {
    pub fn new(attempt: Arc<dyn DagRunAttempt>, abort: AbortFlag) -> Self {
        Self { attempt, abort }
    }

    /// Runs until `stop` resolves or an abort request is observed, in which
    /// case it raises `abort` and returns.
    pub async fn run(&self, stop: impl std::future::Future<Output = ()>) {
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        tokio::pin!(stop);
        loop {
            tokio::select! {
                _ = &mut stop => return,
                _ = interval.tick() => {
                    match self.attempt.is_abort_requested().await {
                        Ok(true) => {
                            info!("abort request observed on attempt, raising abort flag");
                            crate::signal::request_abort(&self.abort);
                            return;
                        }
                        Ok(false) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to poll abort marker");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dagu_types::{DagRunOutputs, DagRunStatus};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeAttempt {
        abort_requested: AtomicBool,
    }

    #[async_trait]
    impl DagRunAttempt for FakeAttempt {
        fn id(&self) -> &str {
            "a1"
        }
        async fn open(&self) -> crate::error::Result<()> {
            Ok(())
        }
        async fn write_status(&self, _status: &DagRunStatus) -> crate::error::Result<()> {
            Ok(())
        }
        async fn write_outputs(&self, _outputs: &DagRunOutputs) -> crate::error::Result<()> {
            Ok(())
        }
        async fn close(&self) -> crate::error::Result<()> {
            Ok(())
        }
        async fn request_abort(&self) -> crate::error::Result<()> {
            self.abort_requested.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn is_abort_requested(&self) -> crate::error::Result<bool> {
            Ok(self.abort_requested.load(Ordering::SeqCst))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn observed_abort_raises_the_shared_flag() {
        let attempt = Arc::new(FakeAttempt {
            abort_requested: AtomicBool::new(true),
        });
        let abort = Arc::new(AtomicBool::new(false));
        let watcher = CancelWatcher::new(attempt, abort.clone());

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let run = watcher.run(async {
            let _ = rx.await;
        });
        tokio::select! {
            _ = run => {}
            _ = tokio::time::sleep(Duration::from_secs(6)) => {}
        }
        let _ = tx.send(());

        assert!(abort.load(Ordering::SeqCst));
    }
}

//! File-backed reference implementation of the attempt/run-store contracts
//! that `dagu-agent` consumes only through traits.
//!
//! Mirrors `cortex-storage`'s OS-aware data dir + JSON-per-record layout,
//! scaled down from session metadata + message history to DAG run attempts:
//! one directory per `(dag name, dag run id)`, one subdirectory per attempt,
//! holding `status.json`, an optional `outputs.json`, and an `abort` marker
//! file used by the cancel watcher.

pub mod error;
pub mod lock;
pub mod paths;
pub mod store;

pub use error::{Result, StorageError};
pub use lock::RunLockGuard;
pub use paths::DaguPaths;
pub use store::{Attempt, RunStore};

//! The runtime `Node`: an immutable `Step` plus its mutable `NodeState`,
//! grounded on `cortex-app-server::state::AppState`'s `Arc<RwLock<...>>`
//! shared-state convention — many tasks (the step's own executor, the
//! status writer, the outputs collector, the control socket) read or
//! mutate a Node concurrently during one `Runner::run` call.

use std::sync::Arc;

use dagu_types::{NodeState, NodeStatus, Step};
use tokio::sync::RwLock;

/// One step's runtime state within a Plan.
#[derive(Debug)]
pub struct Node {
    pub step: Step,
    state: RwLock<NodeState>,
}

impl Node {
    /// A fresh node for `step`, state `NotStarted`.
    pub fn fresh(step: Step) -> Arc<Self> {
        let state = NodeState::fresh(step.name.clone());
        Arc::new(Self {
            step,
            state: RwLock::new(state),
        })
    }

    /// Rebuild a node from a saved `NodeState` (retry plan keeping
    /// non-reset nodes verbatim).
    pub fn from_saved(step: Step, state: NodeState) -> Arc<Self> {
        Arc::new(Self {
            step,
            state: RwLock::new(state),
        })
    }

    pub async fn status(&self) -> NodeStatus {
        self.state.read().await.status
    }

    pub async fn snapshot(&self) -> NodeState {
        self.state.read().await.clone()
    }

    pub async fn mutate<R>(&self, f: impl FnOnce(&mut NodeState) -> R) -> R {
        let mut guard = self.state.write().await;
        f(&mut guard)
    }

    /// Reset this node's state back to `NotStarted`, used when this node
    /// falls in the retry set.
    pub async fn reset_for_retry(&self) {
        self.mutate(|s| s.reset_for_retry()).await;
    }

    pub async fn exit_code(&self) -> Option<i32> {
        self.state.read().await.exit_code
    }
}

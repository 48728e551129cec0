//! Per-node runtime status as persisted in a `DagRunStatus` snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::run_ref::DagRunRef;

/// Terminal/non-terminal status of one node (Step instance) in a Plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Aborted,
    PartiallySucceeded,
}

impl NodeStatus {
    /// Terminal states are everything except `NotStarted`/`Running`.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::NotStarted | Self::Running)
    }

    /// Whether a dependent may in principle proceed once a predecessor
    /// lands in this state (the ContinueOn check happens separately).
    pub fn is_blocking_without_continue_on(self) -> bool {
        matches!(self, Self::Failed | Self::Skipped | Self::Aborted)
    }
}

/// The serializable, persisted state of one node. The live runtime wrapper
/// (`dagu_agent::node::Node`) holds this behind a lock plus the immutable
/// `Step` it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeState {
    pub step_name: String,
    pub status: NodeStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retried_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub done_count: u32,
    #[serde(default)]
    pub repeated: bool,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub stdout_path: Option<String>,
    #[serde(default)]
    pub stderr_path: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// `KEY=value` strings, keyed by the declaring step's `Output` name.
    #[serde(default)]
    pub output_variables: BTreeMap<String, String>,
    #[serde(default)]
    pub sub_runs: Vec<DagRunRef>,
    #[serde(default)]
    pub sub_runs_repeated: bool,
}

impl NodeState {
    /// A fresh, NotStarted state for `step_name`.
    pub fn fresh(step_name: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            status: NodeStatus::NotStarted,
            started_at: None,
            finished_at: None,
            retried_at: None,
            retry_count: 0,
            done_count: 0,
            repeated: false,
            exit_code: None,
            stdout_path: None,
            stderr_path: None,
            error: None,
            output_variables: BTreeMap::new(),
            sub_runs: Vec::new(),
            sub_runs_repeated: false,
        }
    }

    /// Reset this state back to NotStarted, clearing timings and history.
    /// Used by the retry-plan rebuild.
    pub fn reset_for_retry(&mut self) {
        self.status = NodeStatus::NotStarted;
        self.started_at = None;
        self.finished_at = None;
        self.retried_at = None;
        self.retry_count = 0;
        self.done_count = 0;
        self.repeated = false;
        self.exit_code = None;
        self.stdout_path = None;
        self.stderr_path = None;
        self.error = None;
        self.output_variables.clear();
        self.sub_runs.clear();
        self.sub_runs_repeated = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        assert!(!NodeStatus::NotStarted.is_terminal());
        assert!(!NodeStatus::Running.is_terminal());
        assert!(NodeStatus::Succeeded.is_terminal());
        assert!(NodeStatus::Failed.is_terminal());
        assert!(NodeStatus::Aborted.is_terminal());
    }

    #[test]
    fn reset_for_retry_clears_history() {
        let mut s = NodeState::fresh("build");
        s.status = NodeStatus::Failed;
        s.retry_count = 2;
        s.output_variables.insert("X".into(), "X=1".into());
        s.reset_for_retry();
        assert_eq!(s.status, NodeStatus::NotStarted);
        assert_eq!(s.retry_count, 0);
        assert!(s.output_variables.is_empty());
    }
}

//! `DagRunStatus`: the externally observable snapshot of a run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::Precondition;
use crate::node::NodeState;
use crate::run_ref::DagRunRef;
use crate::time;

/// Run-level status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotStarted,
    Queued,
    Running,
    Succeeded,
    PartiallySucceeded,
    Failed,
    Aborted,
    Waiting,
}

impl RunStatus {
    /// Not one of the active states, i.e. done for sub-run polling purposes.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Running | Self::Queued | Self::NotStarted | Self::Waiting
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::PartiallySucceeded => "partially_succeeded",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
            Self::Waiting => "waiting",
        };
        f.write_str(s)
    }
}

/// The externally observable snapshot of one DAG run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DagRunStatus {
    pub root: DagRunRef,
    pub parent: DagRunRef,
    pub name: String,
    pub dag_run_id: String,
    pub attempt_id: String,
    pub status: RunStatus,
    pub pid: Option<u32>,
    pub nodes: Vec<NodeState>,
    /// Handler nodes, keyed by handler kind (`init`, `exit`, `success`,
    /// `failure`, `cancel`, `wait`).
    pub handler_nodes: BTreeMap<String, NodeState>,
    pub created_at: Option<DateTime<Utc>>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub log: Option<String>,
    pub params: String,
    pub params_list: Vec<String>,
    pub preconditions: Vec<Precondition>,
}

impl DagRunStatus {
    /// Serialize timestamps the way the persisted status document does:
    /// RFC3339 or empty string, never a bare `None`.
    pub fn created_at_rfc3339(&self) -> String {
        time::to_rfc3339(self.created_at)
    }

    pub fn started_at_rfc3339(&self) -> String {
        time::to_rfc3339(self.started_at)
    }

    pub fn finished_at_rfc3339(&self) -> String {
        time::to_rfc3339(self.finished_at)
    }
}

/// Reduced sub-run view returned to a parent's step executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubRunStatus {
    pub name: String,
    pub dag_run_id: String,
    pub params: String,
    /// Flattened `key -> value` outputs from the sub-run's nodes.
    pub outputs: BTreeMap<String, String>,
    pub status: RunStatus,
}

//! Data model for the Dagu agent workspace.
//!
//! This crate has no I/O: it is the shared vocabulary (`DAG`, `Step`,
//! `DAGRunRef`, `NodeState`, `DAGRunStatus`, `DAGRunOutputs`, `RunStatus`)
//! that `dagu-agent` operates on and `dagu-storage` persists.

pub mod dag;
pub mod node;
pub mod outputs;
pub mod run_ref;
pub mod status;
pub mod time;

pub use dag::{
    ContinueOn, Dag, MailOn, Precondition, RepeatPolicy, RetryPolicy, SecretRef, Step,
};
pub use node::{NodeState, NodeStatus};
pub use outputs::{DagRunOutputs, OutputsMetadata};
pub use run_ref::DagRunRef;
pub use status::{DagRunStatus, RunStatus, SubRunStatus};

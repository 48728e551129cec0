//! Per-run DAG supervisor (-§9): turns a parsed `Dag` into an
//! execution `Plan`, drives it with a `Runner`, persists an immutable
//! attempt history, and services a local control-plane socket. Parsing,
//! persistent storage backends, secret providers beyond `env`/`file`, mail
//! transport, the remote coordinator, container/ssh step executors,
//! telemetry export, and any TUI are all out of scope here and are
//! consumed only through the trait seams in `contracts`.

pub mod agent;
pub mod cancel_watcher;
pub mod contracts;
pub mod control_socket;
pub mod db_client;
pub mod error;
pub mod executors;
pub mod node;
pub mod outputs_collector;
pub mod plan;
pub mod runner;
pub mod secrets;
pub mod signal;
pub mod status_writer;
pub mod storage_adapter;

pub use agent::{Agent, AgentConfig};
pub use error::{AgentError, Result};
pub use node::Node;
pub use plan::Plan;
pub use runner::{GraphOutcome, Runner};

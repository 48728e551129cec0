//! Error types for the Agent, grounded on `cortex-engine::error::CortexError`:
//! one flat `thiserror` enum, `#[from]` for the I/O/JSON boundary errors,
//! a crate-local `Result<T>` alias.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("plan error: {0}")]
    Plan(String),

    #[error("unknown step dependency: {step} depends on unknown step {dependency}")]
    UnknownDependency { step: String, dependency: String },

    #[error("dependency cycle detected involving step: {0}")]
    Cycle(String),

    #[error("unknown step for retry: {0}")]
    UnknownRetryStep(String),

    #[error("secret resolution failed for {name}: {message}")]
    SecretResolution { name: String, message: String },

    #[error("unknown secret provider: {0}")]
    UnknownSecretProvider(String),

    #[error("secret provider is required")]
    SecretProviderRequired,

    #[error("invalid secret reference {name}: {message}")]
    InvalidSecretRef { name: String, message: String },

    #[error("sub-run not found: {0}")]
    SubRunNotFound(String),

    #[error("a run is already in progress for {0}")]
    AlreadyRunning(String),

    #[error("sub-run requires a non-zero parent reference")]
    MissingParentRef,

    #[error("control socket bind failed: {0}")]
    SocketBind(String),

    #[error("step executor error: {step}: {message}")]
    StepExecution { step: String, message: String },

    #[error("storage error: {0}")]
    Storage(#[from] dagu_storage::StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed")]
    ChannelClosed,

    #[error("internal error: {0}")]
    Internal(String),
}

impl AgentError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

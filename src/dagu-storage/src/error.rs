//! Error types for cortex-storage's sibling in this workspace.

use std::path::PathBuf;

use thiserror::Error;

/// Storage error types.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("dag run not found: {0}")]
    RunNotFound(String),

    #[error("attempt not found: {0}")]
    AttemptNotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(PathBuf),

    #[error("could not determine home/data directory")]
    HomeDirNotFound,

    #[error("a run is already in progress for {0}")]
    AlreadyRunning(String),

    #[error("write attempted on an attempt that is not open: {0}")]
    NotOpen(String),

    #[error("write attempted on a closed attempt: {0}")]
    AlreadyClosed(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

//! Runtime error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for runtime operations.
pub type RunResult<T> = Result<T, RunError>;

/// Errors that can occur while building or running workflows.
#[derive(Debug, Error)]
pub enum RunError {
    /// Caller misuse: an operation was applied to a workflow or manager in
    /// a state that cannot support it. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The declared behavior of an external tool or store could not be
    /// determined or is ambiguous. Catchable; carries enough context for
    /// the caller to decide whether to retry or surface.
    #[error("detection error in {store}: {message}")]
    Detection {
        /// Location of the store that was inspected.
        store: PathBuf,
        /// What was ambiguous or missing.
        message: String,
    },

    /// A spawned process could not be created or monitored.
    #[error("process error: {0}")]
    Process(String),

    /// Core data-model error.
    #[error(transparent)]
    Core(#[from] simflow_core::CoreError),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem operation failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violated.
    #[error("internal error: {0}")]
    Internal(String),
}

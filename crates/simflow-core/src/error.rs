//! Core data-model error types.

use thiserror::Error;

/// Result type for core data-model operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the core data model.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A named parameter was looked up but does not exist.
    #[error("parameter not found: {0}")]
    ParamNotFound(String),

    /// A file was looked up by key but does not exist in the registry.
    #[error("file not found for key: {0}")]
    FileNotFound(String),

    /// A tool was looked up by name but does not exist in the registry.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem operation failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

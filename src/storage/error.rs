//! Error types for storage operations

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while persisting state
#[derive(Debug, Error)]
pub enum StorageError {
    /// Destination path cannot hold a file
    #[error("invalid storage path {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    /// State could not be encoded
    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (file access, rename, etc.)
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backend refused the write
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

//! Error types for the durable event queue

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for queue operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while persisting or replaying queued events
#[derive(Debug, Error)]
pub enum StorageError {
    /// File or directory access failed
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The queue directory already holds the configured number of records
    #[error("queue over quota ({slots} slots)")]
    QuotaExceeded { slots: usize },

    /// A record could not be decoded
    #[error("unknown data format: {0}")]
    Format(String),

    /// A record was written by an incompatible format version
    #[error("incompatible data format version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },

    /// The event snapshot could not be (de)serialized
    #[error("event serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

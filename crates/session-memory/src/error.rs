//! Error types for the memory store, retrieval engine and text-transform collaborator

use std::time::Duration;

/// Failures at the persistence boundary.
///
/// An absent entry or session is never an error; lookups return `Option`.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("storage fault: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("failed to get connection from pool: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("database still locked after {attempts} attempts")]
    Busy { attempts: u32 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid stored record {id}: {reason}")]
    InvalidRecord { id: String, reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemoryError {
    /// True when the underlying SQLite error is lock contention that may clear on retry.
    pub fn is_contention(&self) -> bool {
        match self {
            MemoryError::Storage(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Result type for memory operations.
pub type MemoryResult<T> = std::result::Result<T, MemoryError>;

/// Why the text-transform tier was skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("text transform unavailable: {0}")]
    Unavailable(String),

    #[error("text transform timed out after {0:?}")]
    TimedOut(Duration),

    #[error("text transform returned malformed output: {0}")]
    Malformed(String),
}

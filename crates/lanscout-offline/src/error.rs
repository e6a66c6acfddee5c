//! Error types for the offline queue

use lanscout_core::StoreError;
use thiserror::Error;

/// Result type alias for offline queue operations
pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The persistent store rejected a read or write
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// The queue could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The persisted queue could not be decoded
    #[error("Persisted queue is corrupt: {0}")]
    Corrupt(String),

    /// Replaying an action failed
    #[error("Action {id} failed: {reason}")]
    Execution { id: String, reason: String },

    /// The backend has no resolved endpoint
    #[error("No backend endpoint available")]
    NoEndpoint,
}

impl QueueError {
    pub fn execution(id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Execution {
            id: id.into(),
            reason: reason.to_string(),
        }
    }
}

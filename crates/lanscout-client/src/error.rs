//! Error types for the client crate

use thiserror::Error;

/// Result type alias for channel operations
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Errors raised by the update channel and its transports.
///
/// Transport errors stay inside the channel; they drive the reconnect state
/// machine and are never returned from the channel's public methods.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// A subscription filter is malformed
    #[error("Invalid filter field '{field}': {reason}")]
    InvalidFilter { field: String, reason: String },

    /// The backend has no resolved endpoint yet
    #[error("No endpoint available for the update channel")]
    NoEndpoint,

    /// The transport failed to reach the backend
    #[error("Transport error: {0}")]
    Transport(String),

    /// The backend answered with something unusable
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ChannelError {
    pub fn invalid_filter(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFilter {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn transport(error: impl std::fmt::Display) -> Self {
        Self::Transport(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChannelError::invalid_filter("", "field name cannot be empty");
        assert_eq!(err.to_string(), "Invalid filter field '': field name cannot be empty");

        let err = ChannelError::transport("connection refused");
        assert_eq!(err.to_string(), "Transport error: connection refused");
    }
}

//! Error types for the discovery crate

use lanscout_core::StoreError;
use thiserror::Error;

/// Result type alias for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Errors that can occur while setting up discovery.
///
/// A failed or exhausted scan is not an error; it is reported as
/// [`DiscoveryOutcome::NotFound`](crate::DiscoveryOutcome::NotFound).
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Invalid discovery configuration
    #[error("Invalid discovery configuration: {0}")]
    InvalidConfig(String),

    /// The HTTP client used for probing could not be built
    #[error("Failed to build probe client: {0}")]
    ProbeClient(String),

    /// The persistent result cache failed
    #[error("Result cache error: {0}")]
    Cache(#[from] StoreError),
}

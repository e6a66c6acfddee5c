//! Error types shared across the lanscout crates.
//!
//! Reachability failures are not errors in this system: probes, discovery and
//! reconnection report them as typed results. The errors here cover
//! misconfiguration and persistence failures only.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using LanscoutError as the error type.
pub type Result<T> = std::result::Result<T, LanscoutError>;

/// Top-level error type for lanscout operations.
#[derive(Debug, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum LanscoutError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Persistent store errors
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Internal errors that shouldn't normally occur
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors related to configuration.
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {reason}")]
    InvalidFormat { reason: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by a persistent key-value store.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum StoreError {
    /// Reading or writing the backing medium failed
    #[error("I/O failure on key '{key}': {reason}")]
    Io { key: String, reason: String },

    /// Stored bytes could not be encoded or decoded
    #[error("Serialization failure on key '{key}': {reason}")]
    Serialization { key: String, reason: String },

    /// Key contains characters the backend cannot store
    #[error("Invalid key '{key}'")]
    InvalidKey { key: String },
}

impl StoreError {
    pub fn io(key: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Io {
            key: key.into(),
            reason: err.to_string(),
        }
    }

    pub fn serialization(key: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Serialization {
            key: key.into(),
            reason: err.to_string(),
        }
    }
}

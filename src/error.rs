//! Errors raised while assembling the application.

use lanscout_client::ChannelError;
use lanscout_core::{LanscoutError, StoreError};
use lanscout_discovery::DiscoveryError;
use lanscout_offline::QueueError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LanscoutError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Building the app requires a running tokio runtime
    #[error("No tokio runtime available: {0}")]
    Runtime(String),
}

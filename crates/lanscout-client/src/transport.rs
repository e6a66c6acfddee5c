//! Transports the update channel talks to the backend through.

use crate::error::{ChannelError, Result};
use crate::queue::QueuedUpdate;
use async_trait::async_trait;
use lanscout_core::config::ChannelConfig;
use lanscout_core::types::{EndpointSource, ServiceKind};
use std::sync::Arc;
use tracing::{debug, trace};

/// Connection to the backend's update feed.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Establishes (or verifies) the connection.
    async fn connect(&self) -> Result<()>;

    /// Liveness check while connected.
    async fn heartbeat(&self) -> Result<()>;

    /// Fetches updates that arrived since the last poll.
    async fn poll_updates(&self) -> Result<Vec<QueuedUpdate>> {
        Ok(Vec::new())
    }

    /// Releases transport resources.
    async fn disconnect(&self) {}
}

/// HTTP transport against the backend service.
///
/// The base URL is looked up on every call, so it follows the endpoint
/// registry without reconstruction.
pub struct HttpChannelTransport {
    client: reqwest::Client,
    endpoints: Arc<dyn EndpointSource>,
    service: ServiceKind,
    health_path: String,
    updates_path: String,
}

impl HttpChannelTransport {
    pub fn new(config: &ChannelConfig, endpoints: Arc<dyn EndpointSource>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("lanscout/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ChannelError::transport)?;

        Ok(Self {
            client,
            endpoints,
            service: ServiceKind::Backend,
            health_path: config.health_path.clone(),
            updates_path: config.updates_path.clone(),
        })
    }

    fn url(&self, path: &str) -> Result<String> {
        let base = self.endpoints.endpoint(self.service).ok_or(ChannelError::NoEndpoint)?;
        Ok(format!("{}{}", base.trim_end_matches('/'), path))
    }

    async fn check_health(&self) -> Result<()> {
        let url = self.url(&self.health_path)?;
        let response = self.client.get(&url).send().await.map_err(ChannelError::transport)?;

        if !response.status().is_success() {
            return Err(ChannelError::Transport(format!("{} returned {}", url, response.status())));
        }
        trace!(url, "Health check passed");
        Ok(())
    }
}

#[async_trait]
impl ChannelTransport for HttpChannelTransport {
    async fn connect(&self) -> Result<()> {
        self.check_health().await
    }

    async fn heartbeat(&self) -> Result<()> {
        self.check_health().await
    }

    async fn poll_updates(&self) -> Result<Vec<QueuedUpdate>> {
        let url = self.url(&self.updates_path)?;
        let response = self.client.get(&url).send().await.map_err(ChannelError::transport)?;

        match response.status() {
            reqwest::StatusCode::NO_CONTENT | reqwest::StatusCode::NOT_FOUND => return Ok(Vec::new()),
            status if !status.is_success() => {
                return Err(ChannelError::Transport(format!("{} returned {}", url, status)));
            }
            _ => {}
        }

        let updates: Vec<QueuedUpdate> = response
            .json()
            .await
            .map_err(|e| ChannelError::InvalidResponse(e.to_string()))?;
        debug!(count = updates.len(), "Polled updates");
        Ok(updates)
    }
}

//! Replays queued actions against the backend.

use crate::error::{QueueError, Result};
use crate::queue::OfflineAction;
use async_trait::async_trait;
use lanscout_core::config::OfflineConfig;
use lanscout_core::types::{EndpointSource, ServiceKind};
use std::sync::Arc;
use tracing::debug;

/// Performs one queued action.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &OfflineAction) -> Result<()>;
}

/// Posts each action as JSON to the backend's action path.
pub struct HttpActionExecutor {
    client: reqwest::Client,
    endpoints: Arc<dyn EndpointSource>,
    action_path: String,
}

impl HttpActionExecutor {
    pub fn new(config: &OfflineConfig, endpoints: Arc<dyn EndpointSource>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("lanscout/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| QueueError::execution("client", e))?;

        Ok(Self {
            client,
            endpoints,
            action_path: config.action_path.clone(),
        })
    }
}

#[async_trait]
impl ActionExecutor for HttpActionExecutor {
    async fn execute(&self, action: &OfflineAction) -> Result<()> {
        let base = self
            .endpoints
            .endpoint(ServiceKind::Backend)
            .ok_or(QueueError::NoEndpoint)?;
        let url = format!("{}{}", base.trim_end_matches('/'), self.action_path);

        let response = self
            .client
            .post(&url)
            .json(action)
            .send()
            .await
            .map_err(|e| QueueError::execution(&action.id, e))?;

        if !response.status().is_success() {
            return Err(QueueError::execution(
                &action.id,
                format!("{} returned {}", url, response.status()),
            ));
        }

        debug!(action = %action.id, action_type = %action.action_type, "Action replayed");
        Ok(())
    }
}

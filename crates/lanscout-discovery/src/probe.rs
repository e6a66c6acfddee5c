//! Bounded-time reachability probes.
//!
//! A probe never fails: any network error, timeout or non-2xx answer simply
//! yields `reachable = false`. Dropping a probe future cancels the request.

use crate::error::{DiscoveryError, Result};
use async_trait::async_trait;
use lanscout_core::types::{base_url, DiscoveryResult, ServiceKind};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// One address/port/path to check for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub address: String,
    pub port: u16,
    pub path: String,
    pub service_kind: ServiceKind,
}

impl ProbeTarget {
    pub fn new(address: impl Into<String>, port: u16, path: impl Into<String>, service_kind: ServiceKind) -> Self {
        Self {
            address: address.into(),
            port,
            path: path.into(),
            service_kind,
        }
    }

    /// Full URL that gets requested.
    pub fn url(&self) -> String {
        format!("{}{}", base_url(&self.address, self.port), self.path)
    }

    /// Builds the result record for this target.
    pub fn result(&self, reachable: bool, latency: Duration) -> DiscoveryResult {
        DiscoveryResult {
            address: self.address.clone(),
            port: self.port,
            service_kind: self.service_kind,
            reachable,
            latency_ms: latency.as_millis() as u64,
        }
    }
}

/// Reachability check against a single target.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &ProbeTarget, timeout: Duration) -> DiscoveryResult;
}

/// Prober issuing one HTTP GET per check.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .pool_max_idle_per_host(0)
            .user_agent(concat!("lanscout/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DiscoveryError::ProbeClient(e.to_string()))?;
        Ok(Self { client })
    }

    /// Uses an existing client (shared connection settings, TLS roots).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn check(&self, url: &str, timeout: Duration) -> bool {
        let response = match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) => {
                trace!(url, error = %e, "Probe request failed");
                return false;
            }
        };

        if !response.status().is_success() {
            trace!(url, status = %response.status(), "Probe got non-success status");
            return false;
        }

        match response.bytes().await {
            Ok(body) => health_body_ready(&body),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, target: &ProbeTarget, timeout: Duration) -> DiscoveryResult {
        let url = target.url();
        let started = Instant::now();

        let reachable = tokio::time::timeout(timeout, self.check(&url, timeout))
            .await
            .unwrap_or(false);

        target.result(reachable, started.elapsed())
    }
}

/// A health body is "not ready" only when it is a JSON object carrying
/// `"ready": false`. Anything else on a 2xx counts as ready.
pub fn health_body_ready(body: &[u8]) -> bool {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => !matches!(map.get("ready"), Some(serde_json::Value::Bool(false))),
        _ => true,
    }
}

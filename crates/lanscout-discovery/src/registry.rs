//! Endpoint registry: one resolved endpoint slot per logical service.
//!
//! Resolution order per service:
//!
//! 1. a configured override pointing at a non-local host is trusted as-is;
//! 2. otherwise the discovery engine is asked;
//! 3. if that finds nothing, a local override is kept but marked unavailable;
//! 4. otherwise the service has no endpoint.
//!
//! The first non-empty resolution of each service is copied into a stable
//! snapshot and URL accessors read from it, so a later re-discovery that lands
//! on a different address does not redirect callers. Only a forced refresh or
//! an explicit [`EndpointRegistry::set_endpoint`] replaces a stable URL.

use crate::error::{DiscoveryError, Result};
use crate::service::{DiscoveryEngine, DiscoveryOutcome};
use futures::future::{BoxFuture, FutureExt, Shared};
use lanscout_core::config::{RegistryConfig, ServicesConfig};
use lanscout_core::types::{is_local_url, parse_http_url, EndpointSource, ServiceEndpoint, ServiceKind};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Resolution produced by [`EndpointRegistry::initialize`].
pub type Resolution = Arc<HashMap<ServiceKind, Option<ServiceEndpoint>>>;

type InitFuture = Shared<BoxFuture<'static, Resolution>>;

/// How often a resolver re-checks a scan started by someone else.
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Why a refresh did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyRefreshing,
    EndpointsValid,
    RateLimited,
}

/// Result of [`EndpointRegistry::refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed { forced: bool, resolved: usize },
    Skipped(SkipReason),
}

struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct EndpointRegistry {
    services: ServicesConfig,
    config: RegistryConfig,
    discovery: Arc<DiscoveryEngine>,

    /// Live slots; a missing key means "no endpoint"
    slots: RwLock<HashMap<ServiceKind, ServiceEndpoint>>,

    /// First non-empty URL per service
    stable: RwLock<HashMap<ServiceKind, String>>,

    init: Mutex<Option<InitFuture>>,
    initialized: AtomicBool,
    refreshing: AtomicBool,
    last_refresh: Mutex<Option<Instant>>,
}

impl EndpointRegistry {
    pub fn new(services: ServicesConfig, config: RegistryConfig, discovery: Arc<DiscoveryEngine>) -> Self {
        Self {
            services,
            config,
            discovery,
            slots: RwLock::new(HashMap::new()),
            stable: RwLock::new(HashMap::new()),
            init: Mutex::new(None),
            initialized: AtomicBool::new(false),
            refreshing: AtomicBool::new(false),
            last_refresh: Mutex::new(None),
        }
    }

    pub fn discovery(&self) -> &Arc<DiscoveryEngine> {
        &self.discovery
    }

    /// Resolves every service once.
    ///
    /// Concurrent and repeated callers share the same in-flight resolution
    /// and receive the same result.
    pub async fn initialize(self: &Arc<Self>) -> Resolution {
        let pending = {
            let mut init = self.init.lock();
            match init.as_ref() {
                Some(pending) => pending.clone(),
                None => {
                    let registry = Arc::clone(self);
                    let pending = async move { registry.run_initialization().await }.boxed().shared();
                    *init = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    async fn run_initialization(&self) -> Resolution {
        info!("Initializing endpoint registry");
        *self.last_refresh.lock() = Some(Instant::now());

        let mut resolution = HashMap::new();
        for kind in ServiceKind::ALL {
            let endpoint = self.resolve(kind).await;
            self.install(kind, endpoint.clone(), false);
            resolution.insert(kind, endpoint);
        }

        self.initialized.store(true, Ordering::SeqCst);
        info!(
            usable = resolution.values().flatten().filter(|e| e.is_usable()).count(),
            "Endpoint registry initialized"
        );
        Arc::new(resolution)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn initializing(&self) -> bool {
        self.init.lock().is_some() && !self.is_initialized()
    }

    /// URL for `kind`, preferring the stable snapshot. Never blocks.
    pub fn get_endpoint(&self, kind: ServiceKind) -> Option<String> {
        if let Some(url) = self.stable.read().get(&kind) {
            return Some(url.clone());
        }
        self.slots.read().get(&kind).map(|endpoint| endpoint.url.clone())
    }

    /// Full endpoint record for `kind`; `unavailable` when nothing resolved.
    pub fn describe(&self, kind: ServiceKind) -> ServiceEndpoint {
        self.slots
            .read()
            .get(&kind)
            .cloned()
            .unwrap_or_else(ServiceEndpoint::unavailable)
    }

    pub fn snapshot(&self) -> HashMap<ServiceKind, ServiceEndpoint> {
        ServiceKind::ALL
            .into_iter()
            .map(|kind| (kind, self.describe(kind)))
            .collect()
    }

    /// True when at least one service currently has a usable endpoint.
    pub fn has_valid_endpoints(&self) -> bool {
        self.slots.read().values().any(ServiceEndpoint::is_usable)
    }

    /// Manually points `kind` at `url`, replacing the stable URL too.
    pub fn set_endpoint(&self, kind: ServiceKind, url: &str) -> Result<()> {
        let url = url.trim().trim_end_matches('/');
        if let Err(reason) = parse_http_url(url) {
            return Err(DiscoveryError::InvalidConfig(format!("endpoint for {}: {}", kind, reason)));
        }

        info!(service = %kind, url, "Endpoint set manually");
        self.slots.write().insert(kind, ServiceEndpoint::configured(url, true));
        self.stable.write().insert(kind, url.to_string());
        Ok(())
    }

    /// Records a reachability observation made by a caller.
    pub fn mark_checked(&self, kind: ServiceKind, available: bool) {
        if let Some(endpoint) = self.slots.write().get_mut(&kind) {
            endpoint.mark_checked(available);
            debug!(service = %kind, available, "Endpoint checked");
        }
    }

    /// Re-resolves endpoints.
    ///
    /// Without `force` this only runs when no usable endpoint exists, and only
    /// for services lacking one; stable URLs are kept. With `force` the stable
    /// snapshot and the discovery cache are cleared and every service is
    /// resolved again. Either way at most one refresh runs per minimum
    /// interval.
    pub async fn refresh(&self, force: bool, reason: &str) -> RefreshOutcome {
        if !force && self.has_valid_endpoints() {
            debug!(reason, "Refresh skipped, endpoints still valid");
            return RefreshOutcome::Skipped(SkipReason::EndpointsValid);
        }

        if self.initializing() {
            debug!(reason, "Refresh skipped, initialization in progress");
            return RefreshOutcome::Skipped(SkipReason::AlreadyRefreshing);
        }

        {
            let mut last = self.last_refresh.lock();
            if let Some(at) = *last {
                if at.elapsed() < self.config.refresh_min_interval() {
                    debug!(reason, since_ms = at.elapsed().as_millis() as u64, "Refresh rate limited");
                    return RefreshOutcome::Skipped(SkipReason::RateLimited);
                }
            }

            if self
                .refreshing
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                debug!(reason, "Refresh already running");
                return RefreshOutcome::Skipped(SkipReason::AlreadyRefreshing);
            }
            *last = Some(Instant::now());
        }
        let _refreshing = RefreshGuard(&self.refreshing);

        info!(force, reason, "Refreshing endpoints");
        if force {
            self.stable.write().clear();
            self.discovery.invalidate_cache().await;
        }

        let kinds: Vec<ServiceKind> = if force {
            ServiceKind::ALL.to_vec()
        } else {
            let slots = self.slots.read();
            ServiceKind::ALL
                .into_iter()
                .filter(|kind| !slots.get(kind).map(ServiceEndpoint::is_usable).unwrap_or(false))
                .collect()
        };

        let mut resolved = 0;
        for kind in kinds {
            let endpoint = self.resolve(kind).await;
            if endpoint.as_ref().map(ServiceEndpoint::is_usable).unwrap_or(false) {
                resolved += 1;
            }
            self.install(kind, endpoint, force);
        }

        info!(force, resolved, "Endpoint refresh finished");
        RefreshOutcome::Refreshed { forced: force, resolved }
    }

    /// Cancels any running discovery scan.
    pub fn shutdown(&self) {
        self.discovery.cancel();
        info!("Endpoint registry shut down");
    }

    fn install(&self, kind: ServiceKind, endpoint: Option<ServiceEndpoint>, replace_empty: bool) {
        match endpoint {
            Some(endpoint) => {
                let mut stable = self.stable.write();
                if !stable.contains_key(&kind) {
                    debug!(service = %kind, url = %endpoint.url, "Endpoint stabilized");
                    stable.insert(kind, endpoint.url.clone());
                } else if stable.get(&kind) != Some(&endpoint.url) {
                    debug!(service = %kind, url = %endpoint.url, "Re-resolved endpoint differs from stable URL");
                }
                self.slots.write().insert(kind, endpoint);
            }
            None if replace_empty => {
                self.slots.write().remove(&kind);
            }
            None => {}
        }
    }

    async fn resolve(&self, kind: ServiceKind) -> Option<ServiceEndpoint> {
        let override_url = self.services.get(kind).override_url.as_deref();

        if let Some(url) = override_url.filter(|url| !is_local_url(url)) {
            info!(service = %kind, url, "Using configured endpoint");
            return Some(ServiceEndpoint::configured(url, true));
        }

        loop {
            match self.discovery.discover(kind).await {
                DiscoveryOutcome::Discovered(endpoint) => return Some(endpoint),
                DiscoveryOutcome::NotFound => break,
                DiscoveryOutcome::InProgress => {
                    while self.discovery.is_scanning() {
                        tokio::time::sleep(SCAN_POLL_INTERVAL).await;
                    }
                }
            }
        }

        match override_url {
            Some(url) => {
                warn!(service = %kind, url, "Service not discovered, falling back to local endpoint");
                Some(ServiceEndpoint::configured(url, false))
            }
            None => {
                warn!(service = %kind, "Service unavailable");
                None
            }
        }
    }
}

impl EndpointSource for EndpointRegistry {
    fn endpoint(&self, kind: ServiceKind) -> Option<String> {
        self.get_endpoint(kind)
    }
}

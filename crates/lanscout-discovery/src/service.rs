//! LAN discovery engine.

use crate::candidates::{build_plan, detect_local_ipv4, CandidatePlan};
use crate::error::{DiscoveryError, Result};
use crate::probe::{ProbeTarget, Prober};
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use lanscout_core::config::{DiscoveryConfig, ServicesConfig};
use lanscout_core::store::TtlCache;
use lanscout_core::types::{DiscoveryResult, ServiceEndpoint, ServiceKind};
use parking_lot::{Mutex, RwLock};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of one `discover` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// A reachable endpoint was found (or served from the cache)
    Discovered(ServiceEndpoint),
    /// Every candidate was exhausted without an answer
    NotFound,
    /// Another scan is running; ask again later
    InProgress,
}

impl DiscoveryOutcome {
    pub fn endpoint(self) -> Option<ServiceEndpoint> {
        match self {
            DiscoveryOutcome::Discovered(endpoint) => Some(endpoint),
            _ => None,
        }
    }

    pub fn is_discovered(&self) -> bool {
        matches!(self, DiscoveryOutcome::Discovered(_))
    }
}

/// Counters describing engine activity since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryStats {
    pub scans_started: u64,
    pub cache_hits: u64,
    pub probes_issued: u64,
}

struct CachedEndpoint {
    endpoint: ServiceEndpoint,
    expires_at: Instant,
}

/// Clears the single-flight flag however the scan ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Finds a reachable address for a logical service on an unknown LAN.
///
/// Only one scan runs at a time; a concurrent `discover` returns
/// [`DiscoveryOutcome::InProgress`] instead of queuing. Successful results are
/// cached per service for the configured TTL.
pub struct DiscoveryEngine {
    /// Configuration
    config: DiscoveryConfig,

    /// Ports and health paths per service
    services: ServicesConfig,

    /// Reachability checker
    prober: Arc<dyn Prober>,

    /// Successful results (keyed by service)
    cache: DashMap<ServiceKind, CachedEndpoint>,

    /// Optional cache that survives restarts
    persistent: Option<TtlCache<ServiceEndpoint>>,

    /// Single-flight flag
    in_flight: AtomicBool,

    /// Cancels the running scan; replaced after each cancel
    cancel: Mutex<CancellationToken>,

    /// Device address (configured, detected, or set by the caller)
    device_address: RwLock<Option<Ipv4Addr>>,

    scans_started: AtomicU64,
    cache_hits: AtomicU64,
    probes_issued: AtomicU64,
}

impl DiscoveryEngine {
    /// Creates a new discovery engine
    pub fn new(config: DiscoveryConfig, services: ServicesConfig, prober: Arc<dyn Prober>) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(DiscoveryError::InvalidConfig("batch_size cannot be 0".to_string()));
        }

        info!(
            enabled = config.enabled,
            batch_size = config.batch_size,
            cache_ttl_secs = config.cache_ttl_secs,
            "Discovery engine created"
        );

        let device_address = config.device_address;
        Ok(Self {
            config,
            services,
            prober,
            cache: DashMap::new(),
            persistent: None,
            in_flight: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            device_address: RwLock::new(device_address),
            scans_started: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            probes_issued: AtomicU64::new(0),
        })
    }

    /// Backs the result cache with a persistent store so results survive a
    /// restart within the TTL.
    pub fn with_persistent_cache(mut self, cache: TtlCache<ServiceEndpoint>) -> Self {
        self.persistent = Some(cache);
        self
    }

    /// Returns whether a scan is currently running
    pub fn is_scanning(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> DiscoveryStats {
        DiscoveryStats {
            scans_started: self.scans_started.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            probes_issued: self.probes_issued.load(Ordering::Relaxed),
        }
    }

    /// Overrides the device address used to derive gateway and subnet.
    pub fn set_device_address(&self, address: Option<Ipv4Addr>) {
        *self.device_address.write() = address;
    }

    /// Device address in use, detecting it from the OS when unknown.
    pub fn device_address(&self) -> Option<Ipv4Addr> {
        if let Some(address) = *self.device_address.read() {
            return Some(address);
        }
        let detected = detect_local_ipv4();
        if detected.is_some() {
            *self.device_address.write() = detected;
        }
        detected
    }

    /// Candidate list a scan would use right now.
    pub fn plan(&self) -> CandidatePlan {
        build_plan(&self.config, self.device_address())
    }

    /// Locates `kind` on the network.
    pub async fn discover(&self, kind: ServiceKind) -> DiscoveryOutcome {
        if let Some(endpoint) = self.cached(kind).await {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!(service = %kind, url = %endpoint.url, "Discovery served from cache");
            return DiscoveryOutcome::Discovered(endpoint);
        }

        if !self.config.enabled {
            debug!(service = %kind, "Discovery disabled");
            return DiscoveryOutcome::NotFound;
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(service = %kind, "Discovery already running");
            return DiscoveryOutcome::InProgress;
        }
        let _flight = FlightGuard(&self.in_flight);

        self.scans_started.fetch_add(1, Ordering::Relaxed);
        let token = self.cancel.lock().clone();
        let started = Instant::now();
        info!(service = %kind, "Starting discovery scan");

        let found = tokio::select! {
            _ = token.cancelled() => {
                info!(service = %kind, "Discovery scan cancelled");
                return DiscoveryOutcome::NotFound;
            }
            found = self.scan(kind) => found,
        };

        match found {
            Some(result) => {
                let endpoint = ServiceEndpoint::discovered(result.url());
                info!(
                    service = %kind,
                    url = %endpoint.url,
                    latency_ms = result.latency_ms,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Service discovered"
                );
                self.remember(kind, &endpoint).await;
                DiscoveryOutcome::Discovered(endpoint)
            }
            None => {
                warn!(
                    service = %kind,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Service not found on the network"
                );
                DiscoveryOutcome::NotFound
            }
        }
    }

    /// Aborts the running scan, if any. Later scans are unaffected.
    pub fn cancel(&self) {
        let mut token = self.cancel.lock();
        token.cancel();
        *token = CancellationToken::new();
    }

    /// Drops every cached result, e.g. after the transport changed.
    pub async fn invalidate_cache(&self) {
        self.cache.clear();
        if let Some(ref persistent) = self.persistent {
            for kind in ServiceKind::ALL {
                if let Err(e) = persistent.invalidate(kind.as_str()).await {
                    warn!(service = %kind, error = %e, "Failed to invalidate persisted discovery result");
                }
            }
        }
        info!("Discovery cache invalidated");
    }

    async fn cached(&self, kind: ServiceKind) -> Option<ServiceEndpoint> {
        let expired = match self.cache.get(&kind) {
            Some(entry) if Instant::now() < entry.expires_at => return Some(entry.endpoint.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.cache.remove(&kind);
        }

        let persistent = self.persistent.as_ref()?;
        let endpoint = match persistent.get(kind.as_str()).await {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => return None,
            Err(e) => {
                warn!(service = %kind, error = %e, "Failed to read persisted discovery result");
                return None;
            }
        };

        let age = (chrono::Utc::now() - endpoint.last_checked_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let remaining = self.config.cache_ttl().checked_sub(age)?;
        self.cache.insert(
            kind,
            CachedEndpoint {
                endpoint: endpoint.clone(),
                expires_at: Instant::now() + remaining,
            },
        );
        Some(endpoint)
    }

    async fn remember(&self, kind: ServiceKind, endpoint: &ServiceEndpoint) {
        self.cache.insert(
            kind,
            CachedEndpoint {
                endpoint: endpoint.clone(),
                expires_at: Instant::now() + self.config.cache_ttl(),
            },
        );
        if let Some(ref persistent) = self.persistent {
            if let Err(e) = persistent.set(kind.as_str(), endpoint).await {
                warn!(service = %kind, error = %e, "Failed to persist discovery result");
            }
        }
    }

    async fn scan(&self, kind: ServiceKind) -> Option<DiscoveryResult> {
        let plan = self.plan();
        let service = self.services.get(kind);
        debug!(
            service = %kind,
            priority = plan.priority.len(),
            sweep = plan.sweep.len(),
            "Candidate plan built"
        );

        // Most likely hits first, one at a time with the longer timeout
        for host in &plan.priority {
            let target = ProbeTarget::new(host.clone(), service.port, service.health_path.clone(), kind);
            let result = self.probe(&target, self.config.priority_timeout()).await;
            if result.reachable {
                return Some(result);
            }
        }

        for batch in plan.sweep.chunks(self.config.batch_size) {
            let mut pending: FuturesUnordered<_> = batch
                .iter()
                .map(|host| {
                    let target = ProbeTarget::new(host.clone(), service.port, service.health_path.clone(), kind);
                    async move { self.probe(&target, self.config.sweep_timeout()).await }
                })
                .collect();

            // Dropping `pending` on return cancels the rest of the batch
            while let Some(result) = pending.next().await {
                if result.reachable {
                    return Some(result);
                }
            }
        }

        None
    }

    async fn probe(&self, target: &ProbeTarget, timeout: Duration) -> DiscoveryResult {
        self.probes_issued.fetch_add(1, Ordering::Relaxed);
        let result = self.prober.probe(target, timeout).await;
        debug!(
            service = %target.service_kind,
            address = %target.address,
            port = target.port,
            reachable = result.reachable,
            latency_ms = result.latency_ms,
            "Probe finished"
        );
        result
    }
}

impl Drop for DiscoveryEngine {
    fn drop(&mut self) {
        if self.in_flight.load(Ordering::SeqCst) {
            warn!("Discovery engine dropped while a scan was running");
            self.cancel.lock().cancel();
        }
    }
}

//! Composition root: builds every component from one [`AppConfig`] and
//! wires network monitor events into the rest of the layer.

use crate::error::{AppError, Result};
use lanscout_client::{
    ChannelTransport, HttpChannelTransport, ListenerHandle, NetworkCallbacks, NetworkMonitor, ReconnectInfo,
    UpdateChannel,
};
use lanscout_core::config::StorageBackend;
use lanscout_core::{
    AppConfig, ConnectivityGate, EndpointSource, FileStore, KeyValueStore, MemoryStore, NetworkNotification,
    ServiceKind, TtlCache,
};
use lanscout_discovery::{DiscoveryEngine, EndpointRegistry, HttpProber, Prober, RefreshOutcome, Resolution};
use lanscout_offline::{ActionExecutor, HttpActionExecutor, OfflineQueue, SyncReport};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Result of [`App::force_sync`].
#[derive(Debug, Clone, Serialize)]
pub struct ForceSyncReport {
    pub offline: SyncReport,

    /// Whether the update channel was connected after the resync
    pub channel_connected: bool,
}

/// Builder for [`App`]. Every seam left unset gets its production
/// implementation.
pub struct AppBuilder {
    config: AppConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    prober: Option<Arc<dyn Prober>>,
    transport: Option<Arc<dyn ChannelTransport>>,
    executor: Option<Arc<dyn ActionExecutor>>,
}

impl AppBuilder {
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn channel_transport(mut self, transport: Arc<dyn ChannelTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn action_executor(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Validates the configuration and assembles the components.
    ///
    /// Must be called from inside a tokio runtime; monitor events are
    /// handled on tasks spawned onto it.
    pub async fn build(self) -> Result<App> {
        let config = self.config;
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| AppError::Runtime(e.to_string()))?;

        let store: Arc<dyn KeyValueStore> = match self.store {
            Some(store) => store,
            None => match config.storage.backend {
                StorageBackend::Memory => Arc::new(MemoryStore::new()),
                StorageBackend::File => Arc::new(FileStore::open(&config.storage.data_dir).await?),
            },
        };

        let prober: Arc<dyn Prober> = match self.prober {
            Some(prober) => prober,
            None => Arc::new(HttpProber::new()?),
        };

        let cache = TtlCache::new(store.clone(), "discovery", config.discovery.cache_ttl());
        let discovery = Arc::new(
            DiscoveryEngine::new(config.discovery.clone(), config.services.clone(), prober)?
                .with_persistent_cache(cache),
        );
        let registry = Arc::new(EndpointRegistry::new(
            config.services.clone(),
            config.registry.clone(),
            discovery.clone(),
        ));
        let endpoints: Arc<dyn EndpointSource> = registry.clone();

        let monitor = NetworkMonitor::new(config.monitor.clone());
        let gate: Arc<dyn ConnectivityGate> = monitor.clone();

        let transport: Arc<dyn ChannelTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpChannelTransport::new(&config.channel, endpoints.clone())?),
        };
        let channel = UpdateChannel::new(config.channel.clone(), transport, gate.clone());

        let executor: Arc<dyn ActionExecutor> = match self.executor {
            Some(executor) => executor,
            None => Arc::new(HttpActionExecutor::new(&config.offline, endpoints)?),
        };
        let offline = Arc::new(OfflineQueue::new(config.offline.clone(), store.clone(), executor, gate));

        let tasks = Arc::new(TaskSet {
            runtime,
            set: Mutex::new(JoinSet::new()),
        });
        let listener = monitor.add_callbacks(wire_monitor(&discovery, &registry, &channel, &offline, &tasks));

        info!(
            storage = ?config.storage.backend,
            discovery_enabled = config.discovery.enabled,
            "Application assembled"
        );

        Ok(App {
            config,
            store,
            discovery,
            registry,
            monitor,
            channel,
            offline,
            tasks,
            listener: Mutex::new(Some(listener)),
        })
    }
}

/// Background tasks spawned in response to monitor events.
struct TaskSet {
    runtime: Handle,
    set: Mutex<JoinSet<()>>,
}

impl TaskSet {
    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.set.lock();
        while set.try_join_next().is_some() {}
        set.spawn_on(task, &self.runtime);
    }

    fn take(&self) -> JoinSet<()> {
        std::mem::take(&mut *self.set.lock())
    }

    fn abort_all(&self) {
        self.set.lock().abort_all();
    }
}

fn wire_monitor(
    discovery: &Arc<DiscoveryEngine>,
    registry: &Arc<EndpointRegistry>,
    channel: &Arc<UpdateChannel>,
    offline: &Arc<OfflineQueue>,
    tasks: &Arc<TaskSet>,
) -> NetworkCallbacks {
    let on_disconnect = Arc::downgrade(channel);

    let reconnect = (
        Arc::downgrade(registry),
        Arc::downgrade(channel),
        Arc::downgrade(offline),
        Arc::downgrade(tasks),
    );

    let stable = (Arc::downgrade(channel), Arc::downgrade(offline), Arc::downgrade(tasks));

    let transport = (Arc::downgrade(discovery), Arc::downgrade(tasks));

    NetworkCallbacks::new()
        .on_disconnect(move |_| {
            if let Some(channel) = on_disconnect.upgrade() {
                channel.set_network_flapping(true);
            }
        })
        .on_reconnect(move |info| {
            let (registry, channel, offline, tasks) = &reconnect;
            let Some(tasks) = tasks.upgrade() else {
                return;
            };
            tasks.spawn(recover(registry.clone(), channel.clone(), offline.clone(), *info));
        })
        .on_stable(move |_| {
            let (channel, offline, tasks) = &stable;
            let Some(tasks) = tasks.upgrade() else {
                return;
            };
            tasks.spawn(establish(channel.clone(), offline.clone()));
        })
        .on_transport_change(move |from, to| {
            let (discovery, tasks) = &transport;
            let (Some(discovery), Some(tasks)) = (discovery.upgrade(), tasks.upgrade()) else {
                return;
            };
            info!(from, to, "Transport changed, dropping cached discovery results");
            tasks.spawn(async move { discovery.invalidate_cache().await });
        })
}

/// Runs once the network has been stable long enough after an outage.
async fn recover(
    registry: Weak<EndpointRegistry>,
    channel: Weak<UpdateChannel>,
    offline: Weak<OfflineQueue>,
    info: ReconnectInfo,
) {
    if let Some(registry) = registry.upgrade() {
        let reason = if info.needs_refresh { "long outage" } else { "reconnected" };
        match registry.refresh(info.needs_refresh, reason).await {
            RefreshOutcome::Refreshed { resolved, .. } => info!(resolved, "Endpoints refreshed after outage"),
            RefreshOutcome::Skipped(why) => debug!(?why, "Endpoint refresh skipped"),
        }
    }

    if let Some(channel) = channel.upgrade() {
        channel.set_network_flapping(false);
    }
    establish(channel, offline).await;
}

/// Opens the update channel if it is down and drains the offline queue.
/// Runs after the first stable connection and after every outage.
async fn establish(channel: Weak<UpdateChannel>, offline: Weak<OfflineQueue>) {
    if let Some(channel) = channel.upgrade() {
        if !channel.get_connection_status() {
            channel.reconnect().await;
        }
    }

    if let Some(offline) = offline.upgrade() {
        let report = offline.sync().await;
        if report.ran() {
            info!(
                succeeded = report.succeeded,
                failed = report.failed,
                remaining = report.remaining,
                "Offline queue drained"
            );
        }
    }
}

/// The assembled service-discovery and connection-resilience layer.
pub struct App {
    config: AppConfig,
    store: Arc<dyn KeyValueStore>,
    discovery: Arc<DiscoveryEngine>,
    registry: Arc<EndpointRegistry>,
    monitor: Arc<NetworkMonitor>,
    channel: Arc<UpdateChannel>,
    offline: Arc<OfflineQueue>,
    tasks: Arc<TaskSet>,
    listener: Mutex<Option<ListenerHandle>>,
}

impl App {
    pub fn builder(config: AppConfig) -> AppBuilder {
        AppBuilder {
            config,
            store: None,
            prober: None,
            transport: None,
            executor: None,
        }
    }

    /// Builds the app with production implementations of every seam.
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        Self::builder(config).build().await
    }

    /// Restores the offline queue, resolves every service and opens the
    /// update channel.
    pub async fn start(&self) -> Resolution {
        match self.offline.load().await {
            Ok(count) if count > 0 => info!(count, "Restored pending offline actions"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Could not restore offline queue, starting empty"),
        }

        let resolution = self.registry.initialize().await;
        let connected = self.channel.start().await;
        info!(
            resolved = resolution.values().filter(|e| e.is_some()).count(),
            channel_connected = connected,
            "Application started"
        );
        resolution
    }

    pub fn get_endpoint(&self, kind: ServiceKind) -> Option<String> {
        self.registry.get_endpoint(kind)
    }

    /// Feeds a device connectivity notification to the network monitor.
    /// Returns false when it was debounced.
    pub fn handle_network_change(&self, notification: NetworkNotification) -> bool {
        self.monitor.handle_notification(notification)
    }

    /// Drains the offline queue and resyncs the update channel. Does
    /// nothing while offline.
    pub async fn force_sync(&self) -> ForceSyncReport {
        let offline = self.offline.sync().await;
        let channel_connected = if self.monitor.is_online() {
            self.channel.resync().await
        } else {
            self.channel.get_connection_status()
        };
        ForceSyncReport {
            offline,
            channel_connected,
        }
    }

    /// Waits for every task spawned by monitor events, including tasks
    /// those tasks caused.
    pub async fn settle(&self) {
        loop {
            let mut set = self.tasks.take();
            if set.is_empty() {
                break;
            }
            while set.join_next().await.is_some() {}
        }
    }

    /// Stops every timer, background task and in-flight scan.
    pub async fn shutdown(&self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.dispose();
        }
        self.tasks.abort_all();
        self.monitor.shutdown();
        self.channel.shutdown().await;
        self.registry.shutdown();
        info!("Application shut down");
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn discovery(&self) -> &Arc<DiscoveryEngine> {
        &self.discovery
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<NetworkMonitor> {
        &self.monitor
    }

    pub fn channel(&self) -> &Arc<UpdateChannel> {
        &self.channel
    }

    pub fn offline(&self) -> &Arc<OfflineQueue> {
        &self.offline
    }
}

//! Fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use lanscout::client::{ChannelError, ChannelTransport, QueuedUpdate};
use lanscout::discovery::{ProbeTarget, Prober};
use lanscout::offline::{ActionExecutor, OfflineAction, QueueError};
use lanscout_core::{AppConfig, DiscoveryResult, NetworkNotification};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Config for a device at 192.168.1.17 with a fast heartbeat.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.discovery.loopback_hosts = vec!["127.0.0.1".to_string()];
    config.discovery.device_address = Some(Ipv4Addr::new(192, 168, 1, 17));
    config.channel.heartbeat_interval_secs = 2;
    config
}

pub fn wifi_up() -> NetworkNotification {
    NetworkNotification::new(true, "wifi", Some(true))
}

pub fn wifi_down() -> NetworkNotification {
    NetworkNotification::new(false, "wifi", Some(false))
}

/// Answers probes for configured `host:port` pairs.
#[derive(Default)]
pub struct FakeProber {
    reachable: Mutex<HashMap<String, u64>>,
    calls: AtomicUsize,
}

impl FakeProber {
    pub fn answer(&self, host: &str, port: u16, latency_ms: u64) {
        self.reachable.lock().insert(format!("{}:{}", host, port), latency_ms);
    }

    pub fn silence(&self, host: &str, port: u16) {
        self.reachable.lock().remove(&format!("{}:{}", host, port));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self, target: &ProbeTarget, timeout: Duration) -> DiscoveryResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = self
            .reachable
            .lock()
            .get(&format!("{}:{}", target.address, target.port))
            .copied();

        match latency {
            Some(ms) if Duration::from_millis(ms) <= timeout => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                target.result(true, Duration::from_millis(ms))
            }
            _ => target.result(false, Duration::ZERO),
        }
    }
}

/// Backend feed that can be taken down and fed updates.
pub struct FakeTransport {
    up: AtomicBool,
    connects: AtomicUsize,
    pending: Mutex<Vec<QueuedUpdate>>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            up: AtomicBool::new(true),
            connects: AtomicUsize::new(0),
            pending: Mutex::new(Vec::new()),
        }
    }
}

impl FakeTransport {
    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn push_update(&self, update: QueuedUpdate) {
        self.pending.lock().push(update);
    }

    fn check(&self) -> Result<(), ChannelError> {
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ChannelError::transport("backend unreachable"))
        }
    }
}

#[async_trait]
impl ChannelTransport for FakeTransport {
    async fn connect(&self) -> Result<(), ChannelError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.check()
    }

    async fn heartbeat(&self) -> Result<(), ChannelError> {
        self.check()
    }

    async fn poll_updates(&self) -> Result<Vec<QueuedUpdate>, ChannelError> {
        self.check()?;
        Ok(std::mem::take(&mut *self.pending.lock()))
    }
}

/// Records every replayed action; fails them all while `failing` is set.
#[derive(Default)]
pub struct RecordingExecutor {
    executed: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingExecutor {
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn execute(&self, action: &OfflineAction) -> Result<(), QueueError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(QueueError::execution(&action.id, "backend rejected"));
        }
        self.executed.lock().push(action.id.clone());
        Ok(())
    }
}

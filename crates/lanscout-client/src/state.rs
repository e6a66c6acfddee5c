use chrono::{DateTime, Utc};
use lanscout_core::config::ChannelConfig;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Connection state of the update channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChannelState {
    /// Channel is connected and heartbeating
    Connected,
    /// Channel is not connected and no attempt is pending
    Disconnected,
    /// A reconnect attempt is scheduled
    Reconnecting { attempt: u32 },
    /// Every attempt failed; waiting for an explicit reconnect
    GaveUp,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelState::Connected => write!(f, "Connected"),
            ChannelState::Disconnected => write!(f, "Disconnected"),
            ChannelState::Reconnecting { attempt } => write!(f, "Reconnecting (attempt {})", attempt),
            ChannelState::GaveUp => write!(f, "GaveUp"),
        }
    }
}

/// Reconnection schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Maximum number of attempts before giving up
    pub max_attempts: u32,
    /// Delay before attempt 1
    pub first: Duration,
    /// Delay before attempt 2
    pub second: Duration,
    /// Delay before attempt 3, doubled for each later attempt
    pub base: Duration,
    /// Upper bound for any delay
    pub max: Duration,
    /// Extra wait before connecting, after which connectivity is re-checked
    pub stability_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ChannelConfig::default())
    }
}

impl From<&ChannelConfig> for ReconnectPolicy {
    fn from(config: &ChannelConfig) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts,
            first: Duration::from_secs(config.first_backoff_secs),
            second: Duration::from_secs(config.second_backoff_secs),
            base: Duration::from_secs(config.base_backoff_secs),
            max: Duration::from_secs(config.max_backoff_secs),
            stability_delay: config.stability_delay(),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` (1-based), never decreasing in
    /// `attempt` and never above `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let raw = match attempt {
            0 | 1 => self.first,
            2 => self.second.max(self.first),
            n => {
                let doublings = (n - 3).min(31);
                let scaled = self.base.saturating_mul(1u32 << doublings);
                scaled.max(self.second).max(self.first)
            }
        };
        raw.min(self.max)
    }

    /// Returns true when `attempt` is past the allowed number of attempts.
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }
}

/// Shared state and counters of the update channel
#[derive(Debug)]
pub struct ChannelStatus {
    state: RwLock<ChannelState>,
    attempts: AtomicU32,
    connected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    heartbeats_failed: AtomicU64,
    updates_received: AtomicU64,
    updates_dispatched: AtomicU64,
    updates_dropped: AtomicU64,
}

impl Default for ChannelStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelStatus {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ChannelState::Disconnected),
            attempts: AtomicU32::new(0),
            connected_at: RwLock::new(None),
            last_error: RwLock::new(None),
            heartbeats_failed: AtomicU64::new(0),
            updates_received: AtomicU64::new(0),
            updates_dispatched: AtomicU64::new(0),
            updates_dropped: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state.read()
    }

    pub fn set_state(&self, state: ChannelState) {
        *self.state.write() = state;
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state(), ChannelState::Connected)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Claims the next attempt number.
    pub fn next_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Gives back an attempt that was abandoned before it ran.
    pub fn release_attempt(&self) {
        let _ = self
            .attempts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
    }

    pub fn reset_attempts(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }

    pub fn mark_connected(&self) {
        *self.connected_at.write() = Some(Utc::now());
        *self.last_error.write() = None;
        self.reset_attempts();
        self.set_state(ChannelState::Connected);
    }

    pub fn mark_disconnected(&self, error: Option<String>) {
        *self.connected_at.write() = None;
        if error.is_some() {
            *self.last_error.write() = error;
        }
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        *self.connected_at.read()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn record_heartbeat_failure(&self) {
        self.heartbeats_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self, count: u64) {
        self.updates_received.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self, count: u64) {
        self.updates_dispatched.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.updates_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            state: self.state(),
            attempts: self.attempts(),
            connected_at: self.connected_at(),
            last_error: self.last_error(),
            heartbeats_failed: self.heartbeats_failed.load(Ordering::Relaxed),
            updates_received: self.updates_received.load(Ordering::Relaxed),
            updates_dispatched: self.updates_dispatched.load(Ordering::Relaxed),
            updates_dropped: self.updates_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ChannelStatus`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub state: ChannelState,
    pub attempts: u32,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub heartbeats_failed: u64,
    pub updates_received: u64,
    pub updates_dispatched: u64,
    pub updates_dropped: u64,
}

//! Real-time update channel.
//!
//! Keeps a connection to the backend's update feed alive with a heartbeat,
//! reconnects with a capped backoff schedule when it drops, and fans inbound
//! updates out to filtered subscriptions from a bounded priority queue.
//!
//! Connection failures never surface as errors: callers observe them through
//! [`UpdateChannel::get_connection_status`] and [`UpdateChannel::state`].

use crate::error::{ChannelError, Result};
use crate::queue::{QueuedUpdate, UpdateFilter, UpdateQueue};
use crate::state::{ChannelSnapshot, ChannelState, ChannelStatus, ReconnectPolicy};
use crate::transport::ChannelTransport;
use dashmap::DashMap;
use lanscout_core::config::ChannelConfig;
use lanscout_core::timer::TimerSet;
use lanscout_core::types::ConnectivityGate;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const HEARTBEAT_TIMER: &str = "heartbeat";
const RECONNECT_TIMER: &str = "reconnect";
const DRAIN_TIMER: &str = "drain";

/// Subscriber callback.
pub type UpdateCallback = Arc<dyn Fn(&QueuedUpdate) + Send + Sync>;

struct Subscription {
    update_type: String,
    filter: UpdateFilter,
    callback: UpdateCallback,
    active: bool,
}

pub struct UpdateChannel {
    config: ChannelConfig,
    policy: ReconnectPolicy,
    transport: Arc<dyn ChannelTransport>,
    gate: Arc<dyn ConnectivityGate>,
    status: ChannelStatus,

    /// Set while the network monitor reports flapping; suppresses reconnects
    flapping: AtomicBool,

    /// When the network was last reported stable again
    stable_since: Mutex<Option<Instant>>,

    queue: Mutex<UpdateQueue>,
    subscriptions: DashMap<String, Subscription>,
    timers: TimerSet,
    me: Weak<UpdateChannel>,
}

impl UpdateChannel {
    pub fn new(
        config: ChannelConfig,
        transport: Arc<dyn ChannelTransport>,
        gate: Arc<dyn ConnectivityGate>,
    ) -> Arc<Self> {
        let policy = ReconnectPolicy::from(&config);
        info!(
            heartbeat_secs = config.heartbeat_interval_secs,
            max_attempts = policy.max_attempts,
            queue_capacity = config.queue_capacity,
            "Update channel created"
        );

        Arc::new_cyclic(|me| Self {
            queue: Mutex::new(UpdateQueue::new(config.queue_capacity)),
            config,
            policy,
            transport,
            gate,
            status: ChannelStatus::new(),
            flapping: AtomicBool::new(false),
            stable_since: Mutex::new(None),
            subscriptions: DashMap::new(),
            timers: TimerSet::new("update-channel"),
            me: me.clone(),
        })
    }

    /// Starts the periodic queue drain and connects.
    pub async fn start(&self) -> bool {
        let channel = self.me.clone();
        self.timers
            .schedule_interval(DRAIN_TIMER, self.config.drain_interval(), move || {
                let channel = channel.clone();
                async move {
                    match channel.upgrade() {
                        Some(channel) => {
                            channel.drain_queue();
                            true
                        }
                        None => false,
                    }
                }
            });

        self.connect_now().await
    }

    async fn connect_now(&self) -> bool {
        if !self.gate.is_online() {
            debug!("Network offline, not connecting update channel");
            self.status.set_state(ChannelState::Disconnected);
            return false;
        }

        match self.transport.connect().await {
            Ok(()) => {
                self.on_connected();
                true
            }
            Err(e) => {
                warn!(error = %e, "Update channel connect failed");
                self.status.mark_disconnected(Some(e.to_string()));
                self.schedule_reconnect();
                false
            }
        }
    }

    fn on_connected(&self) {
        self.timers.cancel(RECONNECT_TIMER);
        self.status.mark_connected();
        self.start_heartbeat();
        info!("Update channel connected");
    }

    fn start_heartbeat(&self) {
        let channel = self.me.clone();
        self.timers
            .schedule_interval(HEARTBEAT_TIMER, self.config.heartbeat_interval(), move || {
                let channel = channel.clone();
                async move {
                    match channel.upgrade() {
                        Some(channel) => channel.heartbeat_tick().await,
                        None => false,
                    }
                }
            });
    }

    /// One heartbeat. Returns false when the heartbeat loop should stop.
    async fn heartbeat_tick(&self) -> bool {
        match self.transport.heartbeat().await {
            Ok(()) => {
                match self.transport.poll_updates().await {
                    Ok(updates) => {
                        for update in updates {
                            self.publish(update);
                        }
                    }
                    Err(e) => debug!(error = %e, "Update poll failed"),
                }
                true
            }
            Err(e) => {
                warn!(error = %e, "Heartbeat failed");
                self.status.record_heartbeat_failure();
                self.status.mark_disconnected(Some(e.to_string()));
                self.status.set_state(ChannelState::Disconnected);
                self.schedule_reconnect();
                false
            }
        }
    }

    fn schedule_reconnect(&self) {
        if self.flapping.load(Ordering::SeqCst) {
            debug!("Network flapping, reconnect suppressed");
            self.status.set_state(ChannelState::Disconnected);
            return;
        }

        let attempt = self.status.next_attempt();
        if self.policy.exhausted(attempt) {
            self.status.release_attempt();
            self.timers.cancel(RECONNECT_TIMER);
            self.status.set_state(ChannelState::GaveUp);
            warn!(
                attempts = self.status.attempts(),
                "Giving up on update channel until reconnect is requested"
            );
            return;
        }

        let delay = self.policy.delay(attempt);
        self.status.set_state(ChannelState::Reconnecting { attempt });
        info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            stability_delay_ms = self.policy.stability_delay.as_millis() as u64,
            "Reconnect scheduled"
        );

        let channel = self.me.clone();
        self.timers
            .schedule(RECONNECT_TIMER, delay + self.policy.stability_delay, async move {
                if let Some(channel) = channel.upgrade() {
                    channel.run_attempt(attempt).await;
                }
            });
    }

    async fn run_attempt(&self, attempt: u32) {
        if self.flapping.load(Ordering::SeqCst) || !self.gate.is_online() {
            info!(attempt, "Network not stable, reconnect attempt abandoned");
            self.status.release_attempt();
            self.status.set_state(ChannelState::Disconnected);
            return;
        }

        debug!(attempt, "Reconnecting update channel");
        match self.transport.connect().await {
            Ok(()) => self.on_connected(),
            Err(e) => {
                warn!(attempt, error = %e, "Reconnect attempt failed");
                self.status.mark_disconnected(Some(e.to_string()));
                self.schedule_reconnect();
            }
        }
    }

    /// Starts over with a fresh attempt budget. Returns whether the channel
    /// is connected afterwards.
    pub async fn reconnect(&self) -> bool {
        self.timers.cancel(RECONNECT_TIMER);
        self.status.reset_attempts();
        if self.status.is_connected() {
            return true;
        }
        info!("Explicit reconnect requested");
        self.status.set_state(ChannelState::Disconnected);
        self.connect_now().await
    }

    pub async fn disconnect(&self) {
        self.timers.cancel(HEARTBEAT_TIMER);
        self.timers.cancel(RECONNECT_TIMER);
        self.status.mark_disconnected(None);
        self.status.set_state(ChannelState::Disconnected);
        self.transport.disconnect().await;
        info!("Update channel disconnected");
    }

    /// True only while connected; false while reconnecting or after giving up.
    pub fn get_connection_status(&self) -> bool {
        self.status.is_connected()
    }

    pub fn state(&self) -> ChannelState {
        self.status.state()
    }

    pub fn attempts(&self) -> u32 {
        self.status.attempts()
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        self.status.snapshot()
    }

    /// While flapping, no reconnect is scheduled or run and the attempt
    /// counter restarts. Clearing the flag only records when the network
    /// became stable; it does not reconnect.
    pub fn set_network_flapping(&self, flapping: bool) {
        self.flapping.store(flapping, Ordering::SeqCst);

        if flapping {
            let cancelled = self.timers.cancel(RECONNECT_TIMER);
            self.status.reset_attempts();
            *self.stable_since.lock() = None;
            if matches!(self.status.state(), ChannelState::Reconnecting { .. }) {
                self.status.set_state(ChannelState::Disconnected);
            }
            info!(cancelled_reconnect = cancelled, "Network flapping, reconnects suppressed");
        } else {
            *self.stable_since.lock() = Some(Instant::now());
            debug!("Network stable, reconnects allowed");
        }
    }

    pub fn is_network_flapping(&self) -> bool {
        self.flapping.load(Ordering::SeqCst)
    }

    /// How long the network has been reported stable, if it has.
    pub fn stable_for(&self) -> Option<Duration> {
        self.stable_since.lock().map(|since| since.elapsed())
    }

    /// Registers a callback for updates of `update_type` whose payload
    /// matches `filter`.
    pub fn subscribe(
        &self,
        update_type: &str,
        filter: UpdateFilter,
        callback: impl Fn(&QueuedUpdate) + Send + Sync + 'static,
    ) -> Result<String> {
        if update_type.trim().is_empty() {
            return Err(ChannelError::invalid_filter("type", "update type cannot be empty"));
        }
        filter.validate()?;

        let id = uuid::Uuid::new_v4().to_string();
        self.subscriptions.insert(
            id.clone(),
            Subscription {
                update_type: update_type.to_string(),
                filter,
                callback: Arc::new(callback),
                active: true,
            },
        );
        debug!(subscription = %id, update_type, "Subscribed");
        Ok(id)
    }

    pub fn unsubscribe(&self, id: &str) -> bool {
        let removed = self.subscriptions.remove(id).is_some();
        if removed {
            debug!(subscription = %id, "Unsubscribed");
        }
        removed
    }

    /// Inactive subscriptions receive nothing and are removed on the next
    /// drain.
    pub fn set_subscription_active(&self, id: &str, active: bool) -> bool {
        match self.subscriptions.get_mut(id) {
            Some(mut subscription) => {
                subscription.active = active;
                true
            }
            None => false,
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Queues an inbound update, evicting the oldest when full.
    pub fn publish(&self, update: QueuedUpdate) {
        let evicted = self.queue.lock().push(update);
        self.status.record_received(1);
        if let Some(evicted) = evicted {
            self.status.record_dropped();
            warn!(update_type = %evicted.update_type, "Update queue full, dropped oldest update");
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Dispatches every queued update, highest priority first, to matching
    /// active subscriptions. Returns the number of callback invocations.
    pub fn drain_queue(&self) -> usize {
        let updates = self.queue.lock().drain_by_priority();
        if updates.is_empty() {
            return 0;
        }

        self.subscriptions.retain(|_, subscription| subscription.active);
        let subscriptions: Vec<(String, String, UpdateFilter, UpdateCallback)> = self
            .subscriptions
            .iter()
            .map(|entry| {
                let subscription = entry.value();
                (
                    entry.key().clone(),
                    subscription.update_type.clone(),
                    subscription.filter.clone(),
                    Arc::clone(&subscription.callback),
                )
            })
            .collect();

        let mut dispatched = 0;
        for update in &updates {
            for (id, update_type, filter, callback) in &subscriptions {
                if *update_type != update.update_type || !filter.matches(&update.payload) {
                    continue;
                }
                if catch_unwind(AssertUnwindSafe(|| callback(update))).is_err() {
                    error!(subscription = %id, update_type = %update.update_type, "Subscriber panicked");
                }
                dispatched += 1;
            }
        }

        self.status.record_dispatched(dispatched as u64);
        debug!(updates = updates.len(), dispatched, "Update queue drained");
        dispatched
    }

    /// Pulls pending updates and dispatches them, reconnecting first when
    /// the channel is down.
    pub async fn resync(&self) -> bool {
        if !self.status.is_connected() {
            return self.reconnect().await;
        }

        match self.transport.poll_updates().await {
            Ok(updates) => {
                for update in updates {
                    self.publish(update);
                }
            }
            Err(e) => debug!(error = %e, "Resync poll failed"),
        }
        self.drain_queue();
        true
    }

    /// Stops every timer, drops subscriptions and closes the transport.
    pub async fn shutdown(&self) {
        self.timers.cancel_all();
        self.subscriptions.clear();
        self.status.mark_disconnected(None);
        self.status.set_state(ChannelState::Disconnected);
        self.transport.disconnect().await;
        info!("Update channel shut down");
    }
}

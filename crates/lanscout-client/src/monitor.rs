//! Network monitor.
//!
//! Turns raw device connectivity notifications into debounced logical
//! transitions and delivers them to registered listeners:
//!
//! - `on_disconnect` when the device goes offline,
//! - `on_connect` as soon as it comes back,
//! - `on_reconnect` once a stability window after coming back has passed,
//!   carrying how long the outage lasted,
//! - `on_stable` once the short stability window after the first connection
//!   has passed, when there was no outage to recover from.
//!
//! Listener invocations are isolated: a panicking listener is logged and the
//! remaining listeners still receive the event. Events reach each listener in
//! the order the transitions were processed.

use chrono::Utc;
use lanscout_core::config::MonitorConfig;
use lanscout_core::timer::TimerSet;
use lanscout_core::types::{ConnectivityGate, NetworkNotification, NetworkStatus};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info};

const STABILITY_TIMER: &str = "stability";

/// Logical state of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    /// No notification processed yet
    Unknown,
    /// Connected, stability window still running
    StabilizingOnline,
    Online,
    Offline,
}

/// Coarse connection quality for UI purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    Offline,
    /// Stabilizing, or internet reachability unknown
    Unstable,
    /// Cellular
    Good,
    /// Wi-Fi or wired
    Excellent,
}

/// Payload of `on_reconnect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectInfo {
    /// Length of the outage that just ended
    pub offline_duration: Duration,
    /// The outage was long enough that resolved endpoints may be stale
    pub needs_refresh: bool,
}

/// Receiver of network events. Every method defaults to doing nothing.
pub trait NetworkListener: Send + Sync {
    fn on_connect(&self, _status: &NetworkStatus) {}

    fn on_disconnect(&self, _status: &NetworkStatus) {}

    fn on_reconnect(&self, _info: &ReconnectInfo) {}

    /// The first connection seen by the monitor held for the stability
    /// window. Never follows an outage; that case is `on_reconnect`.
    fn on_stable(&self, _status: &NetworkStatus) {}

    /// The device switched networks (e.g. Wi-Fi to cellular) while online.
    fn on_transport_change(&self, _previous: &str, _current: &str) {}
}

type StatusCallback = Box<dyn Fn(&NetworkStatus) + Send + Sync>;
type ReconnectCallback = Box<dyn Fn(&ReconnectInfo) + Send + Sync>;
type TransportCallback = Box<dyn Fn(&str, &str) + Send + Sync>;

/// Closure-based listener.
#[derive(Default)]
pub struct NetworkCallbacks {
    on_connect: Option<StatusCallback>,
    on_disconnect: Option<StatusCallback>,
    on_reconnect: Option<ReconnectCallback>,
    on_stable: Option<StatusCallback>,
    on_transport_change: Option<TransportCallback>,
}

impl NetworkCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect(mut self, f: impl Fn(&NetworkStatus) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Box::new(f));
        self
    }

    pub fn on_disconnect(mut self, f: impl Fn(&NetworkStatus) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Box::new(f));
        self
    }

    pub fn on_reconnect(mut self, f: impl Fn(&ReconnectInfo) + Send + Sync + 'static) -> Self {
        self.on_reconnect = Some(Box::new(f));
        self
    }

    pub fn on_stable(mut self, f: impl Fn(&NetworkStatus) + Send + Sync + 'static) -> Self {
        self.on_stable = Some(Box::new(f));
        self
    }

    pub fn on_transport_change(mut self, f: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        self.on_transport_change = Some(Box::new(f));
        self
    }
}

impl NetworkListener for NetworkCallbacks {
    fn on_connect(&self, status: &NetworkStatus) {
        if let Some(ref f) = self.on_connect {
            f(status);
        }
    }

    fn on_disconnect(&self, status: &NetworkStatus) {
        if let Some(ref f) = self.on_disconnect {
            f(status);
        }
    }

    fn on_reconnect(&self, info: &ReconnectInfo) {
        if let Some(ref f) = self.on_reconnect {
            f(info);
        }
    }

    fn on_stable(&self, status: &NetworkStatus) {
        if let Some(ref f) = self.on_stable {
            f(status);
        }
    }

    fn on_transport_change(&self, previous: &str, current: &str) {
        if let Some(ref f) = self.on_transport_change {
            f(previous, current);
        }
    }
}

/// Registration returned by [`NetworkMonitor::add_listener`].
///
/// Dropping the handle keeps the listener registered; call
/// [`ListenerHandle::dispose`] to remove it.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    id: u64,
    monitor: Weak<NetworkMonitor>,
}

impl ListenerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the listener. Returns false if it was already gone.
    pub fn dispose(self) -> bool {
        match self.monitor.upgrade() {
            Some(monitor) => monitor.remove_listener(self.id),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Classification {
    Unknown,
    Online,
    Offline,
}

enum Event {
    Connect(NetworkStatus),
    Disconnect(NetworkStatus),
    Reconnect(ReconnectInfo),
    Stable(NetworkStatus),
    TransportChange { previous: String, current: String },
}

impl Event {
    fn name(&self) -> &'static str {
        match self {
            Event::Connect(_) => "connect",
            Event::Disconnect(_) => "disconnect",
            Event::Reconnect(_) => "reconnect",
            Event::Stable(_) => "stable",
            Event::TransportChange { .. } => "transport_change",
        }
    }
}

struct MonitorInner {
    status: NetworkStatus,
    classification: Classification,
    last_processed: Option<Instant>,
    offline_since: Option<Instant>,
    last_outage: Option<Duration>,
    stabilizing: bool,
    online_transport: Option<String>,
}

pub struct NetworkMonitor {
    config: MonitorConfig,
    inner: Mutex<MonitorInner>,
    listeners: RwLock<Vec<(u64, Arc<dyn NetworkListener>)>>,
    next_listener_id: AtomicU64,

    /// Serializes event delivery; reentrant so listeners may call back in
    delivery: ReentrantMutex<()>,

    timers: TimerSet,
    me: Weak<NetworkMonitor>,
}

impl NetworkMonitor {
    pub fn new(config: MonitorConfig) -> Arc<Self> {
        info!(
            debounce_ms = config.debounce_ms,
            short_stability_ms = config.short_stability_ms,
            recovery_stability_ms = config.recovery_stability_ms,
            "Network monitor created"
        );

        Arc::new_cyclic(|me| Self {
            config,
            inner: Mutex::new(MonitorInner {
                status: NetworkStatus::default(),
                classification: Classification::Unknown,
                last_processed: None,
                offline_since: None,
                last_outage: None,
                stabilizing: false,
                online_transport: None,
            }),
            listeners: RwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            delivery: ReentrantMutex::new(()),
            timers: TimerSet::new("network-monitor"),
            me: me.clone(),
        })
    }

    pub fn add_listener(&self, listener: Arc<dyn NetworkListener>) -> ListenerHandle {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, listener));
        debug!(listener = id, "Network listener added");
        ListenerHandle {
            id,
            monitor: self.me.clone(),
        }
    }

    pub fn add_callbacks(&self, callbacks: NetworkCallbacks) -> ListenerHandle {
        self.add_listener(Arc::new(callbacks))
    }

    pub fn remove_listener(&self, id: u64) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        let removed = listeners.len() != before;
        if removed {
            debug!(listener = id, "Network listener removed");
        }
        removed
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Feeds one raw device notification. Returns false if it was debounced.
    pub fn handle_notification(&self, notification: NetworkNotification) -> bool {
        let _delivery = self.delivery.lock();
        let notification = self.normalize(notification);
        let now = Instant::now();

        let events = {
            let mut inner = self.inner.lock();

            if let Some(last) = inner.last_processed {
                let since = now.duration_since(last);
                if since < self.config.debounce() {
                    debug!(
                        since_ms = since.as_millis() as u64,
                        connected = notification.connected,
                        "Network notification debounced"
                    );
                    return false;
                }
            }
            inner.last_processed = Some(now);
            self.process(&mut inner, notification, now)
        };

        self.deliver(events);
        true
    }

    fn normalize(&self, mut notification: NetworkNotification) -> NetworkNotification {
        let transport = notification.transport_type.trim().to_ascii_lowercase();
        notification.transport_type = if notification.connected
            && self
                .config
                .ambiguous_transports
                .iter()
                .any(|ambiguous| ambiguous.eq_ignore_ascii_case(&transport))
        {
            self.config.coerced_transport.clone()
        } else {
            transport
        };
        notification
    }

    fn process(&self, inner: &mut MonitorInner, notification: NetworkNotification, now: Instant) -> Vec<Event> {
        let online = notification.connected && notification.internet_reachable.unwrap_or(notification.connected);
        let mut events = Vec::new();

        inner.status.connected = notification.connected;
        inner.status.internet_reachable = notification.internet_reachable;
        inner.status.transport_type = notification.transport_type.clone();

        match (inner.classification, online) {
            (Classification::Online, true) => {}
            (Classification::Offline, false) => {}
            (_, true) => {
                let outage = inner.offline_since.take().map(|since| now.duration_since(since));
                if outage.is_some() {
                    inner.last_outage = outage;
                }
                inner.classification = Classification::Online;
                inner.status.last_connected_at = Some(Utc::now());
                inner.stabilizing = true;

                let window = match outage {
                    Some(outage) if outage > self.config.long_outage() => self.config.recovery_stability(),
                    _ => self.config.short_stability(),
                };
                info!(
                    transport = %inner.status.transport_type,
                    outage_ms = outage.map(|o| o.as_millis() as u64),
                    stability_ms = window.as_millis() as u64,
                    "Network connected"
                );
                self.schedule_stability(window, outage);
                events.push(Event::Connect(inner.status.clone()));
            }
            (_, false) => {
                inner.classification = Classification::Offline;
                inner.status.last_disconnected_at = Some(Utc::now());
                inner.offline_since = Some(now);
                inner.stabilizing = false;
                self.timers.cancel(STABILITY_TIMER);

                info!(
                    connected = notification.connected,
                    internet_reachable = ?notification.internet_reachable,
                    "Network disconnected"
                );
                events.push(Event::Disconnect(inner.status.clone()));
            }
        }

        if online {
            let current = notification.transport_type;
            if let Some(previous) = inner.online_transport.replace(current.clone()) {
                if previous != current {
                    info!(previous = %previous, current = %current, "Network transport changed");
                    events.push(Event::TransportChange { previous, current });
                }
            }
        }

        events
    }

    fn schedule_stability(&self, window: Duration, outage: Option<Duration>) {
        let monitor = self.me.clone();
        self.timers.schedule(STABILITY_TIMER, window, async move {
            if let Some(monitor) = monitor.upgrade() {
                monitor.finish_stabilizing(outage);
            }
        });
    }

    fn finish_stabilizing(&self, outage: Option<Duration>) {
        let _delivery = self.delivery.lock();

        let (info, status) = {
            let mut inner = self.inner.lock();
            if !inner.stabilizing || inner.classification != Classification::Online {
                return;
            }
            inner.stabilizing = false;
            let info = outage.map(|offline_duration| ReconnectInfo {
                offline_duration,
                needs_refresh: offline_duration >= self.config.long_outage(),
            });
            (info, inner.status.clone())
        };

        match info {
            Some(info) => {
                info!(
                    offline_ms = info.offline_duration.as_millis() as u64,
                    needs_refresh = info.needs_refresh,
                    "Network stable after outage"
                );
                self.deliver(vec![Event::Reconnect(info)]);
            }
            None => {
                debug!("Network stable");
                self.deliver(vec![Event::Stable(status)]);
            }
        }
    }

    fn deliver(&self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        let listeners: Vec<(u64, Arc<dyn NetworkListener>)> = self.listeners.read().clone();

        for event in &events {
            for (id, listener) in &listeners {
                let outcome = catch_unwind(AssertUnwindSafe(|| match event {
                    Event::Connect(status) => listener.on_connect(status),
                    Event::Disconnect(status) => listener.on_disconnect(status),
                    Event::Reconnect(info) => listener.on_reconnect(info),
                    Event::Stable(status) => listener.on_stable(status),
                    Event::TransportChange { previous, current } => listener.on_transport_change(previous, current),
                }));
                if outcome.is_err() {
                    error!(listener = id, event = event.name(), "Network listener panicked");
                }
            }
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.lock().classification == Classification::Online
    }

    /// Online and past the stability window.
    pub fn is_stable(&self) -> bool {
        let inner = self.inner.lock();
        inner.classification == Classification::Online && !inner.stabilizing
    }

    pub fn state(&self) -> MonitorState {
        let inner = self.inner.lock();
        match inner.classification {
            Classification::Unknown => MonitorState::Unknown,
            Classification::Offline => MonitorState::Offline,
            Classification::Online if inner.stabilizing => MonitorState::StabilizingOnline,
            Classification::Online => MonitorState::Online,
        }
    }

    pub fn status(&self) -> NetworkStatus {
        self.inner.lock().status.clone()
    }

    /// Length of the current outage, or of the last one when online.
    pub fn offline_duration(&self) -> Duration {
        let inner = self.inner.lock();
        match inner.offline_since {
            Some(since) => since.elapsed(),
            None => inner.last_outage.unwrap_or(Duration::ZERO),
        }
    }

    pub fn offline_duration_ms(&self) -> u64 {
        self.offline_duration().as_millis() as u64
    }

    pub fn connection_quality(&self) -> ConnectionQuality {
        let inner = self.inner.lock();
        if inner.classification != Classification::Online {
            return ConnectionQuality::Offline;
        }
        if inner.stabilizing || inner.status.internet_reachable.is_none() {
            return ConnectionQuality::Unstable;
        }
        match inner.status.transport_type.as_str() {
            "cellular" => ConnectionQuality::Good,
            _ => ConnectionQuality::Excellent,
        }
    }

    /// Cancels pending timers and drops every listener.
    pub fn shutdown(&self) {
        self.timers.cancel_all();
        self.listeners.write().clear();
        info!("Network monitor shut down");
    }
}

impl ConnectivityGate for NetworkMonitor {
    fn is_online(&self) -> bool {
        NetworkMonitor::is_online(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        reconnects: Mutex<Vec<ReconnectInfo>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    impl NetworkListener for Recorder {
        fn on_connect(&self, _status: &NetworkStatus) {
            self.events.lock().push("connect".to_string());
        }

        fn on_disconnect(&self, _status: &NetworkStatus) {
            self.events.lock().push("disconnect".to_string());
        }

        fn on_reconnect(&self, info: &ReconnectInfo) {
            self.events.lock().push("reconnect".to_string());
            self.reconnects.lock().push(*info);
        }

        fn on_transport_change(&self, previous: &str, current: &str) {
            self.events.lock().push(format!("transport:{}->{}", previous, current));
        }
    }

    fn monitor_with_recorder() -> (Arc<NetworkMonitor>, Arc<Recorder>) {
        let monitor = NetworkMonitor::new(MonitorConfig::default());
        let recorder = Arc::new(Recorder::default());
        monitor.add_listener(recorder.clone());
        (monitor, recorder)
    }

    fn online(transport: &str) -> NetworkNotification {
        NetworkNotification::new(true, transport, Some(true))
    }

    fn offline() -> NetworkNotification {
        NetworkNotification::new(false, "none", None)
    }

    async fn wait(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_flap_then_recover_fires_one_of_each() {
        let (monitor, recorder) = monitor_with_recorder();

        assert!(monitor.handle_notification(NetworkNotification::new(false, "wifi", None)));
        wait(200).await;
        assert!(!monitor.handle_notification(NetworkNotification::new(false, "unknown", None)));
        wait(6000).await;
        assert!(monitor.handle_notification(NetworkNotification::new(true, "wifi", Some(true))));

        assert_eq!(recorder.events(), vec!["disconnect", "connect"]);
        let offline_ms = monitor.offline_duration_ms();
        assert!((6000..=6300).contains(&offline_ms), "offline for {}ms", offline_ms);
        assert!(monitor.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_inside_debounce_window_processes_once() {
        let (monitor, recorder) = monitor_with_recorder();

        let mut processed = 0;
        for i in 0..20 {
            let notification = if i % 2 == 0 { offline() } else { online("wifi") };
            if monitor.handle_notification(notification) {
                processed += 1;
            }
            wait(200).await;
        }

        assert_eq!(processed, 1);
        assert_eq!(recorder.events(), vec!["disconnect"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_short_outage() {
        let (monitor, recorder) = monitor_with_recorder();

        monitor.handle_notification(online("wifi"));
        wait(5000).await;
        monitor.handle_notification(offline());
        wait(6000).await;
        monitor.handle_notification(online("wifi"));
        assert_eq!(monitor.state(), MonitorState::StabilizingOnline);
        assert_eq!(monitor.connection_quality(), ConnectionQuality::Unstable);

        wait(1900).await;
        assert!(recorder.reconnects.lock().is_empty());
        wait(200).await;

        let reconnects = recorder.reconnects.lock().clone();
        assert_eq!(reconnects.len(), 1);
        assert!(!reconnects[0].needs_refresh);
        let outage = reconnects[0].offline_duration;
        assert!(outage >= Duration::from_secs(6) && outage < Duration::from_millis(6100));
        assert!(monitor.is_stable());
        assert_eq!(monitor.state(), MonitorState::Online);
        assert_eq!(recorder.events(), vec!["connect", "disconnect", "connect", "reconnect"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_outage_uses_recovery_window() {
        let (monitor, recorder) = monitor_with_recorder();

        monitor.handle_notification(offline());
        wait(12_000).await;
        monitor.handle_notification(online("ethernet"));

        wait(9_000).await;
        assert!(recorder.reconnects.lock().is_empty());
        wait(1_100).await;

        let reconnects = recorder.reconnects.lock().clone();
        assert_eq!(reconnects.len(), 1);
        assert!(reconnects[0].needs_refresh);
        assert_eq!(monitor.connection_quality(), ConnectionQuality::Excellent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_connect_has_no_reconnect() {
        let (monitor, recorder) = monitor_with_recorder();

        monitor.handle_notification(online("cellular"));
        wait(3000).await;

        assert_eq!(recorder.events(), vec!["connect"]);
        assert!(monitor.is_stable());
        assert_eq!(monitor.connection_quality(), ConnectionQuality::Good);
        assert_eq!(monitor.offline_duration(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_connect_reports_stable_once() {
        let monitor = NetworkMonitor::new(MonitorConfig::default());
        let stable = Arc::new(Mutex::new(Vec::new()));
        let sink = stable.clone();
        monitor.add_callbacks(
            NetworkCallbacks::new().on_stable(move |status| sink.lock().push(status.transport_type.clone())),
        );

        monitor.handle_notification(online("wifi"));
        wait(1_900).await;
        assert!(stable.lock().is_empty());

        wait(200).await;
        assert_eq!(*stable.lock(), vec!["wifi".to_string()]);

        // Recovering from an outage is a reconnect, not another stable event.
        wait(6_000).await;
        monitor.handle_notification(offline());
        wait(6_000).await;
        monitor.handle_notification(online("wifi"));
        wait(12_000).await;
        assert_eq!(stable.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_reconnect() {
        let (monitor, recorder) = monitor_with_recorder();

        monitor.handle_notification(offline());
        wait(12_000).await;
        monitor.handle_notification(online("wifi"));
        wait(6_000).await;
        // Inside the 10s recovery window
        monitor.handle_notification(offline());
        wait(5_000).await;

        assert!(recorder.reconnects.lock().is_empty());
        assert_eq!(recorder.events(), vec!["disconnect", "connect", "disconnect"]);
        assert_eq!(monitor.state(), MonitorState::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ambiguous_transport_is_coerced() {
        let (monitor, _recorder) = monitor_with_recorder();

        monitor.handle_notification(NetworkNotification::new(true, "unknown", Some(true)));
        assert_eq!(monitor.status().transport_type, "wifi");
        assert!(monitor.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_without_internet_is_offline() {
        let (monitor, recorder) = monitor_with_recorder();

        monitor.handle_notification(NetworkNotification::new(true, "wifi", Some(false)));
        assert!(!monitor.is_online());
        assert_eq!(monitor.state(), MonitorState::Offline);
        assert!(monitor.status().last_disconnected_at.is_some());
        assert_eq!(recorder.events(), vec!["disconnect"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_change_is_reported() {
        let (monitor, recorder) = monitor_with_recorder();

        monitor.handle_notification(online("wifi"));
        wait(5000).await;
        monitor.handle_notification(online("cellular"));

        assert_eq!(recorder.events(), vec!["connect", "transport:wifi->cellular"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_listener_does_not_block_others() {
        let monitor = NetworkMonitor::new(MonitorConfig::default());
        monitor.add_callbacks(NetworkCallbacks::new().on_disconnect(|_| panic!("listener bug")));
        let recorder = Arc::new(Recorder::default());
        monitor.add_listener(recorder.clone());

        monitor.handle_notification(offline());
        assert_eq!(recorder.events(), vec!["disconnect"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disposed_listener_stops_receiving() {
        let (monitor, recorder) = monitor_with_recorder();
        let other = Arc::new(Recorder::default());
        let handle = monitor.add_listener(other.clone());
        assert_eq!(monitor.listener_count(), 2);

        assert!(handle.clone().dispose());
        assert!(!handle.dispose());

        monitor.handle_notification(offline());
        assert_eq!(recorder.events(), vec!["disconnect"]);
        assert!(other.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_clears_timers_and_listeners() {
        let (monitor, recorder) = monitor_with_recorder();

        monitor.handle_notification(offline());
        wait(6000).await;
        monitor.handle_notification(online("wifi"));
        monitor.shutdown();
        wait(3000).await;

        assert_eq!(monitor.listener_count(), 0);
        assert!(recorder.reconnects.lock().is_empty());
    }
}

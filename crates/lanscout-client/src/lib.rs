//! # lanscout client
//!
//! Connection-resilience components that sit between the device and the
//! backend:
//!
//! - [`NetworkMonitor`]: debounced connectivity state machine with stability
//!   windows, delivering `connect`/`disconnect`/`reconnect` events to
//!   isolated listeners.
//! - [`UpdateChannel`]: heartbeat-supervised connection to the backend's
//!   update feed with capped exponential backoff, flapping suppression, and a
//!   bounded priority queue feeding filtered subscriptions.
//!
//! Both components own a [`TimerSet`](lanscout_core::TimerSet); their
//! `shutdown` cancels every pending timer.

pub mod channel;
pub mod error;
pub mod monitor;
pub mod queue;
pub mod state;
pub mod transport;

pub use channel::{UpdateCallback, UpdateChannel};
pub use error::{ChannelError, Result};
pub use monitor::{
    ConnectionQuality, ListenerHandle, MonitorState, NetworkCallbacks, NetworkListener, NetworkMonitor,
    ReconnectInfo,
};
pub use queue::{QueuedUpdate, UpdateFilter, UpdatePriority, UpdateQueue};
pub use state::{ChannelSnapshot, ChannelState, ChannelStatus, ReconnectPolicy};
pub use transport::{ChannelTransport, HttpChannelTransport};

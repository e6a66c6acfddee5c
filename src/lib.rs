//! # lanscout
//!
//! Service discovery and connection resilience for a device on an
//! unmanaged local network. [`App`] assembles the layer:
//!
//! - a discovery engine that locates each logical service by probing
//!   priority hosts and sweeping the local /24,
//! - an endpoint registry that resolves every service once and keeps URLs
//!   stable across refreshes,
//! - a network monitor that debounces device notifications and decides when
//!   a reconnect is stable,
//! - an update channel with heartbeat supervision and capped backoff,
//! - an offline queue replayed once connectivity returns.
//!
//! ```no_run
//! use lanscout::App;
//! use lanscout_core::{AppConfig, NetworkNotification, ServiceKind};
//!
//! # async fn example() -> lanscout::Result<()> {
//! let app = App::from_config(AppConfig::default()).await?;
//! app.start().await;
//!
//! if let Some(url) = app.get_endpoint(ServiceKind::Backend) {
//!     println!("backend at {}", url);
//! }
//!
//! app.handle_network_change(NetworkNotification::new(false, "wifi", Some(false)));
//! app.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod error;

pub use app::{App, AppBuilder, ForceSyncReport};
pub use error::{AppError, Result};

pub use lanscout_client as client;
pub use lanscout_discovery as discovery;
pub use lanscout_offline as offline;

//! # lanscout core
//!
//! Shared building blocks for the lanscout service-discovery and
//! connection-resilience layer:
//!
//! - **Types**: logical services (`ServiceKind`), resolved endpoints
//!   (`ServiceEndpoint`), probe results, network status, and the small seam
//!   traits (`ConnectivityGate`, `EndpointSource`) other crates depend on.
//! - **Errors**: configuration and storage failures. Reachability problems are
//!   never errors; they are reported through typed results.
//! - **Configuration**: YAML files, `LANSCOUT__*` environment overrides, and
//!   per-service override URLs.
//! - **Timers**: named, cancelable timers so component teardown is one call.
//! - **Storage**: a key-value store abstraction with memory and crash-safe
//!   file backends, plus a typed TTL cache.
//!
//! ## Example
//!
//! ```
//! use lanscout_core::config::AppConfig;
//! use lanscout_core::types::ServiceKind;
//!
//! let mut config = AppConfig::default();
//! config.apply_overrides_from(|var| {
//!     (var == "LANSCOUT_BACKEND_URL").then(|| "http://10.0.0.7:3001".to_string())
//! });
//!
//! let backend = config.services.get(ServiceKind::Backend);
//! assert_eq!(backend.override_url.as_deref(), Some("http://10.0.0.7:3001"));
//! ```

pub mod config;
pub mod error;
pub mod store;
pub mod timer;
pub mod types;

// Re-export commonly used types for convenience
pub use config::AppConfig;
pub use error::{ConfigError, LanscoutError, Result, StoreError};
pub use store::{FileStore, KeyValueStore, MemoryStore, TtlCache};
pub use timer::TimerSet;
pub use types::{
    ConnectivityGate, DiscoveryResult, EndpointOrigin, EndpointSource, NetworkNotification,
    NetworkStatus, ServiceEndpoint, ServiceKind,
};

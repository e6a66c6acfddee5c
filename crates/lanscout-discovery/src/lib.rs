//! # lanscout discovery
//!
//! Locates logical backend services on a LAN whose layout is not known in
//! advance, and keeps one stable endpoint per service for the rest of the
//! application.
//!
//! ## Components
//!
//! - [`Prober`] / [`HttpProber`]: one bounded-time HTTP reachability check.
//! - [`DiscoveryEngine`]: single-flight scan over loopback, gateway and the
//!   device's /24, with a per-service result cache.
//! - [`EndpointRegistry`]: override/discovery/fallback resolution, a shared
//!   in-flight initialization, rate-limited refresh and URL stabilization.
//!
//! ## Example
//!
//! ```no_run
//! use lanscout_core::config::AppConfig;
//! use lanscout_core::types::ServiceKind;
//! use lanscout_discovery::{DiscoveryEngine, EndpointRegistry, HttpProber};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! let prober = Arc::new(HttpProber::new()?);
//! let engine = DiscoveryEngine::new(config.discovery.clone(), config.services.clone(), prober)?;
//! let registry = Arc::new(EndpointRegistry::new(
//!     config.services.clone(),
//!     config.registry.clone(),
//!     Arc::new(engine),
//! ));
//!
//! registry.initialize().await;
//! if let Some(url) = registry.get_endpoint(ServiceKind::Backend) {
//!     println!("backend at {}", url);
//! }
//! # Ok(())
//! # }
//! ```

pub mod candidates;
pub mod error;
pub mod probe;
pub mod registry;
pub mod service;

pub use candidates::{build_plan, detect_local_ipv4, CandidatePlan};
pub use error::{DiscoveryError, Result};
pub use probe::{health_body_ready, HttpProber, ProbeTarget, Prober};
pub use registry::{EndpointRegistry, RefreshOutcome, Resolution, SkipReason};
pub use service::{DiscoveryEngine, DiscoveryOutcome, DiscoveryStats};

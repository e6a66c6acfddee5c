//! # lanscout offline
//!
//! Durable queue of mutating actions recorded while the device is offline,
//! replayed against the backend once connectivity is stable.
//!
//! ```no_run
//! use lanscout_core::config::OfflineConfig;
//! use lanscout_core::store::MemoryStore;
//! use lanscout_core::types::ConnectivityGate;
//! use lanscout_offline::{ActionExecutor, OfflineAction, OfflineQueue};
//! use std::sync::Arc;
//!
//! # async fn example(executor: Arc<dyn ActionExecutor>, gate: Arc<dyn ConnectivityGate>) {
//! let queue = OfflineQueue::new(OfflineConfig::default(), Arc::new(MemoryStore::new()), executor, gate);
//! queue.enqueue(OfflineAction::new("price_report", serde_json::json!({"price": 42}))).await.ok();
//! let report = queue.sync().await;
//! println!("{} actions still pending", report.remaining);
//! # }
//! ```

pub mod error;
pub mod executor;
pub mod queue;

pub use error::{QueueError, Result};
pub use executor::{ActionExecutor, HttpActionExecutor};
pub use queue::{OfflineAction, OfflineQueue, SyncReport, SyncSkip};

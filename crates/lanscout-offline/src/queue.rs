//! Durable queue of mutating actions taken while offline.
//!
//! Every mutation is written to the persistent store before it counts as
//! committed. [`OfflineQueue::sync`] replays pending actions in order once the
//! device is online; an action is removed after it succeeds or after it has
//! failed `max_retries` times.

use crate::error::{QueueError, Result};
use crate::executor::ActionExecutor;
use chrono::{DateTime, Utc};
use lanscout_core::config::OfflineConfig;
use lanscout_core::store::KeyValueStore;
use lanscout_core::types::ConnectivityGate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One pending action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineAction {
    pub id: String,

    #[serde(rename = "type")]
    pub action_type: String,

    pub payload: Value,

    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub retry_count: u32,
}

impl OfflineAction {
    pub fn new(action_type: impl Into<String>, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action_type: action_type.into(),
            payload,
            timestamp: Utc::now(),
            retry_count: 0,
        }
    }
}

/// Why a sync did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncSkip {
    Offline,
    AlreadySyncing,
}

/// What one sync cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub skipped: Option<SyncSkip>,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Dropped after exhausting their retries
    pub discarded: usize,
    pub remaining: usize,
    /// False when the resulting queue could not be written back
    pub persisted: bool,
}

impl SyncReport {
    fn skipped(reason: SyncSkip, remaining: usize) -> Self {
        Self {
            skipped: Some(reason),
            remaining,
            persisted: true,
            ..Default::default()
        }
    }

    pub fn ran(&self) -> bool {
        self.skipped.is_none()
    }
}

struct SyncGuard<'a>(&'a AtomicBool);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct OfflineQueue {
    config: OfflineConfig,
    store: Arc<dyn KeyValueStore>,
    executor: Arc<dyn ActionExecutor>,
    gate: Arc<dyn ConnectivityGate>,
    actions: Mutex<Vec<OfflineAction>>,
    syncing: AtomicBool,

    /// In-memory state differs from the store after a failed write
    dirty: AtomicBool,
}

impl OfflineQueue {
    pub fn new(
        config: OfflineConfig,
        store: Arc<dyn KeyValueStore>,
        executor: Arc<dyn ActionExecutor>,
        gate: Arc<dyn ConnectivityGate>,
    ) -> Self {
        Self {
            config,
            store,
            executor,
            gate,
            actions: Mutex::new(Vec::new()),
            syncing: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
        }
    }

    /// Restores actions persisted by a previous run. Returns how many.
    pub async fn load(&self) -> Result<usize> {
        let raw = self.store.get(&self.config.storage_key).await?;
        let restored: Vec<OfflineAction> = match raw {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| QueueError::Corrupt(e.to_string()))?,
            None => Vec::new(),
        };

        let count = restored.len();
        *self.actions.lock().await = restored;
        self.dirty.store(false, Ordering::SeqCst);
        info!(count, "Offline queue loaded");
        Ok(count)
    }

    /// Adds an action. It is only queued once the store accepted it.
    pub async fn enqueue(&self, action: OfflineAction) -> Result<String> {
        let mut actions = self.actions.lock().await;
        let id = action.id.clone();
        actions.push(action);

        if let Err(e) = self.persist(&actions).await {
            actions.pop();
            warn!(action = %id, error = %e, "Failed to persist offline action");
            return Err(e);
        }

        debug!(action = %id, pending = actions.len(), "Offline action queued");
        Ok(id)
    }

    pub async fn pending(&self) -> Vec<OfflineAction> {
        self.actions.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.actions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.actions.lock().await.is_empty()
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Replays pending actions in order. Does nothing while offline or when
    /// a sync is already running.
    pub async fn sync(&self) -> SyncReport {
        if !self.gate.is_online() {
            debug!("Offline, sync skipped");
            return SyncReport::skipped(SyncSkip::Offline, self.len().await);
        }
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Sync already running");
            return SyncReport::skipped(SyncSkip::AlreadySyncing, self.len().await);
        }
        let _syncing = SyncGuard(&self.syncing);

        let batch = self.pending().await;
        let mut report = SyncReport::default();
        let mut succeeded = HashSet::new();
        let mut failed = HashSet::new();

        for action in &batch {
            if !self.gate.is_online() {
                info!(remaining = batch.len() - report.attempted, "Went offline during sync");
                break;
            }
            report.attempted += 1;
            match self.executor.execute(action).await {
                Ok(()) => {
                    succeeded.insert(action.id.clone());
                }
                Err(e) => {
                    warn!(action = %action.id, retry_count = action.retry_count, error = %e, "Offline action failed");
                    failed.insert(action.id.clone());
                }
            }
        }

        let mut actions = self.actions.lock().await;
        let max_retries = self.config.max_retries;
        let mut discarded = 0;
        actions.retain_mut(|action| {
            if succeeded.contains(&action.id) {
                return false;
            }
            if failed.contains(&action.id) {
                action.retry_count += 1;
                if action.retry_count >= max_retries {
                    warn!(action = %action.id, action_type = %action.action_type, "Discarding offline action after retries");
                    discarded += 1;
                    return false;
                }
            }
            true
        });

        report.succeeded = succeeded.len();
        report.failed = failed.len();
        report.discarded = discarded;
        report.remaining = actions.len();
        report.persisted = match self.persist(&actions).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to persist offline queue after sync, will retry");
                false
            }
        };

        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            discarded = report.discarded,
            remaining = report.remaining,
            "Offline sync finished"
        );
        report
    }

    /// Writes the queue to the store; on failure the queue is marked dirty
    /// so the next successful write catches the store up.
    async fn persist(&self, actions: &[OfflineAction]) -> Result<()> {
        let raw = serde_json::to_string(actions).map_err(|e| QueueError::Serialization(e.to_string()))?;
        match self.store.set(&self.config.storage_key, raw, None).await {
            Ok(()) => {
                if self.dirty.swap(false, Ordering::SeqCst) {
                    info!("Offline queue re-persisted");
                }
                Ok(())
            }
            Err(e) => {
                self.dirty.store(true, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    /// True when the store is behind the in-memory queue.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lanscout_core::store::{FileStore, MemoryStore};
    use lanscout_core::StoreError;
    use parking_lot::Mutex as SyncMutex;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    struct Gate(AtomicBool);

    impl Gate {
        fn new(online: bool) -> Arc<Self> {
            Arc::new(Self(AtomicBool::new(online)))
        }
    }

    impl ConnectivityGate for Gate {
        fn is_online(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// Fails actions whose type is listed, succeeds the rest.
    #[derive(Default)]
    struct ScriptedExecutor {
        failing: SyncMutex<HashSet<String>>,
        calls: SyncMutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn failing(types: &[&str]) -> Arc<Self> {
            let executor = Self::default();
            executor.failing.lock().extend(types.iter().map(|t| t.to_string()));
            Arc::new(executor)
        }
    }

    #[async_trait]
    impl ActionExecutor for ScriptedExecutor {
        async fn execute(&self, action: &OfflineAction) -> Result<()> {
            self.calls.lock().push(action.action_type.clone());
            if self.failing.lock().contains(&action.action_type) {
                Err(QueueError::execution(&action.id, "rejected"))
            } else {
                Ok(())
            }
        }
    }

    /// Memory store whose writes can be switched off.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        broken: AtomicBool,
    }

    #[async_trait]
    impl KeyValueStore for FlakyStore {
        async fn get(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> std::result::Result<(), StoreError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(StoreError::io(key, "disk full"));
            }
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> std::result::Result<(), StoreError> {
            self.inner.delete(key).await
        }
    }

    fn queue(store: Arc<dyn KeyValueStore>, executor: Arc<ScriptedExecutor>, online: bool) -> OfflineQueue {
        OfflineQueue::new(OfflineConfig::default(), store, executor, Gate::new(online))
    }

    async fn persisted(store: &dyn KeyValueStore) -> Vec<OfflineAction> {
        let raw = store.get("offline_queue").await.unwrap().unwrap_or_else(|| "[]".to_string());
        serde_json::from_str(&raw).unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_persists_before_commit() {
        let store = Arc::new(MemoryStore::new());
        let queue = queue(store.clone(), ScriptedExecutor::failing(&[]), false);

        let id = queue.enqueue(OfflineAction::new("price_report", json!({"price": 42}))).await.unwrap();

        let stored = persisted(store.as_ref()).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, id);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_enqueue_rolls_back_when_store_fails() {
        let store = Arc::new(FlakyStore::default());
        store.broken.store(true, Ordering::SeqCst);
        let queue = queue(store.clone(), ScriptedExecutor::failing(&[]), true);

        let err = queue.enqueue(OfflineAction::new("price_report", json!({}))).await.unwrap_err();
        assert!(matches!(err, QueueError::Store(_)));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_sync_skips_when_offline() {
        let executor = ScriptedExecutor::failing(&[]);
        let queue = queue(Arc::new(MemoryStore::new()), executor.clone(), false);
        queue.enqueue(OfflineAction::new("a", json!({}))).await.unwrap();

        let report = queue.sync().await;
        assert_eq!(report.skipped, Some(SyncSkip::Offline));
        assert_eq!(report.remaining, 1);
        assert!(executor.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_sync_replays_in_order_and_removes_successes() {
        let store = Arc::new(MemoryStore::new());
        let executor = ScriptedExecutor::failing(&[]);
        let queue = queue(store.clone(), executor.clone(), true);
        for kind in ["first", "second", "third"] {
            queue.enqueue(OfflineAction::new(kind, json!({}))).await.unwrap();
        }

        let report = queue.sync().await;
        assert!(report.ran());
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.remaining, 0);
        assert_eq!(*executor.calls.lock(), vec!["first", "second", "third"]);
        assert!(persisted(store.as_ref()).await.is_empty());
        assert!(!queue.is_syncing());
    }

    #[tokio::test]
    async fn test_failed_action_dropped_after_three_attempts() {
        let store = Arc::new(MemoryStore::new());
        let queue = queue(store.clone(), ScriptedExecutor::failing(&["bad"]), true);
        queue.enqueue(OfflineAction::new("bad", json!({}))).await.unwrap();
        queue.enqueue(OfflineAction::new("good", json!({}))).await.unwrap();

        let first = queue.sync().await;
        assert_eq!((first.succeeded, first.failed, first.remaining), (1, 1, 1));
        assert_eq!(queue.pending().await[0].retry_count, 1);
        assert_eq!(persisted(store.as_ref()).await[0].retry_count, 1);

        queue.sync().await;
        let third = queue.sync().await;
        assert_eq!(third.discarded, 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_persist_failure_during_sync_is_retried() {
        let store = Arc::new(FlakyStore::default());
        let queue = queue(store.clone(), ScriptedExecutor::failing(&["bad"]), true);
        queue.enqueue(OfflineAction::new("bad", json!({}))).await.unwrap();

        store.broken.store(true, Ordering::SeqCst);
        let report = queue.sync().await;
        assert!(!report.persisted);
        assert!(queue.is_dirty());
        assert_eq!(queue.len().await, 1);
        assert_eq!(persisted(store.as_ref()).await[0].retry_count, 0);

        store.broken.store(false, Ordering::SeqCst);
        let report = queue.sync().await;
        assert!(report.persisted);
        assert!(!queue.is_dirty());
        assert_eq!(persisted(store.as_ref()).await[0].retry_count, 2);
    }

    #[tokio::test]
    async fn test_queue_survives_restart_with_file_store() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = Arc::new(FileStore::open(dir.path()).await.unwrap());
            let queue = queue(store, ScriptedExecutor::failing(&[]), false);
            queue.enqueue(OfflineAction::new("price_report", json!({"price": 1}))).await.unwrap();
            queue.enqueue(OfflineAction::new("price_report", json!({"price": 2}))).await.unwrap();
        }

        let store = Arc::new(FileStore::open(dir.path()).await.unwrap());
        let executor = ScriptedExecutor::failing(&[]);
        let queue = queue(store, executor.clone(), true);
        assert_eq!(queue.load().await.unwrap(), 2);

        let report = queue.sync().await;
        assert_eq!(report.succeeded, 2);
        assert_eq!(executor.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_load_rejects_corrupt_queue() {
        let store = Arc::new(MemoryStore::new());
        store.set("offline_queue", "{not json".to_string(), None).await.unwrap();
        let queue = queue(store, ScriptedExecutor::failing(&[]), true);

        assert!(matches!(queue.load().await, Err(QueueError::Corrupt(_))));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_action_wire_format() {
        let action = OfflineAction::new("price_report", json!({"price": 3}));
        let value: HashMap<String, Value> = serde_json::from_str(&serde_json::to_string(&action).unwrap()).unwrap();
        assert_eq!(value["type"], "price_report");
        assert_eq!(value["retry_count"], 0);
    }
}

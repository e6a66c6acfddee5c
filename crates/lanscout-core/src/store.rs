//! Persistent key-value storage used by the offline queue and the discovery
//! result cache.
//!
//! Stores are durable across restarts (for [`FileStore`]) but not
//! transactional: each `set` replaces one key atomically and nothing more.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, warn};

type StoreResult<T> = std::result::Result<T, StoreError>;

/// Minimal key-value store contract.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the value, or `None` if absent or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Writes the value. It is committed once this returns `Ok`.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()>;

    /// Removes the key. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

/// Volatile in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, (String, Option<Instant>)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let expired = match self.entries.get(key) {
            Some(entry) => match entry.1 {
                Some(deadline) if Instant::now() >= deadline => true,
                _ => return Ok(Some(entry.0.clone())),
            },
            None => return Ok(None),
        };

        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()> {
        let deadline = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(key.to_string(), (value, deadline));
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct FileEnvelope {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

/// Crash-safe store keeping one JSON file per key.
///
/// Writes go to a temporary file that is synced and then renamed over the
/// target, so a crash leaves either the old or the new value.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (and creates if needed) a store rooted at `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(dir.display().to_string(), e))?;
        debug!(dir = %dir.display(), "File store opened");
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> StoreResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(StoreError::InvalidKey { key: key.to_string() });
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let path = self.path_for(key)?;
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(key, e)),
        };

        let envelope: FileEnvelope = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(key, error = %e, "Discarding unreadable store entry");
                let _ = tokio::fs::remove_file(&path).await;
                return Ok(None);
            }
        };

        if let Some(expires_at) = envelope.expires_at {
            if Utc::now() >= expires_at {
                let _ = tokio::fs::remove_file(&path).await;
                return Ok(None);
            }
        }
        Ok(Some(envelope.value))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()> {
        let path = self.path_for(key)?;
        let expires_at = match ttl {
            Some(ttl) => {
                let ttl = chrono::Duration::from_std(ttl).map_err(|e| StoreError::serialization(key, e))?;
                Some(Utc::now() + ttl)
            }
            None => None,
        };
        let body = serde_json::to_vec(&FileEnvelope { value, expires_at })
            .map_err(|e| StoreError::serialization(key, e))?;

        let tmp = path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| StoreError::io(key, e))?;
        file.write_all(&body).await.map_err(|e| StoreError::io(key, e))?;
        file.sync_all().await.map_err(|e| StoreError::io(key, e))?;
        drop(file);

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::io(key, e))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }
}

/// Typed JSON cache with a fixed time-to-live on top of any store.
pub struct TtlCache<T> {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
    ttl: Duration,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TtlCache<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            ttl,
            _marker: PhantomData,
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}.{}", self.prefix, key)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached value. Undecodable entries are treated as misses.
    pub async fn get(&self, key: &str) -> StoreResult<Option<T>> {
        let key = self.key(key);
        match self.store.get(&key).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    warn!(key, error = %e, "Ignoring undecodable cache entry");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    pub async fn set(&self, key: &str, value: &T) -> StoreResult<()> {
        let key = self.key(key);
        let raw = serde_json::to_string(value).map_err(|e| StoreError::serialization(&key, e))?;
        self.store.set(&key, raw, Some(self.ttl)).await
    }

    pub async fn invalidate(&self, key: &str) -> StoreResult<()> {
        self.store.delete(&self.key(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_ttl() {
        let store = MemoryStore::new();
        store.set("a", "1".to_string(), Some(Duration::from_secs(10))).await.unwrap();
        store.set("b", "2".to_string(), None).await.unwrap();

        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("2"));

        store.delete("b").await.unwrap();
        store.delete("b").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();

        let store = FileStore::open(dir.path()).await.unwrap();
        store.set("offline_queue", "[1,2,3]".to_string(), None).await.unwrap();
        drop(store);

        let reopened = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.get("offline_queue").await.unwrap().as_deref(), Some("[1,2,3]"));
        assert!(!dir.path().join("offline_queue.json.tmp").exists());

        reopened.delete("offline_queue").await.unwrap();
        assert_eq!(reopened.get("offline_queue").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_expired_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        store.set("short", "x".to_string(), Some(Duration::ZERO)).await.unwrap();
        assert_eq!(store.get("short").await.unwrap(), None);
        assert!(!dir.path().join("short.json").exists());
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        let err = store.set("../escape", "x".to_string(), None).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn test_file_store_corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();

        let store = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(store.get("broken").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_cache_typed_round_trip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Hit {
            url: String,
        }

        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let cache: TtlCache<Hit> = TtlCache::new(Arc::clone(&store), "discovery", Duration::from_secs(300));

        let hit = Hit {
            url: "http://192.168.1.42:3001".to_string(),
        };
        cache.set("backend", &hit).await.unwrap();
        assert_eq!(cache.get("backend").await.unwrap(), Some(hit));
        assert!(store.get("discovery.backend").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(cache.get("backend").await.unwrap(), None);
    }
}

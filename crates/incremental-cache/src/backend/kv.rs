//! Durable key-value backend.
//!
//! Backed by Spin's Key-Value Store on `wasm32`, and by [`MemoryStore`]
//! everywhere (tests, native hosts). Spin's store has no native expiry, so
//! each record carries its absolute expiry in front of the entry bytes:
//!
//! ```text
//! [expires_at: i64 big-endian, 8 bytes][encoded entry]
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{expires_at, BackendKind, BackendResult, CacheBackend};
use crate::clock::{Clock, SystemClock};
#[cfg(target_arch = "wasm32")]
use crate::error::BackendError;

const EXPIRY_HEADER_LEN: usize = 8;

/// Synchronous key-value store underneath [`DurableKvBackend`].
pub trait KeyValueStore: Send + Sync {
    /// Get a value, `None` if the key doesn't exist.
    fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>>;

    /// Set a value.
    fn set(&self, key: &str, value: &[u8]) -> BackendResult<()>;

    /// Delete a value.
    fn delete(&self, key: &str) -> BackendResult<()>;
}

/// In-memory key-value store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of raw records, expired ones included.
    pub fn len(&self) -> usize {
        self.map().len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        Ok(self.map().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> BackendResult<()> {
        self.map().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> BackendResult<()> {
        self.map().remove(key);
        Ok(())
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> BackendResult<()> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> BackendResult<()> {
        (**self).delete(key)
    }
}

/// Spin Key-Value Store.
///
/// The store is opened per operation, so the handle never has to cross
/// task boundaries.
#[cfg(target_arch = "wasm32")]
#[derive(Debug, Clone)]
pub struct SpinStore {
    label: Option<String>,
}

#[cfg(target_arch = "wasm32")]
impl SpinStore {
    /// Open the default store.
    pub fn open_default() -> BackendResult<Self> {
        spin_sdk::key_value::Store::open_default()
            .map_err(|e| BackendError::Open(e.to_string()))?;
        Ok(Self { label: None })
    }

    /// Open a named store.
    pub fn open(label: &str) -> BackendResult<Self> {
        spin_sdk::key_value::Store::open(label).map_err(|e| BackendError::Open(e.to_string()))?;
        Ok(Self {
            label: Some(label.to_string()),
        })
    }

    fn store(&self) -> BackendResult<spin_sdk::key_value::Store> {
        match &self.label {
            Some(label) => spin_sdk::key_value::Store::open(label),
            None => spin_sdk::key_value::Store::open_default(),
        }
        .map_err(|e| BackendError::Unavailable(e.to_string()))
    }
}

#[cfg(target_arch = "wasm32")]
impl KeyValueStore for SpinStore {
    fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        self.store()?
            .get(key)
            .map_err(|e| BackendError::Unavailable(e.to_string()))
    }

    fn set(&self, key: &str, value: &[u8]) -> BackendResult<()> {
        self.store()?
            .set(key, value)
            .map_err(|e| BackendError::Unavailable(e.to_string()))
    }

    fn delete(&self, key: &str) -> BackendResult<()> {
        self.store()?
            .delete(key)
            .map_err(|e| BackendError::Unavailable(e.to_string()))
    }
}

/// Cache backend over a key-value namespace shared by all nodes.
pub struct DurableKvBackend<S = MemoryStore> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl DurableKvBackend<MemoryStore> {
    /// Backend over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }
}

#[cfg(target_arch = "wasm32")]
impl DurableKvBackend<SpinStore> {
    /// Backend over Spin's default Key-Value Store.
    pub fn open_default() -> BackendResult<Self> {
        Ok(Self::new(SpinStore::open_default()?))
    }

    /// Backend over a named Spin Key-Value Store.
    pub fn open(label: &str) -> BackendResult<Self> {
        Ok(Self::new(SpinStore::open(label)?))
    }
}

impl<S: KeyValueStore> DurableKvBackend<S> {
    /// Backend over `store` on the system clock.
    pub fn new(store: S) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Backend over `store` on the given clock.
    pub fn with_clock(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

#[async_trait]
impl<S: KeyValueStore> CacheBackend for DurableKvBackend<S> {
    fn kind(&self) -> BackendKind {
        BackendKind::Durable
    }

    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        let Some(record) = self.store.get(key)? else {
            return Ok(None);
        };

        let Some((header, body)) = record.split_first_chunk::<EXPIRY_HEADER_LEN>() else {
            tracing::warn!(key, "dropping truncated record");
            return Ok(None);
        };

        if i64::from_be_bytes(*header) <= self.clock.now_ms() {
            // Lazy expiry; the next put overwrites it anyway.
            if let Err(err) = self.store.delete(key) {
                tracing::debug!(key, error = %err, "failed to purge expired record");
            }
            return Ok(None);
        }

        Ok(Some(body.to_vec()))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, expire_after: u64) -> BackendResult<()> {
        let deadline = expires_at(self.clock.now_ms(), expire_after);
        let mut record = Vec::with_capacity(EXPIRY_HEADER_LEN + bytes.len());
        record.extend_from_slice(&deadline.to_be_bytes());
        record.extend_from_slice(&bytes);
        self.store.set(key, &record)
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        self.store.delete(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::BackendError;

    fn backend() -> (Arc<ManualClock>, DurableKvBackend<Arc<MemoryStore>>, Arc<MemoryStore>) {
        let clock = Arc::new(ManualClock::new(5_000_000));
        let store = Arc::new(MemoryStore::new());
        let backend = DurableKvBackend::with_clock(store.clone(), clock.clone());
        (clock, backend, store)
    }

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> BackendResult<Option<Vec<u8>>> {
            Err(BackendError::Unavailable("store offline".to_string()))
        }

        fn set(&self, _key: &str, _value: &[u8]) -> BackendResult<()> {
            Err(BackendError::Unavailable("store offline".to_string()))
        }

        fn delete(&self, _key: &str) -> BackendResult<()> {
            Err(BackendError::Unavailable("store offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_round_trip_strips_expiry_header() {
        let (_, backend, store) = backend();
        backend.put("k", b"entry".to_vec(), 60).await.unwrap();

        assert_eq!(backend.get("k").await.unwrap(), Some(b"entry".to_vec()));
        assert_eq!(store.get("k").unwrap().unwrap().len(), 8 + 5);
    }

    #[tokio::test]
    async fn test_expired_records_are_absent_and_purged() {
        let (clock, backend, store) = backend();
        backend.put("k", b"entry".to_vec(), 60).await.unwrap();

        clock.advance_secs(60);
        assert_eq!(backend.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_record_reads_as_absent() {
        let (_, backend, store) = backend();
        store.set("k", b"abc").unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_shared_store_is_visible_to_every_node() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryStore::new());
        let node_a = DurableKvBackend::with_clock(store.clone(), clock.clone());
        let node_b = DurableKvBackend::with_clock(store, clock);

        node_a.put("k", b"v".to_vec(), 10).await.unwrap();
        assert_eq!(node_b.get("k").await.unwrap(), Some(b"v".to_vec()));

        node_b.delete("k").await.unwrap();
        assert_eq!(node_a.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_failures_surface_as_unavailable() {
        let backend = DurableKvBackend::new(BrokenStore);
        assert!(matches!(
            backend.get("k").await,
            Err(BackendError::Unavailable(_))
        ));
        assert!(backend.put("k", vec![], 1).await.is_err());
    }

    #[tokio::test]
    async fn test_default_try_lock_uses_store() {
        let (_, backend, _) = backend();
        let ttl = std::time::Duration::from_secs(30);
        assert!(backend.try_lock("lock", ttl).await.unwrap());
        assert!(!backend.try_lock("lock", ttl).await.unwrap());
        backend.unlock("lock").await.unwrap();
        assert!(backend.try_lock("lock", ttl).await.unwrap());
    }
}

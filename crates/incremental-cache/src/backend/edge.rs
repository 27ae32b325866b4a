//! Edge-local backend: a cache private to this node.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{expires_at, BackendKind, BackendResult, CacheBackend, LOCK_MARKER};
use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
struct Slot {
    bytes: Vec<u8>,
    expires_at: i64,
}

/// In-process cache private to the serving node.
///
/// Nothing written here is visible to other nodes; pair it with the
/// invalidation protocol ([`Broadcaster`](crate::Broadcaster)) to converge.
pub struct EdgeLocalBackend {
    slots: Mutex<HashMap<String, Slot>>,
    clock: Arc<dyn Clock>,
}

impl EdgeLocalBackend {
    /// Create an empty backend on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty backend on the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of live (unexpired) keys, markers included.
    pub fn len(&self) -> usize {
        let now = self.clock.now_ms();
        self.slots()
            .values()
            .filter(|slot| slot.expires_at > now)
            .count()
    }

    /// Whether no live keys are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EdgeLocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EdgeLocalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeLocalBackend")
            .field("keys", &self.slots().len())
            .finish()
    }
}

#[async_trait]
impl CacheBackend for EdgeLocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::EdgeLocal
    }

    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        let now = self.clock.now_ms();
        let mut slots = self.slots();
        let expired = match slots.get(key) {
            Some(slot) if slot.expires_at > now => return Ok(Some(slot.bytes.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            slots.remove(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, expire_after: u64) -> BackendResult<()> {
        let now = self.clock.now_ms();
        let mut slots = self.slots();
        // Expired slots of keys that are never read again go here.
        slots.retain(|_, slot| slot.expires_at > now);
        slots.insert(
            key.to_string(),
            Slot {
                bytes,
                expires_at: expires_at(now, expire_after),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        self.slots().remove(key);
        Ok(())
    }

    // Check-and-set under one lock so two tasks on this node cannot both win.
    async fn try_lock(&self, key: &str, ttl: Duration) -> BackendResult<bool> {
        let now = self.clock.now_ms();
        let mut slots = self.slots();
        if slots.get(key).is_some_and(|slot| slot.expires_at > now) {
            return Ok(false);
        }
        slots.insert(
            key.to_string(),
            Slot {
                bytes: LOCK_MARKER.to_vec(),
                expires_at: expires_at(now, ttl.as_secs().max(1)),
            },
        );
        Ok(true)
    }
}

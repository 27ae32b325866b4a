//! Storage backends for encoded cache entries.
//!
//! Two strategies share one capability set:
//! - [`DurableKvBackend`] - a key-value namespace visible to every node
//! - [`EdgeLocalBackend`] - storage private to the serving node

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::clock::secs_to_ms;
use crate::error::BackendError;

mod edge;
mod kv;

pub use edge::*;
pub use kv::*;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Bytes stored under a race-guard key.
const LOCK_MARKER: &[u8] = b"1";

/// Which storage strategy a backend implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Shared key-value store; writes become visible to all nodes.
    Durable,
    /// Per-node cache; needs the invalidation protocol to converge.
    EdgeLocal,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Durable => write!(f, "durable"),
            Self::EdgeLocal => write!(f, "edge-local"),
        }
    }
}

/// Raw storage for encoded entries, keyed by namespaced key.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Storage strategy of this backend.
    fn kind(&self) -> BackendKind;

    /// Get the bytes stored under `key`, if present and not expired.
    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>>;

    /// Store `bytes` under `key`, expiring after `expire_after` seconds.
    async fn put(&self, key: &str, bytes: Vec<u8>, expire_after: u64) -> BackendResult<()>;

    /// Remove `key`.
    async fn delete(&self, key: &str) -> BackendResult<()>;

    /// Set a transient in-flight marker under `key`.
    ///
    /// Returns `false` if a live marker already exists.
    async fn try_lock(&self, key: &str, ttl: Duration) -> BackendResult<bool> {
        if self.get(key).await?.is_some() {
            return Ok(false);
        }
        self.put(key, LOCK_MARKER.to_vec(), ttl.as_secs().max(1))
            .await?;
        Ok(true)
    }

    /// Clear a marker set by [`CacheBackend::try_lock`].
    async fn unlock(&self, key: &str) -> BackendResult<()> {
        self.delete(key).await
    }
}

/// Absolute expiry (ms since epoch) of a write at `now_ms`.
pub(crate) fn expires_at(now_ms: i64, expire_after: u64) -> i64 {
    now_ms.saturating_add(secs_to_ms(expire_after))
}

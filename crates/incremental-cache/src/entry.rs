//! Cache entry model and its storage codec.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::clock::secs_to_ms;
use crate::error::{CacheError, CacheResult};

/// A stored cache entry.
///
/// Entries are written whole and never mutated in place: a revalidation
/// produces a brand-new entry with a fresh `last_modified`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<V = serde_json::Value> {
    /// Namespaced storage key.
    pub key: String,
    /// The produced value.
    pub value: V,
    /// Seconds the value is fully fresh.
    pub ttl: u64,
    /// Seconds past `ttl` during which the value may be served stale.
    pub swr: u64,
    /// Write time, ms since epoch.
    pub last_modified: i64,
}

impl<V> CacheEntry<V> {
    /// Total lifetime (`ttl + swr`) in seconds.
    pub fn max_age(&self) -> u64 {
        self.ttl.saturating_add(self.swr)
    }

    /// Age of the entry at `now_ms`, in milliseconds.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.last_modified)
    }

    /// Milliseconds after `last_modified` at which the entry stops being fresh.
    pub(crate) fn ttl_ms(&self) -> i64 {
        secs_to_ms(self.ttl)
    }

    /// Milliseconds after `last_modified` at which the entry expires.
    pub(crate) fn max_age_ms(&self) -> i64 {
        secs_to_ms(self.max_age())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EntryRef<'a, V> {
    key: &'a str,
    value: &'a V,
    ttl: u64,
    swr: u64,
    last_modified: i64,
}

/// Encode an entry, stamping `last_modified` with `now_ms`.
pub fn encode<V: Serialize>(
    key: &str,
    value: &V,
    ttl: u64,
    swr: u64,
    now_ms: i64,
) -> CacheResult<Vec<u8>> {
    let entry = EntryRef {
        key,
        value,
        ttl,
        swr,
        last_modified: now_ms,
    };
    Ok(serde_json::to_vec(&entry)?)
}

/// Decode stored bytes.
///
/// Any malformed input, including a value that no longer matches `V`, is a
/// [`CacheError::CorruptEntry`] and should be treated as a cache miss.
pub fn decode<V: DeserializeOwned>(bytes: &[u8]) -> CacheResult<CacheEntry<V>> {
    serde_json::from_slice(bytes).map_err(|e| CacheError::CorruptEntry(e.to_string()))
}

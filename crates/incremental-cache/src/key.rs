//! Cache key namespacing.

use serde::{Deserialize, Serialize};

/// Prefix under which every cache entry is stored.
pub const ENTRY_NAMESPACE: &str = "https://INCREMENTAL_CACHE.local/entry/";

/// Prefix under which revalidation race-guard markers are stored.
pub const LOCK_NAMESPACE: &str = "https://INCREMENTAL_CACHE.local/lock/";

/// A caller-supplied cache key.
///
/// The caller key is never used against a backend directly; backends only
/// ever see [`CacheKey::storage_key`] or [`CacheKey::lock_key`], so cache
/// entries cannot collide with unrelated data in a shared store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey {
    key: String,
}

impl CacheKey {
    /// Create a cache key from the caller's key.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// The caller's key, without namespace.
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Namespaced key used to store the entry.
    pub fn storage_key(&self) -> String {
        format!("{}{}", ENTRY_NAMESPACE, self.key)
    }

    /// Namespaced key of the in-flight revalidation marker.
    pub fn lock_key(&self) -> String {
        format!("{}{}", LOCK_NAMESPACE, self.key)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_is_namespaced() {
        let key = CacheKey::new("hello");
        assert_eq!(
            key.storage_key(),
            "https://INCREMENTAL_CACHE.local/entry/hello"
        );
        assert_eq!(key.as_str(), "hello");
    }

    #[test]
    fn test_lock_key_differs_from_storage_key() {
        let key = CacheKey::new("hello");
        assert_ne!(key.lock_key(), key.storage_key());
        assert!(key.lock_key().starts_with(LOCK_NAMESPACE));
    }

    #[test]
    fn test_entry_and_lock_namespaces_never_overlap() {
        // A caller key that mimics the lock prefix still lands in the entry namespace.
        let sneaky = CacheKey::new("../lock/hello");
        assert!(sneaky.storage_key().starts_with(ENTRY_NAMESPACE));
        assert_ne!(sneaky.storage_key(), CacheKey::new("hello").lock_key());
    }

    #[test]
    fn test_display_shows_caller_key() {
        let key = CacheKey::from("products:42");
        assert_eq!(key.to_string(), "products:42");
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let key = CacheKey::from(String::from("k"));
        assert_eq!(serde_json::to_string(&key).unwrap(), r#""k""#);
    }
}

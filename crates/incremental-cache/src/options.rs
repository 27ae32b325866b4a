//! Caller options for a cached lookup and their validation.

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;
use crate::error::{CacheError, CacheResult};
use crate::key::CacheKey;

/// One year in seconds: the upper bound of `ttl` and of `ttl + swr`.
pub const ONE_YEAR_SECS: u64 = 31_536_000;

/// Options for a single cached operation.
///
/// `ttl` and `swr` are signed so that negative caller input is rejected
/// by [`CacheOptions::validate`] instead of being unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOptions {
    /// Caller key (namespaced before reaching a backend).
    pub key: String,
    /// Seconds the value is fully fresh.
    pub ttl: i64,
    /// Stale-while-revalidate window; defaults to `ONE_YEAR_SECS - ttl`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swr: Option<i64>,
    /// Force a backend instead of the runtime default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_override: Option<BackendKind>,
    /// Broadcast edge-local writes to other nodes; defaults to the runtime config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribute: Option<bool>,
}

impl CacheOptions {
    /// Create options for `key` with the given `ttl` in seconds.
    pub fn new(key: impl Into<String>, ttl: i64) -> Self {
        Self {
            key: key.into(),
            ttl,
            swr: None,
            backend_override: None,
            distribute: None,
        }
    }

    /// Set the stale-while-revalidate window in seconds.
    pub fn with_swr(mut self, swr: i64) -> Self {
        self.swr = Some(swr);
        self
    }

    /// Force a specific backend.
    pub fn with_backend(mut self, kind: BackendKind) -> Self {
        self.backend_override = Some(kind);
        self
    }

    /// Enable or disable cross-node distribution for edge-local writes.
    pub fn with_distribute(mut self, distribute: bool) -> Self {
        self.distribute = Some(distribute);
        self
    }

    /// The namespaced cache key.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.key.clone())
    }

    /// Validate ttl/swr and resolve the swr default.
    pub fn validate(&self) -> CacheResult<CachePolicy> {
        CachePolicy::resolve(self.ttl, self.swr)
    }
}

/// A validated freshness policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Seconds the value is fully fresh.
    pub ttl: u64,
    /// Seconds past `ttl` the value may be served stale.
    pub swr: u64,
}

impl CachePolicy {
    /// Validate a requested ttl/swr pair.
    pub fn resolve(ttl: i64, swr: Option<i64>) -> CacheResult<Self> {
        if ttl < 0 || swr.unwrap_or(0) < 0 {
            return Err(CacheError::Configuration(
                "ttl or swr must be greater or equal to 0".to_string(),
            ));
        }
        let ttl = ttl as u64;
        if ttl > ONE_YEAR_SECS {
            return Err(CacheError::Configuration(format!(
                "ttl must be less or equal to 1 year ({} seconds), got {}",
                ONE_YEAR_SECS, ttl
            )));
        }

        let swr = swr.map(|s| s as u64).unwrap_or(ONE_YEAR_SECS - ttl);
        if ttl.saturating_add(swr) > ONE_YEAR_SECS {
            return Err(CacheError::Configuration(format!(
                "ttl + swr must be less or equal to 1 year ({} seconds), got {}",
                ONE_YEAR_SECS,
                ttl.saturating_add(swr)
            )));
        }

        Ok(Self { ttl, swr })
    }

    /// Total lifetime (`ttl + swr`) in seconds.
    pub fn max_age(&self) -> u64 {
        self.ttl + self.swr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swr_defaults_to_rest_of_year() {
        let policy = CacheOptions::new("k", 20).validate().unwrap();
        assert_eq!(policy.ttl, 20);
        assert_eq!(policy.swr, ONE_YEAR_SECS - 20);
        assert_eq!(policy.max_age(), ONE_YEAR_SECS);
    }

    #[test]
    fn test_explicit_swr() {
        let policy = CacheOptions::new("k", 20).with_swr(3600).validate().unwrap();
        assert_eq!(policy, CachePolicy { ttl: 20, swr: 3600 });
    }

    #[test]
    fn test_ttl_over_one_year_rejected() {
        let err = CacheOptions::new("k", 40_000_000).validate().unwrap_err();
        assert!(matches!(err, CacheError::Configuration(_)));
    }

    #[test]
    fn test_negative_values_rejected() {
        assert!(matches!(
            CacheOptions::new("k", -1).validate(),
            Err(CacheError::Configuration(_))
        ));
        assert!(matches!(
            CacheOptions::new("k", 1).with_swr(-1).validate(),
            Err(CacheError::Configuration(_))
        ));
    }

    #[test]
    fn test_sum_over_one_year_rejected() {
        let err = CacheOptions::new("k", 100)
            .with_swr(ONE_YEAR_SECS as i64)
            .validate()
            .unwrap_err();
        assert!(matches!(err, CacheError::Configuration(_)));
    }

    #[test]
    fn test_boundaries_accepted() {
        assert!(CacheOptions::new("k", 0).with_swr(0).validate().is_ok());
        assert!(CacheOptions::new("k", ONE_YEAR_SECS as i64).validate().is_ok());
        assert!(CacheOptions::new("k", 1)
            .with_swr(ONE_YEAR_SECS as i64 - 1)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_builder_setters() {
        let options = CacheOptions::new("k", 5)
            .with_backend(BackendKind::EdgeLocal)
            .with_distribute(false);
        assert_eq!(options.backend_override, Some(BackendKind::EdgeLocal));
        assert_eq!(options.distribute, Some(false));
        assert_eq!(options.cache_key().storage_key(), CacheKey::new("k").storage_key());
    }
}

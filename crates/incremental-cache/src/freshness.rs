//! Freshness classification.

use serde::{Deserialize, Serialize};

use crate::entry::CacheEntry;
use crate::options::CachePolicy;

/// Freshness of a stored entry relative to the caller's requested policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    /// Within `ttl`; serve as-is.
    Fresh,
    /// Past `ttl` but inside the SWR window; serve and revalidate in the background.
    Stale,
    /// Past `ttl + swr`, or stored under a different policy; recompute synchronously.
    Expired,
    /// Nothing stored for the key.
    Absent,
}

impl std::fmt::Display for Freshness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fresh => write!(f, "FRESH"),
            Self::Stale => write!(f, "STALE"),
            Self::Expired => write!(f, "EXPIRED"),
            Self::Absent => write!(f, "ABSENT"),
        }
    }
}

/// Classify `entry` against the requested policy at `now_ms`.
///
/// An entry stored with a different `ttl` or `swr` is always `Expired`,
/// whatever its age.
pub fn classify<V>(entry: Option<&CacheEntry<V>>, policy: CachePolicy, now_ms: i64) -> Freshness {
    let Some(entry) = entry else {
        return Freshness::Absent;
    };

    if entry.ttl != policy.ttl || entry.swr != policy.swr {
        return Freshness::Expired;
    }

    let age_ms = entry.age_ms(now_ms);
    if age_ms >= entry.max_age_ms() {
        Freshness::Expired
    } else if age_ms >= entry.ttl_ms() {
        Freshness::Stale
    } else {
        Freshness::Fresh
    }
}

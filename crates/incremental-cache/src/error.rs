//! Error types for the incremental cache.

use thiserror::Error;

/// Result type for facade-level cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced by the incremental cache.
///
/// Only `Configuration` and `Producer` normally reach the caller of
/// [`CacheRuntime::cached`](crate::CacheRuntime::cached); the rest are
/// recovered locally and logged.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Invalid ttl/swr combination or backend selection.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Stored bytes are not a well-formed cache entry.
    #[error("corrupt cache entry: {0}")]
    CorruptEntry(String),

    /// Storage I/O failed.
    #[error(transparent)]
    BackendUnavailable(#[from] BackendError),

    /// Invalidation message could not be delivered.
    #[error(transparent)]
    Broadcast(#[from] BroadcastError),

    /// Value could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The wrapped producer failed.
    #[error("producer failed: {0}")]
    Producer(#[source] anyhow::Error),
}

/// Storage failures reported by a [`CacheBackend`](crate::CacheBackend).
#[derive(Error, Debug)]
pub enum BackendError {
    /// Failed to open the underlying store.
    #[error("failed to open store: {0}")]
    Open(String),

    /// A get/put/delete against the store failed.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Failures delivering a [`DistributeMessage`](crate::DistributeMessage).
#[derive(Error, Debug)]
pub enum BroadcastError {
    /// The request could not be sent.
    #[error("broadcast request failed: {0}")]
    Request(String),

    /// The administration endpoint answered with an error status.
    #[error("HTTP error: {status} for {url}")]
    Http { status: u16, url: String },

    /// The message could not be encoded.
    #[error("failed to encode broadcast message: {0}")]
    Serialize(#[from] serde_json::Error),
}

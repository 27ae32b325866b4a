//! Incremental stale-while-revalidate cache for edge workloads.
//!
//! Wraps an async value-producing operation so repeated calls with the same
//! key are served from storage. Each entry carries a `ttl` (fresh window)
//! and an `swr` (stale-while-revalidate window):
//!
//! - fresh entries are returned as-is
//! - stale entries are returned immediately while a refresh runs deferred
//! - expired or missing entries are produced synchronously
//!
//! Entries live in a [`DurableKvBackend`] shared by every node, or in an
//! [`EdgeLocalBackend`] private to one node. Edge-local writes and
//! invalidations can be fanned out to other nodes through a [`Broadcaster`];
//! receiving nodes apply them with [`AdminHandler`].
//!
//! # Example
//!
//! ```rust,ignore
//! use incremental_cache::prelude::*;
//!
//! let runtime = Arc::new(CacheRuntime::builder().build());
//!
//! let rendered: String = runtime
//!     .cached(
//!         || async { Ok(render_time().await) },
//!         CacheOptions::new("hello", 20).with_swr(3600),
//!     )
//!     .await?;
//!
//! // After the response is written:
//! runtime.flush().await;
//! ```

mod admin;
mod backend;
mod cache;
mod clock;
mod config;
mod distribute;
mod entry;
mod error;
mod freshness;
mod key;
mod options;
mod runtime;
mod scheduler;

pub use admin::{AdminHandler, AdminResponse};
#[cfg(target_arch = "wasm32")]
pub use backend::SpinStore;
pub use backend::{
    BackendKind, BackendResult, CacheBackend, DurableKvBackend, EdgeLocalBackend, KeyValueStore,
    MemoryStore,
};
pub use cache::{Cached, CachedFn, CacheStatus, InvalidationStrategy, Producer};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{resolve_base_url, CacheConfig, LogFormat, DEFAULT_UPDATE_ROUTE};
pub use distribute::{Broadcaster, DistributeAction, DistributeMessage, HttpBroadcaster};
pub use entry::{decode, encode, CacheEntry};
pub use error::{BackendError, BroadcastError, CacheError, CacheResult};
pub use freshness::{classify, Freshness};
pub use key::{CacheKey, ENTRY_NAMESPACE, LOCK_NAMESPACE};
pub use options::{CacheOptions, CachePolicy, ONE_YEAR_SECS};
pub use runtime::{CacheRuntime, CacheRuntimeBuilder};
pub use scheduler::{DeferredTask, Deferral, ExecutionContext, FlushReport, Scheduler};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        CacheError, CacheOptions, CacheResult, CacheRuntime, CacheStatus, Cached, Deferral,
        InvalidationStrategy,
    };
    pub use std::sync::Arc;
}

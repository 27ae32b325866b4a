//! Incremental cache facade.
//!
//! ```rust,ignore
//! let runtime = Arc::new(CacheRuntime::builder().build());
//!
//! let time = runtime
//!     .cached(
//!         || async { Ok(render_clock().await) },
//!         CacheOptions::new("hello", 20).with_swr(3600),
//!     )
//!     .await?;
//! ```

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::backend::{BackendKind, CacheBackend};
use crate::clock::Clock;
use crate::distribute::{broadcast_best_effort, Broadcaster, DistributeMessage};
use crate::entry::{self, CacheEntry};
use crate::error::{CacheError, CacheResult};
use crate::freshness::{classify, Freshness};
use crate::key::CacheKey;
use crate::options::{CacheOptions, CachePolicy};
use crate::runtime::CacheRuntime;
use crate::scheduler::Deferral;

/// A value-producing operation wrapped by the cache.
pub type Producer<T> = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

/// How a facade call was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Fresh cache hit.
    Hit,
    /// Stale hit (serving while revalidating).
    Stale,
    /// Nothing cached; produced synchronously.
    Miss,
    /// Cached entry expired or had a different policy; produced synchronously.
    Expired,
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hit => write!(f, "HIT"),
            Self::Stale => write!(f, "STALE"),
            Self::Miss => write!(f, "MISS"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// A value together with how it was served.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    /// The returned value.
    pub value: T,
    /// Cache status of the call.
    pub status: CacheStatus,
}

/// Scope of an invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationStrategy {
    /// Delete on this node's backend only.
    Local,
    /// Also broadcast a DELETE to other nodes.
    Global,
}

impl FromStr for InvalidationStrategy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "global" => Ok(Self::Global),
            other => Err(CacheError::Configuration(format!(
                "unknown invalidation strategy: {}",
                other
            ))),
        }
    }
}

/// Everything resolved from [`CacheOptions`] before touching storage.
#[derive(Clone)]
struct Plan {
    key: CacheKey,
    policy: CachePolicy,
    backend: Arc<dyn CacheBackend>,
    broadcaster: Option<Arc<dyn Broadcaster>>,
}

impl Plan {
    fn pending_key(&self) -> String {
        format!("{}|{}", self.backend.kind(), self.key.storage_key())
    }
}

/// A write of a produced value, detached from the runtime so it can run
/// as deferred work.
#[derive(Clone)]
struct WriteBack {
    plan: Plan,
    clock: Arc<dyn Clock>,
    lock_ttl: Duration,
}

/// Encoded entry and the broadcast that accompanies it.
struct PreparedWrite {
    bytes: Vec<u8>,
    message: Option<DistributeMessage>,
}

impl WriteBack {
    fn prepare<T: Serialize>(&self, value: &T) -> CacheResult<PreparedWrite> {
        let policy = self.plan.policy;
        let bytes = entry::encode(
            &self.plan.key.storage_key(),
            value,
            policy.ttl,
            policy.swr,
            self.clock.now_ms(),
        )?;
        let message = match self.plan.broadcaster {
            Some(_) => Some(DistributeMessage::Put {
                key: self.plan.key.as_str().to_string(),
                value: serde_json::to_value(value)?,
                ttl: policy.ttl,
                swr: policy.swr,
            }),
            None => None,
        };
        Ok(PreparedWrite { bytes, message })
    }

    async fn commit(&self, prepared: PreparedWrite) -> CacheResult<()> {
        let backend = &self.plan.backend;
        backend
            .put(
                &self.plan.key.storage_key(),
                prepared.bytes,
                self.plan.policy.max_age(),
            )
            .await?;
        tracing::debug!(key = %self.plan.key, backend = %backend.kind(), "stored cache entry");

        if let (Some(broadcaster), Some(message)) = (&self.plan.broadcaster, &prepared.message) {
            broadcast_best_effort(broadcaster.as_ref(), message).await;
        }
        Ok(())
    }

    /// Produce a fresh value and store it.
    ///
    /// When the write is broadcast, an in-flight marker guards against a
    /// second revalidation of the same key on this node.
    async fn revalidate<T>(self, producer: Producer<T>) -> CacheResult<()>
    where
        T: Serialize + Send + 'static,
    {
        let guarded = self.plan.broadcaster.is_some();
        let lock_key = self.plan.key.lock_key();
        if guarded && !self.plan.backend.try_lock(&lock_key, self.lock_ttl).await? {
            tracing::debug!(key = %self.plan.key, "revalidation already in flight, skipping");
            return Ok(());
        }

        let result = self.produce_and_store(&producer).await;
        if guarded {
            if let Err(err) = self.plan.backend.unlock(&lock_key).await {
                tracing::warn!(key = %self.plan.key, error = %err, "failed to clear revalidation marker");
            }
        }
        if result.is_ok() {
            tracing::debug!(key = %self.plan.key, "revalidated");
        }
        result
    }

    async fn produce_and_store<T>(&self, producer: &Producer<T>) -> CacheResult<()>
    where
        T: Serialize + Send + 'static,
    {
        let value = producer().await.map_err(CacheError::Producer)?;
        let prepared = self.prepare(&value)?;
        self.commit(prepared).await
    }
}

impl CacheRuntime {
    /// Return a cached or freshly produced value for `options.key`.
    ///
    /// - ABSENT / EXPIRED: `producer` runs now; its value is stored and returned.
    /// - STALE: the stored value is returned and a refresh is deferred.
    /// - FRESH: the stored value is returned.
    ///
    /// Invalid ttl/swr fail with [`CacheError::Configuration`] before
    /// `producer` is called. Producer failures on the synchronous path are
    /// returned as [`CacheError::Producer`]. Storage and broadcast failures
    /// are logged and never fail the call.
    pub async fn cached<T, F, Fut>(&self, producer: F, options: CacheOptions) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Ok(self.cached_with_status(producer, options).await?.value)
    }

    /// Like [`CacheRuntime::cached`], also reporting the [`CacheStatus`].
    pub async fn cached_with_status<T, F, Fut>(
        &self,
        producer: F,
        options: CacheOptions,
    ) -> CacheResult<Cached<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let plan = self.plan(&options)?;
        self.run(&plan, &into_producer(producer)).await
    }

    /// Wrap `producer` once, validating `options` eagerly.
    pub fn incremental_cache<T, F, Fut>(
        self: &Arc<Self>,
        producer: F,
        options: CacheOptions,
    ) -> CacheResult<CachedFn<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let plan = self.plan(&options)?;
        Ok(CachedFn {
            runtime: Arc::clone(self),
            producer: into_producer(producer),
            plan,
        })
    }

    /// Delete `key` from the default backend.
    pub async fn invalidate(&self, key: &str, strategy: InvalidationStrategy) -> CacheResult<()> {
        self.invalidate_on(key, strategy, None).await
    }

    /// Delete `key` from the selected backend.
    ///
    /// `Global` additionally broadcasts a DELETE when the backend is
    /// edge-local and a broadcaster is configured.
    pub async fn invalidate_on(
        &self,
        key: &str,
        strategy: InvalidationStrategy,
        backend_override: Option<BackendKind>,
    ) -> CacheResult<()> {
        let key = CacheKey::new(key);
        let backend = self.select_backend(backend_override)?;
        backend.delete(&key.storage_key()).await?;
        tracing::info!(key = %key, backend = %backend.kind(), strategy = ?strategy, "invalidated cache entry");

        if strategy == InvalidationStrategy::Global {
            if let Some(broadcaster) = self.broadcaster_for(backend.as_ref(), Some(true)) {
                let message = DistributeMessage::Delete {
                    key: key.as_str().to_string(),
                };
                broadcast_best_effort(broadcaster.as_ref(), &message).await;
            }
        }
        Ok(())
    }

    fn plan(&self, options: &CacheOptions) -> CacheResult<Plan> {
        let policy = options.validate()?;
        let backend = self.select_backend(options.backend_override)?;
        let broadcaster = self.broadcaster_for(backend.as_ref(), options.distribute);
        Ok(Plan {
            key: options.cache_key(),
            policy,
            backend,
            broadcaster,
        })
    }

    fn write_back(&self, plan: &Plan) -> WriteBack {
        WriteBack {
            plan: plan.clone(),
            clock: Arc::clone(self.clock()),
            lock_ttl: self.config().lock_ttl(),
        }
    }

    async fn run<T>(&self, plan: &Plan, producer: &Producer<T>) -> CacheResult<Cached<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let entry = self.load::<T>(plan).await;
        let freshness = classify(entry.as_ref(), plan.policy, self.clock().now_ms());

        match (freshness, entry) {
            (Freshness::Fresh, Some(entry)) => {
                tracing::debug!(key = %plan.key, "cache hit");
                Ok(Cached {
                    value: entry.value,
                    status: CacheStatus::Hit,
                })
            }
            (Freshness::Stale, Some(entry)) => {
                tracing::debug!(key = %plan.key, "serving stale entry");
                self.defer_revalidation(plan, producer).await;
                Ok(Cached {
                    value: entry.value,
                    status: CacheStatus::Stale,
                })
            }
            (freshness, _) => {
                let status = match freshness {
                    Freshness::Absent => CacheStatus::Miss,
                    _ => CacheStatus::Expired,
                };
                tracing::debug!(key = %plan.key, status = %status, "producing value");

                let value = producer().await.map_err(CacheError::Producer)?;
                let write_back = self.write_back(plan);
                let stored = match write_back.prepare(&value) {
                    Ok(prepared) => write_back.commit(prepared).await,
                    Err(err) => Err(err),
                };
                if let Err(err) = stored {
                    tracing::warn!(key = %plan.key, error = %err, "failed to store produced value");
                }
                Ok(Cached { value, status })
            }
        }
    }

    async fn load<T: DeserializeOwned>(&self, plan: &Plan) -> Option<CacheEntry<T>> {
        match plan.backend.get(&plan.key.storage_key()).await {
            Ok(Some(bytes)) => match entry::decode(&bytes) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    tracing::warn!(key = %plan.key, error = %err, "discarding unreadable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(key = %plan.key, error = %err, "cache read failed, treating as miss");
                None
            }
        }
    }

    async fn defer_revalidation<T>(&self, plan: &Plan, producer: &Producer<T>)
    where
        T: Serialize + Send + 'static,
    {
        let task = Box::pin(self.write_back(plan).revalidate(Arc::clone(producer)));
        if !self.scheduler().schedule_revalidation(&plan.pending_key(), task) {
            return;
        }

        match self.deferral() {
            Deferral::Inline => {
                self.flush().await;
            }
            Deferral::Host(context) => {
                let scheduler = Arc::clone(self.scheduler());
                context.wait_until(Box::pin(async move {
                    scheduler.flush().await;
                }));
            }
            Deferral::Manual => {}
        }
    }
}

/// A producer bound to fixed cache options.
pub struct CachedFn<T> {
    runtime: Arc<CacheRuntime>,
    producer: Producer<T>,
    plan: Plan,
}

impl<T> CachedFn<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    /// Run one cached lookup.
    pub async fn call(&self) -> CacheResult<T> {
        Ok(self.call_with_status().await?.value)
    }

    /// Run one cached lookup, reporting the [`CacheStatus`].
    pub async fn call_with_status(&self) -> CacheResult<Cached<T>> {
        self.runtime.run(&self.plan, &self.producer).await
    }

    /// The key this function caches under.
    pub fn key(&self) -> &CacheKey {
        &self.plan.key
    }

    /// The validated freshness policy.
    pub fn policy(&self) -> CachePolicy {
        self.plan.policy
    }
}

fn into_producer<T, F, Fut>(producer: F) -> Producer<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Arc::new(move || -> BoxFuture<'static, anyhow::Result<T>> { Box::pin(producer()) })
}

//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use incremental_cache::{
    AdminHandler, BackendError, BackendKind, BackendResult, BroadcastError, Broadcaster,
    CacheBackend, CacheRuntime, Deferral, DistributeMessage, ExecutionContext, ManualClock,
};

/// Start of every test timeline, in ms since epoch.
pub const T0: i64 = 1_700_000_000_000;

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(T0))
}

/// Edge-local runtime with the given deferral and no broadcaster.
pub fn runtime(clock: &Arc<ManualClock>, deferral: Deferral) -> Arc<CacheRuntime> {
    Arc::new(
        CacheRuntime::builder()
            .clock(clock.clone())
            .deferral(deferral)
            .build(),
    )
}

/// A producer that counts its invocations and returns `"v{n}"`.
#[derive(Clone, Default)]
pub struct Counter {
    calls: Arc<AtomicUsize>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn producer(
        &self,
    ) -> impl Fn() -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync + 'static {
        let calls = self.calls.clone();
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move { Ok(format!("v{}", n)) })
        }
    }

    /// Succeeds on the first call, fails on every later one.
    pub fn failing_after_first(
        &self,
    ) -> impl Fn() -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync + 'static {
        let calls = self.calls.clone();
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move {
                if n == 1 {
                    Ok("v1".to_string())
                } else {
                    Err(anyhow::anyhow!("origin unavailable"))
                }
            })
        }
    }
}

/// Host hook that records handed-over work instead of running it.
#[derive(Default)]
pub struct RecordingContext {
    tasks: Mutex<Vec<BoxFuture<'static, ()>>>,
}

impl RecordingContext {
    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Run everything handed over so far.
    pub async fn drain(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
        futures::future::join_all(tasks).await;
    }
}

impl ExecutionContext for RecordingContext {
    fn wait_until(&self, task: BoxFuture<'static, ()>) {
        self.tasks.lock().unwrap().push(task);
    }
}

/// Records every message and optionally delivers it to a peer node.
#[derive(Default)]
pub struct Loopback {
    sent: Mutex<Vec<DistributeMessage>>,
    peer: Option<AdminHandler>,
    fail: bool,
}

impl Loopback {
    pub fn to(peer: AdminHandler) -> Self {
        Self {
            peer: Some(peer),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<DistributeMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Broadcaster for Loopback {
    async fn broadcast(&self, message: &DistributeMessage) -> Result<(), BroadcastError> {
        self.sent.lock().unwrap().push(message.clone());
        if self.fail {
            return Err(BroadcastError::Request("connection refused".to_string()));
        }
        if let Some(peer) = &self.peer {
            peer.apply(message)
                .await
                .map_err(|e| BroadcastError::Request(e.to_string()))?;
        }
        Ok(())
    }
}

/// A backend whose every operation fails.
pub struct BrokenBackend;

#[async_trait]
impl CacheBackend for BrokenBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Durable
    }

    async fn get(&self, _key: &str) -> BackendResult<Option<Vec<u8>>> {
        Err(BackendError::Unavailable("store offline".to_string()))
    }

    async fn put(&self, _key: &str, _bytes: Vec<u8>, _expire_after: u64) -> BackendResult<()> {
        Err(BackendError::Unavailable("store offline".to_string()))
    }

    async fn delete(&self, _key: &str) -> BackendResult<()> {
        Err(BackendError::Unavailable("store offline".to_string()))
    }
}

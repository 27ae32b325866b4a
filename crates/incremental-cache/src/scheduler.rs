//! Deferred write-back scheduling.
//!
//! The scheduler decouples "decide the value to return now" from "make
//! storage reflect the refreshed value". Work is queued with
//! [`Scheduler::schedule`] and drained by [`Scheduler::flush`], which the
//! host calls once per execution unit (ideally after the response is sent).

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{join_all, BoxFuture};

use crate::error::CacheResult;

/// A unit of deferred work.
pub type DeferredTask = BoxFuture<'static, CacheResult<()>>;

/// Host capability to run work after the primary response is produced.
pub trait ExecutionContext: Send + Sync {
    /// Keep the execution unit alive until `task` completes.
    fn wait_until(&self, task: BoxFuture<'static, ()>);
}

/// How the facade gets deferred work to run.
#[derive(Clone, Default)]
pub enum Deferral {
    /// No host hook: flush inline before the facade call returns.
    #[default]
    Inline,
    /// Hand a flush to the host's wait-until capability.
    Host(Arc<dyn ExecutionContext>),
    /// Leave work queued; the host calls [`Scheduler::flush`] itself.
    Manual,
}

impl std::fmt::Debug for Deferral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inline => write!(f, "Inline"),
            Self::Host(_) => write!(f, "Host"),
            Self::Manual => write!(f, "Manual"),
        }
    }
}

/// Outcome of a [`Scheduler::flush`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Tasks that completed successfully.
    pub completed: usize,
    /// Tasks that failed (logged, not retried).
    pub failed: usize,
}

impl FlushReport {
    /// Total number of tasks drained.
    pub fn total(&self) -> usize {
        self.completed + self.failed
    }
}

struct Scheduled {
    label: String,
    task: DeferredTask,
}

type PendingSet = Arc<Mutex<HashSet<String>>>;

/// Collects deferred tasks and deduplicates revalidations per key.
#[derive(Default)]
pub struct Scheduler {
    tasks: Mutex<Vec<Scheduled>>,
    pending: PendingSet,
}

impl Scheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a task for the next flush.
    pub fn schedule(&self, label: impl Into<String>, task: DeferredTask) {
        let label = label.into();
        tracing::trace!(task = %label, "scheduled deferred task");
        lock(&self.tasks).push(Scheduled { label, task });
    }

    /// Queue a revalidation for `key` unless one is already in flight.
    ///
    /// Returns `false` when the key already has pending work; the caller
    /// should serve its stale value and rely on that work. The pending
    /// marker is cleared when the task finishes or is dropped unrun.
    pub fn schedule_revalidation(&self, key: &str, task: DeferredTask) -> bool {
        if !lock(&self.pending).insert(key.to_string()) {
            tracing::debug!(key, "revalidation already pending");
            return false;
        }

        let guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            key: key.to_string(),
        };
        self.schedule(
            format!("revalidate {}", key),
            Box::pin(async move {
                let _guard = guard;
                task.await
            }),
        );
        true
    }

    /// Whether a revalidation for `key` is in flight.
    pub fn is_pending(&self, key: &str) -> bool {
        lock(&self.pending).contains(key)
    }

    /// Number of in-flight revalidations.
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        lock(&self.tasks).len()
    }

    /// Whether no tasks are queued.
    pub fn is_empty(&self) -> bool {
        lock(&self.tasks).is_empty()
    }

    /// Run every queued task to completion and clear the queue.
    ///
    /// Failures are logged and swallowed. Flushing an empty queue is a no-op.
    pub async fn flush(&self) -> FlushReport {
        let scheduled = std::mem::take(&mut *lock(&self.tasks));
        if scheduled.is_empty() {
            return FlushReport::default();
        }

        tracing::debug!(tasks = scheduled.len(), "running background tasks");
        let (labels, tasks): (Vec<_>, Vec<_>) = scheduled
            .into_iter()
            .map(|s| (s.label, s.task))
            .unzip();

        let mut report = FlushReport::default();
        for (label, result) in labels.into_iter().zip(join_all(tasks).await) {
            match result {
                Ok(()) => report.completed += 1,
                Err(err) => {
                    tracing::error!(task = %label, error = %err, "background task failed");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.len())
            .field("pending", &self.pending_count())
            .finish()
    }
}

struct PendingGuard {
    pending: PendingSet,
    key: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.key);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_task(counter: &Arc<AtomicUsize>) -> DeferredTask {
        let counter = Arc::clone(counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_flush_runs_and_clears() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.schedule("a", counting_task(&counter));
        scheduler.schedule("b", counting_task(&counter));
        assert_eq!(scheduler.len(), 2);

        let report = scheduler.flush().await;
        assert_eq!(report, FlushReport { completed: 2, failed: 0 });
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_flush_empty_is_noop() {
        let scheduler = Scheduler::new();
        assert_eq!(scheduler.flush().await, FlushReport::default());
        assert_eq!(scheduler.flush().await.total(), 0);
    }

    #[tokio::test]
    async fn test_flush_swallows_failures() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.schedule(
            "boom",
            Box::pin(async { Err(CacheError::Producer(anyhow::anyhow!("boom"))) }),
        );
        scheduler.schedule("ok", counting_task(&counter));

        let report = scheduler.flush().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_revalidation_is_deduplicated_per_key() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        assert!(scheduler.schedule_revalidation("k", counting_task(&counter)));
        assert!(!scheduler.schedule_revalidation("k", counting_task(&counter)));
        assert!(scheduler.schedule_revalidation("other", counting_task(&counter)));
        assert!(scheduler.is_pending("k"));
        assert_eq!(scheduler.pending_count(), 2);

        scheduler.flush().await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(!scheduler.is_pending("k"));

        // Once complete, a new revalidation may be scheduled.
        assert!(scheduler.schedule_revalidation("k", counting_task(&counter)));
    }

    #[tokio::test]
    async fn test_failed_revalidation_clears_pending() {
        let scheduler = Scheduler::new();
        scheduler.schedule_revalidation(
            "k",
            Box::pin(async { Err(CacheError::Producer(anyhow::anyhow!("down"))) }),
        );
        scheduler.flush().await;
        assert!(!scheduler.is_pending("k"));
    }

    #[test]
    fn test_dropped_revalidation_clears_pending() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.schedule_revalidation("k", counting_task(&counter));

        // Simulate the execution unit being torn down before flush.
        drop(std::mem::take(&mut *lock(&scheduler.tasks)));
        assert!(!scheduler.is_pending("k"));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}

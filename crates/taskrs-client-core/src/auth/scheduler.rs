//! Deferred one-shot tasks.
//!
//! The session manager never arms a timer itself; it hands a task and a delay
//! to a `Scheduler` and keeps the returned `TaskHandle`. This keeps the "at most
//! one pending renewal" rule in one place and lets tests drive time by hand.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::AbortHandle;
use tracing::debug;

pub type Task = BoxFuture<'static, ()>;

/// Opaque identifier of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay`.
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle;

    /// Cancel a pending task. No-op if it already ran or was cancelled.
    fn cancel(&self, handle: TaskHandle);
}

fn next_handle(counter: &AtomicU64) -> TaskHandle {
    TaskHandle(counter.fetch_add(1, Ordering::Relaxed))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Tokio
// ============================================================================

/// Schedules tasks on the current tokio runtime.
///
/// Must be used from within a runtime. A task leaves the pending set the
/// moment its delay elapses, so cancelling a task that is already running is a
/// no-op rather than an abort of in-flight work.
#[derive(Clone, Default)]
pub struct TokioScheduler {
    next_id: Arc<AtomicU64>,
    pending: Arc<Mutex<HashMap<TaskHandle, AbortHandle>>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks still waiting for their delay to elapse
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = next_handle(&self.next_id);
        let pending = Arc::clone(&self.pending);

        // Hold the lock across spawn so a zero-delay task cannot try to
        // deregister itself before it has been registered.
        let mut guard = lock(&self.pending);
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            lock(&pending).remove(&handle);
            task.await;
        });
        guard.insert(handle, join.abort_handle());
        debug!(?handle, delay_ms = delay.as_millis() as u64, "Task scheduled");

        handle
    }

    fn cancel(&self, handle: TaskHandle) {
        if let Some(abort) = lock(&self.pending).remove(&handle) {
            abort.abort();
            debug!(?handle, "Task cancelled");
        }
    }
}

// ============================================================================
// Manual
// ============================================================================

/// A scheduler that never runs anything on its own.
///
/// Tasks sit in a queue until `run_pending` is awaited. Useful in tests and
/// when embedding the client in a host that owns its own event loop.
#[derive(Default)]
pub struct ManualScheduler {
    next_id: AtomicU64,
    pending: Mutex<Vec<(TaskHandle, Duration, Task)>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays of all pending tasks, in scheduling order
    pub fn pending(&self) -> Vec<Duration> {
        lock(&self.pending).iter().map(|(_, delay, _)| *delay).collect()
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Run every task pending at the time of the call, in scheduling order.
    /// Tasks scheduled while these run stay pending.
    pub async fn run_pending(&self) -> usize {
        let tasks: Vec<_> = std::mem::take(&mut *lock(&self.pending));
        let count = tasks.len();
        for (_, _, task) in tasks {
            task.await;
        }
        count
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = next_handle(&self.next_id);
        lock(&self.pending).push((handle, delay, task));
        handle
    }

    fn cancel(&self, handle: TaskHandle) {
        lock(&self.pending).retain(|(h, _, _)| *h != handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_task(counter: &Arc<AtomicUsize>) -> Task {
        let counter = Arc::clone(counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    /// Let spawned tasks observe the current (paused) time
    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_fires_after_delay() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        scheduler.schedule(Duration::from_secs(60), counting_task(&fired));
        assert_eq!(scheduler.pending_count(), 1);
        settle().await;

        tokio::time::advance(Duration::from_secs(59)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_cancel() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let handle = scheduler.schedule(Duration::from_secs(10), counting_task(&fired));
        scheduler.cancel(handle);
        assert_eq!(scheduler.pending_count(), 0);

        tokio::time::advance(Duration::from_secs(20)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_cancel_unknown_is_noop() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let handle = scheduler.schedule(Duration::ZERO, counting_task(&fired));
        settle().await;
        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Already ran
        scheduler.cancel(handle);
        scheduler.cancel(handle);
    }

    #[tokio::test]
    async fn test_manual_scheduler_runs_only_on_demand() {
        let scheduler = ManualScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        scheduler.schedule(Duration::from_secs(5), counting_task(&fired));
        let cancelled = scheduler.schedule(Duration::from_secs(9), counting_task(&fired));
        scheduler.cancel(cancelled);

        assert_eq!(scheduler.pending(), vec![Duration::from_secs(5)]);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        assert_eq!(scheduler.run_pending().await, 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_count(), 0);
    }
}

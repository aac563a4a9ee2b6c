//! Deferred job scheduling on the tokio runtime.
//!
//! [`TimerThread`] hands out a [`JobId`] for each scheduled future so callers
//! can cancel it later. Cancellation is best-effort: once a job's delay has
//! elapsed it is removed from the pending set and runs to completion, and a
//! late `cancel` simply reports `false`.
//!
//! Pending timers are not limited. The `max_jobs` bound applies to jobs that
//! are running: a job whose delay has elapsed waits for a worker slot, so a
//! burst of due jobs queues up instead of crowding out the runtime.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{CoreError, Result};

/// Identifier of a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

struct Inner {
    runtime: Handle,
    jobs: Mutex<HashMap<JobId, JoinHandle<()>>>,
    next_id: AtomicU64,
    max_jobs: usize,
    workers: Arc<Semaphore>,
    shut_down: AtomicBool,
}

/// Schedules, cancels and runs jobs. Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct TimerThread {
    inner: Arc<Inner>,
}

impl TimerThread {
    /// Create a timer bound to the current tokio runtime, running at most
    /// `max_jobs` jobs at a time.
    pub fn new(max_jobs: usize) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| CoreError::NoRuntime(e.to_string()))?;
        Ok(Self::with_handle(runtime, max_jobs))
    }

    pub fn with_handle(runtime: Handle, max_jobs: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                runtime,
                jobs: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                max_jobs,
                workers: Arc::new(Semaphore::new(max_jobs.max(1))),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Run `job` after `delay`.
    pub fn schedule<F>(&self, delay: Duration, job: F) -> Result<JobId>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(CoreError::TimerShutdown);
        }

        let id = JobId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let inner = Arc::downgrade(&self.inner);
        let workers = self.inner.workers.clone();

        // The lock is held across spawn so a zero-delay job cannot fire
        // before its handle is registered.
        let mut jobs = self.inner.jobs.lock();
        let handle = self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let claimed = match inner.upgrade() {
                Some(inner) => inner.jobs.lock().remove(&id).is_some(),
                None => false,
            };
            if !claimed {
                return;
            }
            let Ok(_permit) = workers.acquire_owned().await else {
                return;
            };
            trace!(%id, "timer job fired");
            job.await;
        });
        jobs.insert(id, handle);
        Ok(id)
    }

    /// Cancel a pending job. Returns `true` only if the job had not fired yet.
    pub fn cancel(&self, id: JobId) -> bool {
        match self.inner.jobs.lock().remove(&id) {
            Some(handle) => {
                handle.abort();
                trace!(%id, "timer job cancelled");
                true
            }
            None => false,
        }
    }

    /// Run `job` on a worker as soon as a slot is free.
    pub fn run<F>(&self, job: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let workers = self.inner.workers.clone();
        self.inner.runtime.spawn(async move {
            if let Ok(_permit) = workers.acquire_owned().await {
                job.await;
            }
        })
    }

    /// Jobs currently holding a worker slot.
    pub fn running(&self) -> usize {
        self.inner.max_jobs.max(1) - self.inner.workers.available_permits()
    }

    /// Number of jobs waiting for their delay to elapse.
    pub fn pending(&self) -> usize {
        self.inner.jobs.lock().len()
    }

    pub fn is_pending(&self, id: JobId) -> bool {
        self.inner.jobs.lock().contains_key(&id)
    }

    /// Abort every pending job and refuse new ones.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.workers.close();
        let drained: Vec<_> = self.inner.jobs.lock().drain().collect();
        debug!(aborted = drained.len(), "timer thread shutting down");
        for (_, handle) in drained {
            handle.abort();
        }
    }

    pub fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }
}

impl std::fmt::Debug for TimerThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerThread")
            .field("pending", &self.pending())
            .field("max_jobs", &self.inner.max_jobs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test(start_paused = true)]
    async fn test_job_runs_after_delay() {
        let timer = TimerThread::new(10).unwrap();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        timer
            .schedule(Duration::from_secs(5), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(timer.pending(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timer.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_fire() {
        let timer = TimerThread::new(10).unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let id = timer
            .schedule(Duration::from_secs(1), async move {
                flag.store(true, Ordering::SeqCst);
            })
            .unwrap();

        assert!(timer.cancel(id));
        assert!(!timer.cancel(id));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_fire_is_noop() {
        let timer = TimerThread::new(10).unwrap();
        let id = timer.schedule(Duration::from_millis(10), async {}).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!timer.cancel(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_timers_are_not_capped() {
        let timer = TimerThread::new(2).unwrap();
        for _ in 0..250 {
            timer.schedule(Duration::from_secs(120), async {}).unwrap();
        }
        assert_eq!(timer.pending(), 250);
        assert!(timer.schedule(Duration::from_secs(20), async {}).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_jobs_are_bounded() {
        let timer = TimerThread::new(2).unwrap();
        let release = Arc::new(tokio::sync::Notify::new());
        let done = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let release = release.clone();
            let done = done.clone();
            timer
                .schedule(Duration::from_secs(1), async move {
                    release.notified().await;
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(timer.pending(), 0);
        assert_eq!(timer.running(), 2);

        release.notify_waiters();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(done.load(Ordering::SeqCst), 2);
        assert_eq!(timer.running(), 1);

        release.notify_waiters();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(timer.running(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_pending() {
        let timer = TimerThread::new(10).unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        timer
            .schedule(Duration::from_secs(1), async move {
                flag.store(true, Ordering::SeqCst);
            })
            .unwrap();
        timer.shutdown();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!fired.load(Ordering::SeqCst));
        assert!(matches!(
            timer.schedule(Duration::ZERO, async {}),
            Err(CoreError::TimerShutdown)
        ));
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        assert!(matches!(TimerThread::new(1), Err(CoreError::NoRuntime(_))));
    }
}

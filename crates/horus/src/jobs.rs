//! # Worker Pool
//!
//! Directory calls and port mapping may block for seconds; the tick thread
//! never waits for them. Each job runs on a small tokio runtime and hands its
//! result back through a [`Pending`] handle that the owner polls once per
//! frame:
//!
//! ```text
//!  tick thread                      worker threads
//!  ───────────                      ──────────────
//!  spawn(job) ──── Pending ────────▶ acquire permit
//!  poll() → Running                  run job
//!  poll() → Running                  send result
//!  poll() → Done(result) ◀──────────
//! ```
//!
//! At most `workers` jobs run at once; the rest queue on a semaphore.
//! Nothing is cancelled: a handle that is dropped simply discards the
//! result when it arrives.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, warn};

use crate::error::{SessionError, SessionResult};

/// State of a [`Pending`] job.
#[derive(Debug, PartialEq, Eq)]
pub enum JobStatus<T> {
    /// Still queued or running.
    Running,
    /// Finished with this result.
    Done(T),
    /// The job ended without a result (panicked or the pool shut down).
    Lost,
}

/// Result handle of a spawned job.
#[derive(Debug)]
pub struct Pending<T> {
    what: &'static str,
    rx: oneshot::Receiver<T>,
}

impl<T> Pending<T> {
    /// Label given at spawn time.
    #[must_use]
    pub const fn what(&self) -> &'static str {
        self.what
    }

    /// Checks for the result without blocking. `Done` is reported once;
    /// later polls report `Lost`.
    pub fn poll(&mut self) -> JobStatus<T> {
        match self.rx.try_recv() {
            Ok(value) => JobStatus::Done(value),
            Err(TryRecvError::Empty) => JobStatus::Running,
            Err(TryRecvError::Closed) => JobStatus::Lost,
        }
    }
}

/// Bounded pool of background workers.
#[derive(Debug)]
pub struct WorkerPool {
    runtime: Runtime,
    permits: Arc<Semaphore>,
    workers: usize,
}

impl WorkerPool {
    /// Starts `workers` worker threads.
    ///
    /// # Errors
    ///
    /// [`SessionError::WorkerPool`] if the threads cannot be spawned.
    pub fn new(workers: usize) -> SessionResult<Self> {
        let workers = workers.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name("horus-worker")
            .enable_all()
            .build()
            .map_err(SessionError::WorkerPool)?;
        Ok(Self {
            runtime,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        })
    }

    /// Number of jobs that may run at once.
    #[inline]
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `job` on the pool.
    pub fn spawn<T, F>(&self, what: &'static str, job: F) -> Pending<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let permits = Arc::clone(&self.permits);
        self.runtime.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let value = job.await;
            if tx.send(value).is_err() {
                debug!(job = what, "result discarded, nobody is waiting");
            }
        });
        Pending { what, rx }
    }

    /// Runs `job` on the pool and only logs its failure.
    pub fn detach<E, F>(&self, what: &'static str, job: F)
    where
        E: std::fmt::Display + Send + 'static,
        F: Future<Output = Result<(), E>> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        self.runtime.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            if let Err(err) = job.await {
                warn!(job = what, %err, "background job failed");
            }
        });
    }

    /// Runs `job` to completion on the calling thread, giving up after
    /// `limit`. Only for shutdown; never call this from the tick loop.
    pub fn block_on<F>(&self, what: &'static str, limit: Duration, job: F) -> Option<F::Output>
    where
        F: Future,
    {
        let outcome = self.runtime.block_on(tokio::time::timeout(limit, job));
        if outcome.is_err() {
            warn!(job = what, ?limit, "gave up waiting");
        }
        outcome.ok()
    }

    /// Waits up to `limit` for a spawned job. Only for shutdown.
    pub fn wait_for<T>(&self, pending: Pending<T>, limit: Duration) -> Option<T> {
        self.block_on(pending.what, limit, pending.rx).and_then(Result::ok)
    }

    /// Resolves once the process receives ctrl-c. Does not take a worker
    /// permit.
    pub fn ctrl_c(&self) -> Pending<std::io::Result<()>> {
        let (tx, rx) = oneshot::channel();
        self.runtime.spawn(async move {
            let _ = tx.send(tokio::signal::ctrl_c().await);
        });
        Pending { what: "ctrl-c", rx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn wait<T>(pending: &mut Pending<T>) -> JobStatus<T> {
        for _ in 0..500 {
            match pending.poll() {
                JobStatus::Running => std::thread::sleep(Duration::from_millis(2)),
                other => return other,
            }
        }
        JobStatus::Running
    }

    #[test]
    fn test_results_come_back_through_poll() {
        let pool = WorkerPool::new(2).unwrap();
        let mut pending = pool.spawn("answer", async { 6 * 7 });
        assert_eq!(pending.what(), "answer");
        assert_eq!(wait(&mut pending), JobStatus::Done(42));
        assert_eq!(pending.poll(), JobStatus::Lost);
    }

    #[test]
    fn test_pool_bounds_concurrency() {
        let pool = WorkerPool::new(2).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut jobs: Vec<_> = (0..6)
            .map(|_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                pool.spawn("busy", async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for job in &mut jobs {
            assert_eq!(wait(job), JobStatus::Done(()));
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_block_on_gives_up() {
        let pool = WorkerPool::new(1).unwrap();
        let slow = pool.block_on("slow", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        assert!(slow.is_none());
        assert_eq!(pool.block_on("fast", Duration::from_secs(1), async { 1 }), Some(1));

        let pending = pool.spawn("queued", async { "done" });
        assert_eq!(pool.wait_for(pending, Duration::from_secs(1)), Some("done"));
    }
}

//! Native implementation of `WorkerPool` using OS threads.
//!
//! - **No polling**: workers block on a bounded crossbeam channel
//! - **Drain on shutdown**: dropping the sender lets workers finish every
//!   queued job before `recv` reports disconnection

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::WorkerPoolConfig;
use crate::core::RuntimeError;

use super::{ErrorHandler, Job, PoolCounters, PoolError, PoolStats};

const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Worker pool with dedicated OS threads.
pub struct WorkerPool {
    /// Pool configuration.
    config: WorkerPoolConfig,

    /// Job sender. `None` once shut down.
    task_tx: Mutex<Option<Sender<Job>>>,

    /// Pool statistics counters (lock-free atomics).
    counters: Arc<PoolCounters>,

    /// Shutdown flag (lock-free atomic).
    shutdown: AtomicBool,

    /// Worker thread handles.
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a new worker pool with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the configuration is invalid, or
    /// `PoolError::Internal` if a worker thread cannot be spawned.
    pub fn new(config: WorkerPoolConfig) -> Result<Self, PoolError> {
        Self::build(config, None)
    }

    /// Create a pool whose job failures are also forwarded to `handler`.
    ///
    /// # Errors
    ///
    /// Same as [`WorkerPool::new`].
    pub fn with_error_handler(
        config: WorkerPoolConfig,
        handler: ErrorHandler,
    ) -> Result<Self, PoolError> {
        Self::build(config, Some(handler))
    }

    fn build(config: WorkerPoolConfig, handler: Option<ErrorHandler>) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let (task_tx, task_rx) = bounded::<Job>(config.max_queue_depth);
        let counters = Arc::new(PoolCounters::default());

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let spawned = spawn_worker(
                worker_id,
                task_rx.clone(),
                Arc::clone(&counters),
                handler.clone(),
                config.thread_stack_size,
            );
            match spawned {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    // Workers already running exit once the sender is dropped.
                    drop(task_tx);
                    return Err(PoolError::Internal(format!(
                        "failed to spawn worker {worker_id}: {e}"
                    )));
                }
            }
        }

        info!(
            worker_count = config.worker_count,
            max_queue_depth = config.max_queue_depth,
            "WorkerPool initialized"
        );

        Ok(Self {
            config,
            task_tx: Mutex::new(Some(task_tx)),
            counters,
            shutdown: AtomicBool::new(false),
            workers: Mutex::new(workers),
        })
    }

    /// Enqueue a job without blocking.
    ///
    /// # Errors
    ///
    /// - `PoolError::QueueFull` if the job queue is full
    /// - `PoolError::PoolShutdown` if the pool has been shut down
    pub fn submit(&self, job: Job) -> Result<(), PoolError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::PoolShutdown);
        }

        let task_tx_guard = self.task_tx.lock();
        let Some(task_tx) = task_tx_guard.as_ref() else {
            return Err(PoolError::PoolShutdown);
        };

        // Counted before the send so a worker's decrement never runs first.
        self.counters.queued_jobs.fetch_add(1, Ordering::Relaxed);
        let sent = task_tx.try_send(job);
        if sent.is_err() {
            self.counters.queued_jobs.fetch_sub(1, Ordering::Relaxed);
        }
        match sent {
            Ok(()) => {
                self.counters.submitted_jobs.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    max_queue_depth = self.config.max_queue_depth,
                    "Worker pool queue is full"
                );
                Err(PoolError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(PoolError::PoolShutdown),
        }
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.config.worker_count)
    }

    /// Whether `shutdown` has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop accepting jobs, let queued jobs drain, and join the workers
    /// (two seconds per worker).
    pub fn shutdown(&self) {
        self.shutdown_timeout(DEFAULT_JOIN_TIMEOUT);
    }

    /// Same as [`WorkerPool::shutdown`] with an explicit per-worker join timeout.
    ///
    /// Workers that don't exit within the timeout are detached.
    pub fn shutdown_timeout(&self, per_worker: Duration) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("Shutting down worker pool");

        // Dropping the sender lets workers drain what is queued, then exit.
        {
            let mut task_tx = self.task_tx.lock();
            *task_tx = None;
        }

        let mut workers = self.workers.lock();
        let worker_count = workers.len();

        for (idx, worker) in workers.drain(..).enumerate() {
            if worker.thread().id() == thread::current().id() {
                warn!(worker_id = idx, "Shutdown called from a worker thread - detaching it");
                continue;
            }

            let (tx, rx) = crossbeam_channel::bounded(1);
            let join_thread = thread::spawn(move || {
                let result = worker.join();
                let _ = tx.send(result.is_ok());
            });

            match rx.recv_timeout(per_worker) {
                Ok(true) => debug!(worker_id = idx, "Worker joined successfully"),
                Ok(false) => warn!(worker_id = idx, "Worker panicked"),
                Err(_) => {
                    warn!(worker_id = idx, "Worker did not exit within timeout - detaching");
                    continue;
                }
            }

            let _ = join_thread.join();
        }

        info!(worker_count = worker_count, "Worker pool shut down complete");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Signal shutdown but don't join; explicit shutdown() is required for
        // graceful cleanup.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            let mut task_tx = self.task_tx.lock();
            *task_tx = None;
            debug!("WorkerPool dropped without explicit shutdown - workers will be detached");
        }
    }
}

/// Spawn a worker thread.
fn spawn_worker(
    worker_id: usize,
    task_rx: Receiver<Job>,
    counters: Arc<PoolCounters>,
    handler: Option<ErrorHandler>,
    stack_size: usize,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("rt-worker-{worker_id}"))
        .stack_size(stack_size)
        .spawn(move || {
            debug!(worker_id = worker_id, "Worker thread started");

            // recv keeps yielding buffered jobs after the sender is dropped,
            // and only errors once the queue is empty.
            while let Ok(job) = task_rx.recv() {
                counters.queued_jobs.fetch_sub(1, Ordering::Relaxed);
                counters.active_jobs.fetch_add(1, Ordering::Relaxed);

                let outcome = panic::catch_unwind(AssertUnwindSafe(job))
                    .unwrap_or_else(|payload| Err(RuntimeError::from_panic(payload.as_ref())));

                counters.active_jobs.fetch_sub(1, Ordering::Relaxed);

                match outcome {
                    Ok(()) => {
                        counters.completed_jobs.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => {
                        counters.failed_jobs.fetch_add(1, Ordering::Relaxed);
                        error!(worker_id = worker_id, error = %err, "Job failed");
                        if let Some(handler) = handler.as_ref() {
                            handler(&err);
                        }
                    }
                }
            }

            debug!(worker_id = worker_id, "Worker thread exiting");
        })
}

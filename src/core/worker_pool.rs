//! Worker pool of dedicated OS threads that runs every resource operation body.
//!
//! Jobs are plain boxed closures. A job that returns an error (or panics) is
//! reported on the pool's own error channel: it is logged, counted in
//! [`PoolStats::failed_jobs`], and forwarded to the optional [`ErrorHandler`].
//! Callers that need the outcome report it themselves before returning.
//!
//! # Example
//!
//! ```rust,ignore
//! use resource_runtime::config::WorkerPoolConfig;
//! use resource_runtime::core::WorkerPool;
//!
//! let pool = WorkerPool::new(WorkerPoolConfig::new().with_worker_count(4))?;
//! pool.submit(Box::new(|| {
//!     println!("running on a worker");
//!     Ok(())
//! }))?;
//! pool.shutdown();
//! ```

mod native;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::RuntimeError;

/// Unit of work executed by a worker thread.
pub type Job = Box<dyn FnOnce() -> Result<(), RuntimeError> + Send + 'static>;

/// Receives every job failure after it has been logged.
pub type ErrorHandler = Arc<dyn Fn(&RuntimeError) + Send + Sync + 'static>;

/// Errors that can occur when using a `WorkerPool`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The job queue is full; no more jobs can be accepted.
    QueueFull,

    /// The pool has been shut down.
    PoolShutdown,

    /// Configuration validation failed.
    InvalidConfig(String),

    /// Internal error (thread spawn failure, channel closed, etc.).
    Internal(String),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "job queue is full"),
            Self::PoolShutdown => write!(f, "pool has been shut down"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for PoolError {}

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,

    /// Currently executing jobs.
    pub active_jobs: u64,

    /// Jobs waiting in the queue.
    pub queued_jobs: u64,

    /// Total jobs that returned `Ok`.
    pub completed_jobs: u64,

    /// Total jobs that returned an error or panicked.
    pub failed_jobs: u64,

    /// Total jobs accepted.
    pub submitted_jobs: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active_jobs: AtomicU64,
    pub queued_jobs: AtomicU64,
    pub completed_jobs: AtomicU64,
    pub failed_jobs: AtomicU64,
    pub submitted_jobs: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            active_jobs: self.active_jobs.load(Ordering::Relaxed),
            queued_jobs: self.queued_jobs.load(Ordering::Relaxed),
            completed_jobs: self.completed_jobs.load(Ordering::Relaxed),
            failed_jobs: self.failed_jobs.load(Ordering::Relaxed),
            submitted_jobs: self.submitted_jobs.load(Ordering::Relaxed),
        }
    }
}

pub use native::WorkerPool;

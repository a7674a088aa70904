//! Tokio-backed timer that fires delayed callbacks.
//!
//! The timer owns a small multi-threaded tokio runtime used only for
//! sleeping. Callbacks run on a timer thread and are expected to do nothing
//! but hand work to the worker pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::config::TimerConfig;
use crate::core::{RtResult, RuntimeError};

/// Timer running on a dedicated tokio runtime.
pub struct TokioTimer {
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
    stopped: AtomicBool,
}

impl std::fmt::Debug for TokioTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioTimer")
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

impl TokioTimer {
    /// Build the timer runtime.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::InvalidConfig`] for zero threads, or
    /// [`RuntimeError::Operation`] if tokio fails to start.
    pub fn new(config: &TimerConfig) -> RtResult<Self> {
        if config.worker_threads == 0 {
            return Err(RuntimeError::InvalidConfig(
                "timer.worker_threads must be greater than 0".into(),
            ));
        }
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name("rt-timer")
            .enable_time()
            .build()
            .map_err(|e| RuntimeError::operation(format!("failed to start timer runtime: {e}")))?;

        debug!(worker_threads = config.worker_threads, "Timer runtime started");
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            stopped: AtomicBool::new(false),
        })
    }

    /// Run `f` once `delay` has elapsed.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::NotRunning`] after [`TokioTimer::shutdown`].
    pub fn schedule<F>(&self, delay: Duration, f: F) -> RtResult<TimerHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.stopped.load(Ordering::Acquire) {
            return Err(RuntimeError::NotRunning);
        }

        let fired = Arc::new(AtomicBool::new(false));
        let gate = Arc::clone(&fired);
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if !gate.swap(true, Ordering::AcqRel) {
                f();
            }
        });

        Ok(TimerHandle {
            fired,
            task: task.abort_handle(),
        })
    }

    /// Whether [`TokioTimer::shutdown`] was called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop the timer runtime. Timers that have not fired are dropped.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
        info!("Timer shut down");
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A pending timer.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    fired: Arc<AtomicBool>,
    task: AbortHandle,
}

impl TimerHandle {
    /// Prevent the callback from running. Returns `false` if it already ran
    /// (or was already canceled).
    pub fn cancel(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.task.abort();
        true
    }

    /// Whether the callback ran or the timer was canceled.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

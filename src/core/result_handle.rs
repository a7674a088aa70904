//! Cancelable, single-resolution result handles.
//!
//! A handle starts PENDING and moves exactly once to DONE (value or error)
//! or CANCELED. Every later write is discarded and reported as `false`, so
//! two racing producers (an immediate dispatch outcome and a later resume,
//! say) resolve it first-writer-wins.
//!
//! Cancellation is advisory: it wakes waiters and marks the handle, but the
//! operation feeding it keeps running on the worker pool.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::error;

use crate::core::{RtResult, RuntimeError};

type SettleHook = Box<dyn FnOnce() + Send + 'static>;

enum Slot<T> {
    Pending,
    Done(RtResult<T>),
    Canceled,
}

struct HandleState<T> {
    slot: Slot<T>,
    hooks: Vec<SettleHook>,
}

struct Shared<T> {
    state: Mutex<HandleState<T>>,
    settled: Condvar,
}

impl<T> Shared<T> {
    fn settle(&self, slot: Slot<T>) -> bool {
        let hooks = {
            let mut state = self.state.lock();
            if !matches!(state.slot, Slot::Pending) {
                return false;
            }
            state.slot = slot;
            std::mem::take(&mut state.hooks)
        };
        self.settled.notify_all();
        run_hooks(hooks);
        true
    }
}

fn run_hooks(hooks: Vec<SettleHook>) {
    for hook in hooks {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(hook)) {
            let err = RuntimeError::from_panic(payload.as_ref());
            error!(error = %err, "Result handle settle hook panicked");
        }
    }
}

/// Reader side of a pending result.
pub struct ResultHandle<T> {
    shared: Arc<Shared<T>>,
}

/// Writer side of a pending result. Cloneable; the first write wins.
pub struct Resolver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ResultHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for ResultHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.shared.state.lock().slot {
            Slot::Pending => "pending",
            Slot::Done(Ok(_)) => "done(ok)",
            Slot::Done(Err(_)) => "done(err)",
            Slot::Canceled => "canceled",
        };
        f.debug_struct("ResultHandle").field("state", &state).finish()
    }
}

impl<T> ResultHandle<T> {
    /// A new PENDING handle and the resolver that settles it.
    #[must_use]
    pub fn pending() -> (Self, Resolver<T>) {
        let shared = Arc::new(Shared {
            state: Mutex::new(HandleState {
                slot: Slot::Pending,
                hooks: Vec::new(),
            }),
            settled: Condvar::new(),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            Resolver { shared },
        )
    }

    /// A handle that is already DONE.
    #[must_use]
    pub fn ready(result: RtResult<T>) -> Self {
        let (handle, resolver) = Self::pending();
        resolver.resolve(result);
        handle
    }

    /// Move PENDING to CANCELED and wake every waiter. Returns `false` if the
    /// handle had already settled. Work already handed to the worker pool is
    /// not interrupted.
    pub fn cancel(&self) -> bool {
        self.shared.settle(Slot::Canceled)
    }

    /// Whether the handle left PENDING (done or canceled).
    #[must_use]
    pub fn is_done(&self) -> bool {
        !matches!(self.shared.state.lock().slot, Slot::Pending)
    }

    /// Whether the handle was canceled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self.shared.state.lock().slot, Slot::Canceled)
    }

    /// Run `hook` once the handle leaves PENDING, on whichever thread settles
    /// it. Runs immediately if it already has.
    pub fn when_settled<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.shared.state.lock();
            if matches!(state.slot, Slot::Pending) {
                state.hooks.push(Box::new(hook));
                return;
            }
        }
        run_hooks(vec![Box::new(hook)]);
    }
}

fn outcome<T: Clone>(slot: &Slot<T>) -> Option<RtResult<T>> {
    match slot {
        Slot::Pending => None,
        Slot::Done(result) => Some(result.clone()),
        Slot::Canceled => Some(Err(RuntimeError::Canceled)),
    }
}

impl<T: Clone> ResultHandle<T> {
    /// The outcome if settled, without blocking.
    #[must_use]
    pub fn try_result(&self) -> Option<RtResult<T>> {
        outcome(&self.shared.state.lock().slot)
    }

    /// Block until the handle settles.
    ///
    /// # Errors
    ///
    /// The operation's error, or [`RuntimeError::Canceled`].
    pub fn wait(&self) -> RtResult<T> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(result) = outcome(&state.slot) {
                return result;
            }
            self.shared.settled.wait(&mut state);
        }
    }

    /// Block until the handle settles or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Timeout`] if still pending at the deadline, otherwise
    /// as [`ResultHandle::wait`].
    pub fn wait_timeout(&self, timeout: Duration) -> RtResult<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if let Some(result) = outcome(&state.slot) {
                return result;
            }
            if self
                .shared
                .settled
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return outcome(&state.slot).unwrap_or(Err(RuntimeError::Timeout));
            }
        }
    }
}

impl<T: Clone + Send + 'static> ResultHandle<T> {
    /// Await the outcome from async code. The condvar wait is moved onto
    /// tokio's blocking pool so the calling runtime is never blocked.
    ///
    /// # Errors
    ///
    /// As [`ResultHandle::wait_timeout`].
    pub async fn wait_async(&self, timeout: Duration) -> RtResult<T> {
        if let Some(result) = self.try_result() {
            return result;
        }
        let handle = self.clone();
        tokio::task::spawn_blocking(move || handle.wait_timeout(timeout))
            .await
            .map_err(|e| RuntimeError::Panicked(e.to_string()))?
    }
}

impl<T> Resolver<T> {
    /// Settle with a value. Returns whether this call won.
    pub fn complete(&self, value: T) -> bool {
        self.shared.settle(Slot::Done(Ok(value)))
    }

    /// Settle with an error. Returns whether this call won.
    pub fn fail(&self, error: RuntimeError) -> bool {
        self.shared.settle(Slot::Done(Err(error)))
    }

    /// Settle with either outcome. Returns whether this call won.
    pub fn resolve(&self, result: RtResult<T>) -> bool {
        self.shared.settle(Slot::Done(result))
    }

    /// Whether the handle already left PENDING.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(self.shared.state.lock().slot, Slot::Pending)
    }

    /// A reader for the same result.
    #[must_use]
    pub fn handle(&self) -> ResultHandle<T> {
        ResultHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

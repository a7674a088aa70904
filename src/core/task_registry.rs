//! Correlation of task tokens with pending callbacks.
//!
//! A suspended method call registers its callbacks under a [`TaskToken`].
//! Whatever resumes it later (a network reply, a timer, an error) finishes
//! the token, which fires every registered pair in order. A token resolves
//! at most once; every later attempt reports `false`.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::core::resource::{ErrorCallback, ResultCallback};
use crate::core::{RtResult, RuntimeError};
use crate::util::ids::{TaskToken, Value};

type CallbackPair = (ResultCallback, ErrorCallback);

struct PendingTask {
    callbacks: Mutex<Vec<CallbackPair>>,
    finished: AtomicBool,
    registered_at: Instant,
}

impl PendingTask {
    fn new(on_result: ResultCallback, on_error: ErrorCallback) -> Self {
        Self {
            callbacks: Mutex::new(vec![(on_result, on_error)]),
            finished: AtomicBool::new(false),
            registered_at: Instant::now(),
        }
    }

    fn take_callbacks(&self) -> Vec<CallbackPair> {
        std::mem::take(&mut *self.callbacks.lock())
    }
}

type TaskMap = HashMap<TaskToken, Arc<PendingTask>>;

/// Token to pending-callback registry.
pub struct TaskRegistry {
    tasks: Mutex<Option<TaskMap>>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("running", &self.is_running())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

impl TaskRegistry {
    /// A stopped registry. Call [`TaskRegistry::start`] before use.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tasks: Mutex::new(None),
        }
    }

    /// A registry that is already running.
    #[must_use]
    pub fn started() -> Self {
        Self {
            tasks: Mutex::new(Some(HashMap::new())),
        }
    }

    /// Begin accepting registrations.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::AlreadyRunning`] if already started.
    pub fn start(&self) -> RtResult<()> {
        let mut tasks = self.tasks.lock();
        if tasks.is_some() {
            return Err(RuntimeError::AlreadyRunning);
        }
        *tasks = Some(HashMap::new());
        info!("Task registry started");
        Ok(())
    }

    /// Stop, failing every outstanding task with [`RuntimeError::TaskKilled`].
    /// Returns how many were killed.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::NotRunning`] if not started.
    pub fn stop(&self) -> RtResult<usize> {
        let Some(tasks) = self.tasks.lock().take() else {
            return Err(RuntimeError::NotRunning);
        };

        let mut killed = 0;
        for (token, task) in tasks {
            if task.finished.swap(true, Ordering::AcqRel) {
                continue;
            }
            debug!(
                token = %token,
                age_ms = task.registered_at.elapsed().as_millis() as u64,
                "Killing outstanding task"
            );
            fire_error(&token, task.take_callbacks(), &RuntimeError::TaskKilled);
            killed += 1;
        }

        info!(killed, "Task registry stopped");
        Ok(killed)
    }

    /// Whether the registry accepts registrations.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.tasks.lock().is_some()
    }

    /// Register the first callback pair for `token`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::DuplicateTask`] if `token` is already pending (its
    /// callbacks are left untouched), [`RuntimeError::NotRunning`] if stopped.
    pub fn register<R, E>(&self, token: TaskToken, on_result: R, on_error: E) -> RtResult<()>
    where
        R: FnOnce(Value) + Send + 'static,
        E: FnOnce(RuntimeError) + Send + 'static,
    {
        let mut guard = self.tasks.lock();
        let tasks = guard.as_mut().ok_or(RuntimeError::NotRunning)?;
        if tasks.contains_key(&token) {
            return Err(RuntimeError::DuplicateTask(token));
        }
        tasks.insert(
            token,
            Arc::new(PendingTask::new(Box::new(on_result), Box::new(on_error))),
        );
        debug!(token = %token, "Task registered");
        Ok(())
    }

    /// Add another callback pair to a pending task. Pairs fire in the order
    /// they were added.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::UnknownTask`] if `token` is not pending.
    pub fn attach<R, E>(&self, token: TaskToken, on_result: R, on_error: E) -> RtResult<()>
    where
        R: FnOnce(Value) + Send + 'static,
        E: FnOnce(RuntimeError) + Send + 'static,
    {
        let guard = self.tasks.lock();
        let task = guard
            .as_ref()
            .and_then(|tasks| tasks.get(&token))
            .ok_or(RuntimeError::UnknownTask(token))?;
        task.callbacks
            .lock()
            .push((Box::new(on_result), Box::new(on_error)));
        Ok(())
    }

    /// Resolve `token` with a value. Returns `true` only for the call that
    /// actually resolved it.
    pub fn finish_with_result(&self, token: TaskToken, value: Value) -> bool {
        let Some(task) = self.claim(token) else {
            return false;
        };
        for (on_result, _) in task.take_callbacks() {
            let value = value.clone();
            guarded(&token, move || on_result(value));
        }
        true
    }

    /// Resolve `token` with an error. Returns `true` only for the call that
    /// actually resolved it.
    pub fn finish_with_error(&self, token: TaskToken, error: RuntimeError) -> bool {
        let Some(task) = self.claim(token) else {
            return false;
        };
        fire_error(&token, task.take_callbacks(), &error);
        true
    }

    /// Number of pending tasks.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.tasks.lock().as_ref().map_or(0, HashMap::len)
    }

    /// Whether `token` is pending.
    #[must_use]
    pub fn contains(&self, token: &TaskToken) -> bool {
        self.tasks
            .lock()
            .as_ref()
            .is_some_and(|tasks| tasks.contains_key(token))
    }

    /// How long `token` has been pending.
    #[must_use]
    pub fn age(&self, token: &TaskToken) -> Option<Duration> {
        self.tasks
            .lock()
            .as_ref()
            .and_then(|tasks| tasks.get(token))
            .map(|task| task.registered_at.elapsed())
    }

    fn claim(&self, token: TaskToken) -> Option<Arc<PendingTask>> {
        let task = self.tasks.lock().as_mut()?.remove(&token);
        match task {
            Some(task) if !task.finished.swap(true, Ordering::AcqRel) => Some(task),
            _ => {
                debug!(token = %token, "Task already resolved or unknown");
                None
            }
        }
    }
}

fn fire_error(token: &TaskToken, callbacks: Vec<CallbackPair>, error: &RuntimeError) {
    for (_, on_error) in callbacks {
        let error = error.clone();
        guarded(token, move || on_error(error));
    }
}

fn guarded(token: &TaskToken, callback: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
        let err = RuntimeError::from_panic(payload.as_ref());
        error!(token = %token, error = %err, "Task callback panicked");
    }
}

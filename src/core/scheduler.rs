//! Serialized execution of operations against resources.
//!
//! Every operation body runs on the worker pool. Inside the worker the
//! scheduler pins the resource in its registry, takes the key's monitor,
//! runs the body, releases the monitor, then unpins the resource. The pin
//! is held by a guard, so it is released on every exit path, panics
//! included.
//!
//! Failures (errors or panics from lookup or from the body) go three ways:
//! the caller's `on_failure` callback, the returned [`ResultHandle`], and
//! the worker pool's error channel, which logs and counts them.
//!
//! Operations on one key never overlap but are not FIFO; operations on
//! different keys are unordered.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::config::RuntimeConfig;
use crate::core::lock_registry::{LockRegistry, Monitor};
use crate::core::resource::{Resource, ResourceCell, ResourceRegistry, SharedResource};
use crate::core::result_handle::{ResultHandle, Resolver};
use crate::core::worker_pool::{ErrorHandler, Job, PoolStats, WorkerPool};
use crate::core::{RtResult, RuntimeError};
use crate::runtime::timer::TokioTimer;
use crate::util::ids::{ResourceKey, ResourcePath};

type FailureFn = Box<dyn FnOnce(&RuntimeError) + Send + 'static>;

/// Caller's failure callback, shared between the job and the submitting
/// thread so whichever learns of the failure first can run it.
#[derive(Clone)]
struct FailureHook(Arc<Mutex<Option<FailureFn>>>);

impl FailureHook {
    fn new<F>(on_failure: F) -> Self
    where
        F: FnOnce(&RuntimeError) + Send + 'static,
    {
        Self(Arc::new(Mutex::new(Some(Box::new(on_failure)))))
    }

    fn fire(&self, err: &RuntimeError) {
        let callback = self.0.lock().take();
        if let Some(callback) = callback {
            callback(err);
        }
    }
}

fn reject<T>(hook: &FailureHook, resolver: &Resolver<T>, err: RuntimeError) {
    if resolver.fail(err.clone()) {
        warn!(error = %err, "Scheduler rejected work");
        hook.fire(&err);
    }
}

/// Registry pin released on drop.
struct Acquired<'r> {
    registry: &'r dyn ResourceRegistry,
    resource: SharedResource,
}

impl<'r> Acquired<'r> {
    fn by_key(registry: &'r dyn ResourceRegistry, key: ResourceKey) -> RtResult<Self> {
        let resource = registry.get_and_lock_by_key(key)?;
        Ok(Self { registry, resource })
    }

    fn by_path(registry: &'r dyn ResourceRegistry, path: &ResourcePath) -> RtResult<Self> {
        let resource = registry.get_and_lock_by_path(path)?;
        Ok(Self { registry, resource })
    }

    fn cell(&self) -> &ResourceCell {
        &self.resource
    }
}

impl Drop for Acquired<'_> {
    fn drop(&mut self) {
        self.registry.release(Arc::clone(&self.resource));
    }
}

/// Take the monitor for the pinned resource, run `op`, release the monitor,
/// then the pin.
fn run_locked<T, Op>(inner: &SchedulerInner, acquired: Acquired<'_>, op: Op) -> RtResult<T>
where
    Op: FnOnce(&mut dyn Resource) -> RtResult<T>,
{
    let cell = acquired.cell();
    let key = cell.key();
    let monitor = inner.locks.acquire(key);
    trace!(key = %key, "Monitor acquired");
    let result = cell.with(op).and_then(|outcome| outcome);
    monitor.release();
    drop(acquired);
    result
}

/// Remove `monitor`'s resource and forget its lock. Call with the monitor
/// held so queued waiters move on to a fresh lock.
pub(crate) fn destroy_resource(
    registry: &dyn ResourceRegistry,
    locks: &LockRegistry<ResourceKey>,
    monitor: &Monitor<'_, ResourceKey>,
) -> RtResult<()> {
    let key = *monitor.key();
    let result = registry.destroy(key);
    locks.forget(&key);
    if result.is_ok() {
        debug!(key = %key, "Resource destroyed");
    }
    result
}

/// Unlink `path` holding the monitor of the resource it names. The path is
/// looked up again once the monitor is held, in case it moved meanwhile.
fn unlink_locked(inner: &SchedulerInner, path: &ResourcePath) -> RtResult<()> {
    loop {
        let Some(key) = inner.registry.key_at(path) else {
            debug!(path = %path, "Scheduled unlink found nothing at path");
            return Ok(());
        };
        let monitor = inner.locks.acquire(key);
        if inner.registry.key_at(path) != Some(key) {
            monitor.release();
            continue;
        }
        let result = inner.registry.unlink_path(path);
        let orphaned = result.is_ok() && !inner.registry.contains(key);
        if orphaned {
            inner.locks.forget(&key);
            debug!(path = %path, key = %key, "Last path unlinked, resource destroyed");
        } else if result.is_ok() {
            debug!(path = %path, key = %key, "Path unlinked");
        }
        monitor.release();
        return match result {
            Err(RuntimeError::ResourceNotFound(_)) => {
                debug!(path = %path, "Scheduled unlink found nothing at path");
                Ok(())
            }
            other => other,
        };
    }
}

struct SchedulerInner {
    registry: Arc<dyn ResourceRegistry>,
    locks: Arc<LockRegistry<ResourceKey>>,
    pool: WorkerPool,
    timer: TokioTimer,
    accepting: AtomicBool,
    shutdown_timeout: Duration,
}

impl SchedulerInner {
    fn enqueue<T, B>(self: &Arc<Self>, body: B, resolver: Resolver<T>, hook: FailureHook)
    where
        T: Send + 'static,
        B: FnOnce(&Self) -> RtResult<T> + Send + 'static,
    {
        if !self.accepting.load(Ordering::Acquire) {
            reject(&hook, &resolver, RuntimeError::NotRunning);
            return;
        }

        let inner = Arc::clone(self);
        let job_resolver = resolver.clone();
        let job_hook = hook.clone();
        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(inner.as_ref())))
                .unwrap_or_else(|payload| Err(RuntimeError::from_panic(payload.as_ref())));
            match outcome {
                Ok(value) => {
                    job_resolver.complete(value);
                    Ok(())
                }
                Err(err) => {
                    job_hook.fire(&err);
                    job_resolver.fail(err.clone());
                    Err(err)
                }
            }
        });

        if let Err(err) = self.pool.submit(job) {
            reject(&hook, &resolver, err.into());
        }
    }
}

/// Work parked on the timer. Dropped unfired (timer shut down, or
/// scheduling failed), it fails its handle with `NotRunning`.
struct DelayedWork<T, B> {
    inner: Weak<SchedulerInner>,
    work: Option<(B, Resolver<T>, FailureHook)>,
}

impl<T, B> DelayedWork<T, B>
where
    T: Send + 'static,
    B: FnOnce(&SchedulerInner) -> RtResult<T> + Send + 'static,
{
    fn fire(mut self) {
        let Some((body, resolver, hook)) = self.work.take() else {
            return;
        };
        if resolver.is_settled() {
            debug!("Delayed work canceled before it fired");
            return;
        }
        match self.inner.upgrade() {
            Some(inner) => inner.enqueue(body, resolver, hook),
            None => reject(&hook, &resolver, RuntimeError::NotRunning),
        }
    }
}

impl<T, B> Drop for DelayedWork<T, B> {
    fn drop(&mut self) {
        if let Some((_, resolver, hook)) = self.work.take() {
            reject(&hook, &resolver, RuntimeError::NotRunning);
        }
    }
}

/// Runs operations against resources on the worker pool, one at a time per
/// resource key.
///
/// Cheap to clone; clones share the pool, timer and accept flag.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("accepting", &self.is_accepting())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Start the worker pool and timer.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::InvalidConfig`] for invalid settings, or the pool or
    /// timer failing to start.
    pub fn new(
        config: &RuntimeConfig,
        registry: Arc<dyn ResourceRegistry>,
        locks: Arc<LockRegistry<ResourceKey>>,
    ) -> RtResult<Self> {
        Self::build(config, registry, locks, None)
    }

    /// As [`Scheduler::new`], forwarding every failed job to `handler`.
    ///
    /// # Errors
    ///
    /// Same as [`Scheduler::new`].
    pub fn with_error_handler(
        config: &RuntimeConfig,
        registry: Arc<dyn ResourceRegistry>,
        locks: Arc<LockRegistry<ResourceKey>>,
        handler: ErrorHandler,
    ) -> RtResult<Self> {
        Self::build(config, registry, locks, Some(handler))
    }

    fn build(
        config: &RuntimeConfig,
        registry: Arc<dyn ResourceRegistry>,
        locks: Arc<LockRegistry<ResourceKey>>,
        handler: Option<ErrorHandler>,
    ) -> RtResult<Self> {
        config.validate().map_err(RuntimeError::InvalidConfig)?;

        let pool = match handler {
            Some(handler) => WorkerPool::with_error_handler(config.pool.clone(), handler)?,
            None => WorkerPool::new(config.pool.clone())?,
        };
        let timer = TokioTimer::new(&config.timer)?;

        info!(
            worker_count = config.pool.worker_count,
            timer_threads = config.timer.worker_threads,
            "Scheduler started"
        );
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                registry,
                locks,
                pool,
                timer,
                accepting: AtomicBool::new(true),
                shutdown_timeout: config.shutdown_timeout(),
            }),
        })
    }

    fn run<T, B, F>(&self, body: B, on_failure: F) -> ResultHandle<T>
    where
        T: Send + 'static,
        B: FnOnce(&SchedulerInner) -> RtResult<T> + Send + 'static,
        F: FnOnce(&RuntimeError) + Send + 'static,
    {
        let (handle, resolver) = ResultHandle::pending();
        self.inner
            .enqueue(body, resolver, FailureHook::new(on_failure));
        handle
    }

    fn run_after<T, B, F>(&self, delay: Duration, body: B, on_failure: F) -> ResultHandle<T>
    where
        T: Send + 'static,
        B: FnOnce(&SchedulerInner) -> RtResult<T> + Send + 'static,
        F: FnOnce(&RuntimeError) + Send + 'static,
    {
        let (handle, resolver) = ResultHandle::pending();
        let hook = FailureHook::new(on_failure);
        if !self.is_accepting() {
            reject(&hook, &resolver, RuntimeError::NotRunning);
            return handle;
        }

        let work = DelayedWork {
            inner: Arc::downgrade(&self.inner),
            work: Some((body, resolver.clone(), hook.clone())),
        };
        match self.inner.timer.schedule(delay, move || work.fire()) {
            Ok(timer) => handle.when_settled(move || {
                timer.cancel();
            }),
            // Usually a no-op: dropping the unscheduled work fails the handle first.
            Err(err) => reject(&hook, &resolver, err),
        }
        handle
    }

    /// Run `f` on the worker pool without taking any lock.
    pub fn submit<T, W, F>(&self, f: W, on_failure: F) -> ResultHandle<T>
    where
        T: Send + 'static,
        W: FnOnce() -> RtResult<T> + Send + 'static,
        F: FnOnce(&RuntimeError) + Send + 'static,
    {
        self.run(move |_: &SchedulerInner| f(), on_failure)
    }

    /// Run `op` against the resource with `key` under its monitor.
    pub fn perform<T, Op, F>(&self, key: ResourceKey, op: Op, on_failure: F) -> ResultHandle<T>
    where
        T: Send + 'static,
        Op: FnOnce(&mut dyn Resource) -> RtResult<T> + Send + 'static,
        F: FnOnce(&RuntimeError) + Send + 'static,
    {
        self.run(
            move |inner: &SchedulerInner| {
                let acquired = Acquired::by_key(inner.registry.as_ref(), key)?;
                run_locked(inner, acquired, op)
            },
            on_failure,
        )
    }

    /// Run `op` against the resource registered at `path` under its monitor.
    pub fn perform_at_path<T, Op, F>(
        &self,
        path: ResourcePath,
        op: Op,
        on_failure: F,
    ) -> ResultHandle<T>
    where
        T: Send + 'static,
        Op: FnOnce(&mut dyn Resource) -> RtResult<T> + Send + 'static,
        F: FnOnce(&RuntimeError) + Send + 'static,
    {
        self.run(
            move |inner: &SchedulerInner| {
                let acquired = Acquired::by_path(inner.registry.as_ref(), &path)?;
                run_locked(inner, acquired, op)
            },
            on_failure,
        )
    }

    /// As [`Scheduler::perform`], once `delay` has elapsed. The timer only
    /// hands the work to the pool. Canceling the handle before the delay
    /// elapses cancels the timer too.
    pub fn perform_after_delay<T, Op, F>(
        &self,
        key: ResourceKey,
        delay: Duration,
        op: Op,
        on_failure: F,
    ) -> ResultHandle<T>
    where
        T: Send + 'static,
        Op: FnOnce(&mut dyn Resource) -> RtResult<T> + Send + 'static,
        F: FnOnce(&RuntimeError) + Send + 'static,
    {
        self.run_after(
            delay,
            move |inner: &SchedulerInner| {
                let acquired = Acquired::by_key(inner.registry.as_ref(), key)?;
                run_locked(inner, acquired, op)
            },
            on_failure,
        )
    }

    /// Run `op` against the resource with `key`, now or after `delay`,
    /// treating a vanished resource or task as success. Used for resumes,
    /// which routinely race destruction and resolution.
    pub(crate) fn perform_tolerating_races<Op, F>(
        &self,
        key: ResourceKey,
        delay: Option<Duration>,
        op: Op,
        on_failure: F,
    ) -> ResultHandle<()>
    where
        Op: FnOnce(&mut dyn Resource) -> RtResult<()> + Send + 'static,
        F: FnOnce(&RuntimeError) + Send + 'static,
    {
        let body = move |inner: &SchedulerInner| {
            let result = Acquired::by_key(inner.registry.as_ref(), key)
                .and_then(|acquired| run_locked(inner, acquired, op));
            match result {
                Err(err) if err.is_benign_race() => {
                    debug!(key = %key, error = %err, "Resume raced resource or task teardown");
                    Ok(())
                }
                other => other,
            }
        };
        match delay {
            Some(delay) => self.run_after(delay, body, on_failure),
            None => self.run(body, on_failure),
        }
    }

    /// Run `op` holding only the key's monitor; the resource is not looked
    /// up or pinned.
    pub fn perform_exclusive<T, Op, F>(
        &self,
        key: ResourceKey,
        op: Op,
        on_failure: F,
    ) -> ResultHandle<T>
    where
        T: Send + 'static,
        Op: FnOnce(&Monitor<'_, ResourceKey>) -> RtResult<T> + Send + 'static,
        F: FnOnce(&RuntimeError) + Send + 'static,
    {
        self.run(
            move |inner: &SchedulerInner| {
                let monitor = inner.locks.acquire(key);
                let result = op(&monitor);
                monitor.release();
                result
            },
            on_failure,
        )
    }

    /// Destroy the resource with `key` after `delay`, under its monitor. A
    /// resource that is already gone is ignored.
    pub fn schedule_destruction(&self, key: ResourceKey, delay: Duration) -> ResultHandle<()> {
        self.run_after(
            delay,
            move |inner: &SchedulerInner| {
                let monitor = inner.locks.acquire(key);
                let result = destroy_resource(inner.registry.as_ref(), &inner.locks, &monitor);
                monitor.release();
                match result {
                    Err(RuntimeError::ResourceNotFound(_)) => {
                        debug!(key = %key, "Scheduled destruction found nothing to destroy");
                        Ok(())
                    }
                    other => other,
                }
            },
            move |err: &RuntimeError| warn!(key = %key, error = %err, "Scheduled destruction failed"),
        )
    }

    /// Remove `path` after `delay`. Runs under the monitor of the resource
    /// registered there; if that was its last path the resource is destroyed
    /// and its lock forgotten. A path that is already gone is ignored.
    pub fn schedule_unlink(&self, path: ResourcePath, delay: Duration) -> ResultHandle<()> {
        let logged = path.clone();
        self.run_after(
            delay,
            move |inner: &SchedulerInner| unlink_locked(inner, &path),
            move |err: &RuntimeError| {
                warn!(path = %logged, error = %err, "Scheduled unlink failed");
            },
        )
    }

    /// Stop accepting work, drop unfired timers, and let queued jobs drain.
    pub fn shutdown(&self) {
        if !self.inner.accepting.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("Scheduler shutting down");
        self.inner.timer.shutdown();
        self.inner.pool.shutdown_timeout(self.inner.shutdown_timeout);
        info!("Scheduler stopped");
    }

    /// Whether new work is accepted.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    /// Worker pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    /// The lock registry guarding resources.
    #[must_use]
    pub fn locks(&self) -> &Arc<LockRegistry<ResourceKey>> {
        &self.inner.locks
    }

    /// The resource registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<dyn ResourceRegistry> {
        &self.inner.registry
    }
}

//! Collaborator interfaces: resources, their registry, and their loader.
//!
//! The runtime never stores resources itself. A [`ResourceRegistry`] owns
//! them and hands out pinned references; a [`ResourceLoader`] builds them
//! from a module name. Both are traits so deployments can plug in their own
//! storage; the `infra` module provides in-memory versions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use crate::core::{RtResult, RuntimeError};
use crate::util::ids::{Attributes, ResourceKey, ResourcePath, TaskToken, Value};

/// Receives the value of a completed method call.
pub type ResultCallback = Box<dyn FnOnce(Value) + Send + 'static>;

/// Receives the error of a failed method call.
pub type ErrorCallback = Box<dyn FnOnce(RuntimeError) + Send + 'static>;

/// A stateful unit addressed by key or path.
///
/// Every method is called with the resource's monitor held, so an
/// implementation never sees two calls at once.
pub trait Resource: Send {
    /// The resource's key. Must not change.
    fn key(&self) -> ResourceKey;

    /// Dispatch `method`.
    ///
    /// A method that finishes synchronously calls one of the callbacks
    /// before returning. One that suspends registers them with the task
    /// registry under the returned token and calls them when resumed.
    ///
    /// # Errors
    ///
    /// Dispatch failures, typically [`RuntimeError::MethodNotFound`].
    fn invoke(
        &mut self,
        method: &str,
        args: Vec<Value>,
        on_result: ResultCallback,
        on_error: ErrorCallback,
    ) -> RtResult<TaskToken>;

    /// Continue a suspended call with a value from the network.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::UnknownTask`] if `token` is no longer outstanding.
    fn resume_from_network(&mut self, token: TaskToken, value: Value) -> RtResult<()>;

    /// Continue a suspended call with an error.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::UnknownTask`] if `token` is no longer outstanding.
    fn resume_with_error(&mut self, token: TaskToken, error: RuntimeError) -> RtResult<()>;

    /// Continue a suspended call after a timer; `elapsed` is the time
    /// actually spent since the timer was scheduled.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::UnknownTask`] if `token` is no longer outstanding.
    fn resume_from_timer(&mut self, token: TaskToken, elapsed: Duration) -> RtResult<()>;

    /// Release whatever the resource holds. Called once, when it is removed.
    fn close(&mut self) {}
}

/// Fluent method call against a resource.
///
/// ```rust,ignore
/// let token = Dispatcher::new(resource, "echo")
///     .with_args(vec![json!("hi")])
///     .invoke(on_result, on_error)?;
/// ```
pub struct Dispatcher<'r> {
    resource: &'r mut dyn Resource,
    method: String,
    args: Vec<Value>,
}

impl<'r> Dispatcher<'r> {
    /// Prepare a call to `method` with no arguments.
    pub fn new(resource: &'r mut dyn Resource, method: impl Into<String>) -> Self {
        Self {
            resource,
            method: method.into(),
            args: Vec::new(),
        }
    }

    /// Replace the argument list.
    #[must_use]
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Append one argument.
    #[must_use]
    pub fn with_arg(mut self, arg: Value) -> Self {
        self.args.push(arg);
        self
    }

    /// Dispatch the call.
    ///
    /// # Errors
    ///
    /// Whatever [`Resource::invoke`] reports.
    pub fn invoke<R, E>(self, on_result: R, on_error: E) -> RtResult<TaskToken>
    where
        R: FnOnce(Value) + Send + 'static,
        E: FnOnce(RuntimeError) + Send + 'static,
    {
        trace!(
            key = %self.resource.key(),
            method = %self.method,
            args = self.args.len(),
            "Dispatching"
        );
        self.resource
            .invoke(&self.method, self.args, Box::new(on_result), Box::new(on_error))
    }
}

/// A registered resource.
///
/// The inner mutex gives safe mutable access; it is never contended,
/// because every caller already holds the key's monitor. Once closed, the
/// cell refuses further calls, so an operation that pinned the resource
/// before it was destroyed sees it as gone.
pub struct ResourceCell {
    key: ResourceKey,
    closed: AtomicBool,
    inner: Mutex<Box<dyn Resource>>,
}

/// Pinned reference handed out by a registry.
pub type SharedResource = Arc<ResourceCell>;

impl std::fmt::Debug for ResourceCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCell")
            .field("key", &self.key)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ResourceCell {
    /// Wrap a resource.
    #[must_use]
    pub fn new(resource: Box<dyn Resource>) -> Self {
        Self {
            key: resource.key(),
            closed: AtomicBool::new(false),
            inner: Mutex::new(resource),
        }
    }

    /// The resource's key.
    #[must_use]
    pub const fn key(&self) -> ResourceKey {
        self.key
    }

    /// Run `f` against the resource.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::ResourceNotFound`] once the resource is closed.
    pub fn with<T>(&self, f: impl FnOnce(&mut dyn Resource) -> T) -> RtResult<T> {
        if self.is_closed() {
            return Err(RuntimeError::ResourceNotFound(self.key.to_string()));
        }
        let mut guard = self.inner.lock();
        Ok(f(&mut **guard))
    }

    /// Close the resource. Only the first call reaches [`Resource::close`].
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.inner.lock().close();
        }
    }

    /// Whether [`ResourceCell::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Storage for live resources.
///
/// `get_and_lock_*` pin the resource and must each be paired with exactly
/// one [`ResourceRegistry::release`]. Destroying a pinned resource closes
/// it; holders of the pin then get [`RuntimeError::ResourceNotFound`] from
/// [`ResourceCell::with`].
/// They do not take the resource's monitor; that is the lock registry's job.
pub trait ResourceRegistry: Send + Sync {
    /// Whether `key` is registered.
    fn contains(&self, key: ResourceKey) -> bool;

    /// Key registered at `path`, if any.
    fn key_at(&self, path: &ResourcePath) -> Option<ResourceKey>;

    /// Pin the resource with `key`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::ResourceNotFound`] if there is none.
    fn get_and_lock_by_key(&self, key: ResourceKey) -> RtResult<SharedResource>;

    /// Pin the resource registered at `path`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::ResourceNotFound`] if nothing is registered there.
    fn get_and_lock_by_path(&self, path: &ResourcePath) -> RtResult<SharedResource>;

    /// Drop one pin.
    fn release(&self, resource: SharedResource);

    /// Remove and close the resource with `key`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::ResourceNotFound`] if there is none.
    fn destroy(&self, key: ResourceKey) -> RtResult<()>;

    /// Register `resource` at `path`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::DuplicatePath`] if the path is taken.
    fn add(&self, path: &ResourcePath, resource: Box<dyn Resource>) -> RtResult<ResourceKey>;

    /// Register `resource` at `path` and return it already pinned.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::DuplicatePath`] if the path is taken.
    fn add_and_lock(
        &self,
        path: &ResourcePath,
        resource: Box<dyn Resource>,
    ) -> RtResult<SharedResource>;

    /// Remove and close every resource. Returns how many were removed.
    fn remove_and_close_all(&self) -> usize;

    /// Make `key` reachable at one more path.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::ResourceNotFound`] or [`RuntimeError::DuplicatePath`].
    fn link_path(&self, key: ResourceKey, path: &ResourcePath) -> RtResult<()>;

    /// Remove one path; a resource left with no path is destroyed.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::ResourceNotFound`] if nothing is registered at `path`.
    fn unlink_path(&self, path: &ResourcePath) -> RtResult<()>;
}

/// Builds resources from a module name.
pub trait ResourceLoader: Send + Sync {
    /// Instantiate `module`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::ModuleNotFound`] for unknown modules, or whatever the
    /// constructor reports.
    fn load(
        &self,
        module: &str,
        attributes: &Attributes,
        args: Vec<Value>,
    ) -> RtResult<Box<dyn Resource>>;
}

//! Top-level entry point for creating, invoking and destroying resources.
//!
//! Every call is scheduled on the worker pool under the target resource's
//! monitor and reported through a [`ResultHandle`]. An invocation's handle
//! can be settled by the immediate dispatch outcome or, for a call that
//! suspends, by a later resume; whichever arrives first wins.

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::core::resource::{Dispatcher, Resource, ResourceLoader, ResourceRegistry};
use crate::core::result_handle::{ResultHandle, Resolver};
use crate::core::scheduler::{destroy_resource, Scheduler};
use crate::core::{RtResult, RuntimeError};
use crate::util::ids::{Attributes, ResourceKey, ResourcePath, TaskToken, Value};

/// Creates, invokes and destroys resources through the scheduler.
#[derive(Clone)]
pub struct ResourceContext {
    scheduler: Scheduler,
    registry: Arc<dyn ResourceRegistry>,
    loader: Arc<dyn ResourceLoader>,
}

impl std::fmt::Debug for ResourceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceContext")
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

/// Dispatch `method`, settling `resolver` from whichever callback fires.
fn dispatch(
    method: String,
    args: Vec<Value>,
    resolver: &Resolver<Value>,
) -> impl FnOnce(&mut dyn Resource) -> RtResult<TaskToken> + Send + 'static {
    let on_result = resolver.clone();
    let on_error = resolver.clone();
    move |resource: &mut dyn Resource| {
        Dispatcher::new(resource, method).with_args(args).invoke(
            move |value| {
                on_result.complete(value);
            },
            move |err| {
                on_error.fail(err);
            },
        )
    }
}

fn fail_with(resolver: &Resolver<Value>) -> impl FnOnce(&RuntimeError) + Send + 'static {
    let resolver = resolver.clone();
    move |err: &RuntimeError| {
        resolver.fail(err.clone());
    }
}

impl ResourceContext {
    /// Context over `scheduler`'s registry, building resources with `loader`.
    #[must_use]
    pub fn new(scheduler: Scheduler, loader: Arc<dyn ResourceLoader>) -> Self {
        let registry = Arc::clone(scheduler.registry());
        Self {
            scheduler,
            registry,
            loader,
        }
    }

    /// Load `module` and register it at `path`, on the calling thread.
    ///
    /// # Errors
    ///
    /// Loader errors ([`RuntimeError::ModuleNotFound`], constructor
    /// failures) or [`RuntimeError::DuplicatePath`].
    pub fn create(
        &self,
        module: &str,
        path: &ResourcePath,
        attributes: &Attributes,
        args: Vec<Value>,
    ) -> RtResult<ResourceKey> {
        let resource = self.loader.load(module, attributes, args)?;
        let key = self.registry.add(path, resource)?;
        debug!(module, path = %path, key = %key, "Resource created");
        Ok(key)
    }

    /// As [`ResourceContext::create`], on a worker. Exactly one of the
    /// callbacks runs.
    pub fn create_async<S, F>(
        &self,
        module: impl Into<String>,
        path: ResourcePath,
        attributes: Attributes,
        args: Vec<Value>,
        on_success: S,
        on_failure: F,
    ) -> ResultHandle<ResourceKey>
    where
        S: FnOnce(ResourceKey) + Send + 'static,
        F: FnOnce(&RuntimeError) + Send + 'static,
    {
        let module = module.into();
        let context = self.clone();
        self.scheduler.submit(
            move || {
                let key = context.create(&module, &path, &attributes, args)?;
                on_success(key);
                Ok(key)
            },
            on_failure,
        )
    }

    /// Call `method` on the resource with `key`.
    pub fn invoke(
        &self,
        key: ResourceKey,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> ResultHandle<Value> {
        let method = method.into();
        trace!(key = %key, method = %method, "Invoke");
        let (handle, resolver) = ResultHandle::pending();
        let _dispatched =
            self.scheduler
                .perform(key, dispatch(method, args, &resolver), fail_with(&resolver));
        handle
    }

    /// Call `method` on the resource registered at `path`.
    pub fn invoke_at_path(
        &self,
        path: ResourcePath,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> ResultHandle<Value> {
        let method = method.into();
        trace!(path = %path, method = %method, "Invoke at path");
        let (handle, resolver) = ResultHandle::pending();
        let _dispatched = self.scheduler.perform_at_path(
            path,
            dispatch(method, args, &resolver),
            fail_with(&resolver),
        );
        handle
    }

    /// Destroy the resource with `key` under its monitor, then forget its
    /// lock. Queued calls on the key find the resource gone.
    pub fn destroy(&self, key: ResourceKey) -> ResultHandle<()> {
        self.destroy_then(key, move |err: &RuntimeError| {
            if err.is_benign_race() {
                debug!(key = %key, error = %err, "Destroy found nothing to destroy");
            } else {
                warn!(key = %key, error = %err, "Destroy failed");
            }
        })
    }

    /// As [`ResourceContext::destroy`], but when the scheduler cannot run
    /// the destruction (queue full, shut down) the resource is removed on
    /// the failing thread instead. The resource's cell still serializes
    /// this against any call in flight.
    pub(crate) fn discard(&self, key: ResourceKey) -> ResultHandle<()> {
        let registry = Arc::clone(&self.registry);
        let locks = Arc::clone(self.scheduler.locks());
        self.destroy_then(key, move |err: &RuntimeError| {
            if err.is_benign_race() {
                debug!(key = %key, error = %err, "Discard found nothing to destroy");
                return;
            }
            warn!(key = %key, error = %err, "Destroy not scheduled, removing resource directly");
            match registry.destroy(key) {
                Ok(()) => debug!(key = %key, "Resource destroyed"),
                Err(err) => debug!(key = %key, error = %err, "Direct destroy found nothing"),
            }
            locks.forget(&key);
        })
    }

    fn destroy_then<F>(&self, key: ResourceKey, on_failure: F) -> ResultHandle<()>
    where
        F: FnOnce(&RuntimeError) + Send + 'static,
    {
        let registry = Arc::clone(&self.registry);
        let locks = Arc::clone(self.scheduler.locks());
        self.scheduler.perform_exclusive(
            key,
            move |monitor| destroy_resource(registry.as_ref(), &locks, monitor),
            on_failure,
        )
    }

    /// Whether a resource with `key` is still registered.
    #[must_use]
    pub fn contains(&self, key: ResourceKey) -> bool {
        self.registry.contains(key)
    }

    /// Remove and close every resource now. Returns how many were removed.
    pub fn destroy_all(&self) -> usize {
        let removed = self.registry.remove_and_close_all();
        info!(removed, "Destroyed all resources");
        removed
    }

    /// As [`ResourceContext::destroy_all`], on a worker.
    pub fn destroy_all_async<S, F>(&self, on_success: S, on_failure: F) -> ResultHandle<usize>
    where
        S: FnOnce(usize) + Send + 'static,
        F: FnOnce(&RuntimeError) + Send + 'static,
    {
        let context = self.clone();
        self.scheduler.submit(
            move || {
                let removed = context.destroy_all();
                on_success(removed);
                Ok(removed)
            },
            on_failure,
        )
    }

    /// The scheduler this context runs on.
    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The resource registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<dyn ResourceRegistry> {
        &self.registry
    }
}

//! One-shot invocations against short-lived resources.
//!
//! Both services create resources at a disposable path and run exactly one
//! method per `perform`. Cleanup hangs off the returned handle, so it runs
//! however the handle settles: value, error, or cancellation. If the
//! scheduler cannot take the cleanup job, the resource is removed directly.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::core::context::ResourceContext;
use crate::core::result_handle::ResultHandle;
use crate::core::RuntimeError;
use crate::util::ids::{Attributes, ResourceKey, ResourcePath, Value};

/// Creates a fresh resource per call and destroys it afterwards.
#[derive(Debug, Clone)]
pub struct SingleUseHandlerService {
    context: ResourceContext,
}

impl SingleUseHandlerService {
    /// Service creating resources through `context`.
    #[must_use]
    pub const fn new(context: ResourceContext) -> Self {
        Self { context }
    }

    /// Create `module`, call `method` once, and destroy the resource when
    /// the returned handle settles.
    pub fn perform(
        &self,
        module: &str,
        attributes: &Attributes,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> ResultHandle<Value> {
        let path = ResourcePath::temporary();
        let key = match self.context.create(module, &path, attributes, Vec::new()) {
            Ok(key) => key,
            Err(err) => return ResultHandle::ready(Err(err)),
        };

        let handle = self.context.invoke(key, method, args);
        let context = self.context.clone();
        handle.when_settled(move || {
            let _destroyed = context.discard(key);
        });
        handle
    }
}

type IdlePool = HashMap<String, Vec<ResourceKey>>;

/// Keeps resources alive between calls, per module, up to a bound.
#[derive(Debug, Clone)]
pub struct RetainedHandlerService {
    context: ResourceContext,
    idle: Arc<Mutex<IdlePool>>,
    max_idle_per_module: usize,
}

impl RetainedHandlerService {
    /// Service keeping at most `max_idle_per_module` idle resources per
    /// module.
    #[must_use]
    pub fn new(context: ResourceContext, max_idle_per_module: usize) -> Self {
        Self {
            context,
            idle: Arc::new(Mutex::new(HashMap::new())),
            max_idle_per_module,
        }
    }

    /// Call `method` on an idle `module` resource, creating one if none is
    /// idle. When the handle settles the resource goes back to the idle
    /// pool, unless the pool is full or the resource turned out to be gone.
    pub fn perform(
        &self,
        module: &str,
        attributes: &Attributes,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> ResultHandle<Value> {
        let key = match self.take_idle(module) {
            Some(key) => key,
            None => {
                let path = ResourcePath::temporary();
                match self.context.create(module, &path, attributes, Vec::new()) {
                    Ok(key) => key,
                    Err(err) => return ResultHandle::ready(Err(err)),
                }
            }
        };

        let handle = self.context.invoke(key, method, args);
        let probe = handle.clone();
        let service = self.clone();
        let module = module.to_owned();
        handle.when_settled(move || {
            let vanished = matches!(
                probe.try_result(),
                Some(Err(RuntimeError::ResourceNotFound(_)))
            );
            if vanished {
                debug!(module = %module, key = %key, "Retained handler vanished");
                let _destroyed = service.context.discard(key);
            } else {
                service.give_back(module, key);
            }
        });
        handle
    }

    /// Destroy every idle resource. Returns how many were destroyed.
    pub fn close(&self) -> usize {
        let drained: Vec<ResourceKey> = self
            .idle
            .lock()
            .drain()
            .flat_map(|(_, keys)| keys)
            .collect();
        for key in &drained {
            let _destroyed = self.context.discard(*key);
        }
        debug!(destroyed = drained.len(), "Retained handler pool closed");
        drained.len()
    }

    /// Idle resources currently kept for `module`.
    #[must_use]
    pub fn idle_count(&self, module: &str) -> usize {
        self.idle.lock().get(module).map_or(0, Vec::len)
    }

    /// Pop an idle key that is still registered. Keys destroyed behind the
    /// pool's back are dropped on the way.
    fn take_idle(&self, module: &str) -> Option<ResourceKey> {
        let mut idle = self.idle.lock();
        let keys = idle.get_mut(module)?;
        while let Some(key) = keys.pop() {
            if self.context.contains(key) {
                return Some(key);
            }
            debug!(module, key = %key, "Dropping stale idle handler");
        }
        None
    }

    fn give_back(&self, module: String, key: ResourceKey) {
        let overflow = {
            let mut idle = self.idle.lock();
            let keys = idle.entry(module).or_default();
            if keys.len() < self.max_idle_per_module {
                keys.push(key);
                false
            } else {
                true
            }
        };
        if overflow {
            debug!(key = %key, "Idle pool full, destroying handler");
            let _destroyed = self.context.discard(key);
        }
    }
}

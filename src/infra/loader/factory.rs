//! Loader backed by per-module constructor closures.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::core::resource::{Resource, ResourceLoader};
use crate::core::{RtResult, RuntimeError};
use crate::util::ids::{Attributes, ResourceKey, Value};

/// Builds one module's resources. Receives the key the new resource must
/// report from [`Resource::key`].
pub type ResourceFactory = Arc<
    dyn Fn(ResourceKey, &Attributes, Vec<Value>) -> RtResult<Box<dyn Resource>> + Send + Sync,
>;

/// Resource loader mapping module names to factories.
#[derive(Default)]
pub struct FactoryLoader {
    factories: RwLock<HashMap<String, ResourceFactory>>,
}

impl std::fmt::Debug for FactoryLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut modules: Vec<String> = self.factories.read().keys().cloned().collect();
        modules.sort();
        f.debug_struct("FactoryLoader")
            .field("modules", &modules)
            .finish()
    }
}

impl FactoryLoader {
    /// A loader with no modules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `module`, replacing any previous one.
    pub fn register<F>(&self, module: impl Into<String>, factory: F)
    where
        F: Fn(ResourceKey, &Attributes, Vec<Value>) -> RtResult<Box<dyn Resource>>
            + Send
            + Sync
            + 'static,
    {
        let module = module.into();
        debug!(module = %module, "Module registered");
        self.factories.write().insert(module, Arc::new(factory));
    }

    /// Builder-style [`FactoryLoader::register`].
    #[must_use]
    pub fn with_module<F>(self, module: impl Into<String>, factory: F) -> Self
    where
        F: Fn(ResourceKey, &Attributes, Vec<Value>) -> RtResult<Box<dyn Resource>>
            + Send
            + Sync
            + 'static,
    {
        self.register(module, factory);
        self
    }

    /// Remove `module`. Returns whether it was registered.
    pub fn unregister(&self, module: &str) -> bool {
        self.factories.write().remove(module).is_some()
    }

    /// Whether `module` is registered.
    #[must_use]
    pub fn contains(&self, module: &str) -> bool {
        self.factories.read().contains_key(module)
    }
}

impl ResourceLoader for FactoryLoader {
    fn load(
        &self,
        module: &str,
        attributes: &Attributes,
        args: Vec<Value>,
    ) -> RtResult<Box<dyn Resource>> {
        let factory = self
            .factories
            .read()
            .get(module)
            .cloned()
            .ok_or_else(|| RuntimeError::ModuleNotFound(module.to_owned()))?;

        let key = ResourceKey::random();
        let resource = factory(key, attributes, args)?;
        if resource.key() != key {
            return Err(RuntimeError::operation(format!(
                "module {module} built a resource reporting key {} instead of {key}",
                resource.key()
            )));
        }
        Ok(resource)
    }
}

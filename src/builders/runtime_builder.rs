//! Builder assembling a [`Runtime`] from configuration.

use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::core::{
    ErrorHandler, LockRegistry, ResourceContext, ResourceLoader, ResourceRegistry, RtResult,
    RuntimeError, Scheduler, TaskRegistry,
};
use crate::infra::{FactoryLoader, InMemoryResourceRegistry};
use crate::runtime::Runtime;

/// Assembles a [`Runtime`], defaulting to the in-memory registry and an
/// empty factory loader.
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    registry: Option<Arc<dyn ResourceRegistry>>,
    loader: Option<Arc<dyn ResourceLoader>>,
    tasks: Option<Arc<TaskRegistry>>,
    error_handler: Option<ErrorHandler>,
}

impl std::fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("config", &self.config)
            .field("custom_registry", &self.registry.is_some())
            .field("custom_loader", &self.loader.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl RuntimeBuilder {
    /// Builder for `config`.
    #[must_use]
    pub const fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            registry: None,
            loader: None,
            tasks: None,
            error_handler: None,
        }
    }

    /// Configuration being built.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Use `registry` instead of a fresh in-memory one.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<dyn ResourceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use `loader` instead of an empty factory loader.
    #[must_use]
    pub fn with_loader(mut self, loader: Arc<dyn ResourceLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Share an existing task registry, typically one the loader's
    /// resources already hold. Started during `build` if it is not running.
    #[must_use]
    pub fn with_task_registry(mut self, tasks: Arc<TaskRegistry>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    /// Forward every failed worker pool job to `handler`.
    #[must_use]
    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Validate the configuration and start every component.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::InvalidConfig`], or a component failing to start.
    pub fn build(self) -> RtResult<Runtime> {
        self.config.validate().map_err(RuntimeError::InvalidConfig)?;

        let registry: Arc<dyn ResourceRegistry> = match self.registry {
            Some(registry) => registry,
            None => Arc::new(InMemoryResourceRegistry::new()),
        };
        let loader: Arc<dyn ResourceLoader> = match self.loader {
            Some(loader) => loader,
            None => Arc::new(FactoryLoader::new()),
        };
        let tasks = self.tasks.unwrap_or_default();
        if !tasks.is_running() {
            tasks.start()?;
        }

        let locks = Arc::new(LockRegistry::new());
        let scheduler = match self.error_handler {
            Some(handler) => Scheduler::with_error_handler(
                &self.config,
                registry,
                Arc::clone(&locks),
                handler,
            )?,
            None => Scheduler::new(&self.config, registry, Arc::clone(&locks))?,
        };
        locks.start_reclaimer(self.config.locks.reclaim_interval())?;

        let context = ResourceContext::new(scheduler.clone(), loader);
        Ok(Runtime::assemble(self.config, locks, scheduler, tasks, context))
    }
}

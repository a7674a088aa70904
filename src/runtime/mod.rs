//! Assembled runtime and its timer.
//!
//! [`Runtime`] wires one lock registry, scheduler, task registry, resume
//! service, resource context and both handler services together. Build it
//! with [`crate::builders::RuntimeBuilder`].

pub mod timer;

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::RuntimeConfig;
use crate::core::{
    LockRegistry, ResourceContext, RetainedHandlerService, ResumeService, RuntimeError, Scheduler,
    SingleUseHandlerService, TaskRegistry,
};
use crate::util::ids::ResourceKey;

pub use timer::{TimerHandle, TokioTimer};

/// Every runtime component, sharing one scheduler and one lock registry.
#[derive(Debug, Clone)]
pub struct Runtime {
    config: RuntimeConfig,
    locks: Arc<LockRegistry<ResourceKey>>,
    scheduler: Scheduler,
    tasks: Arc<TaskRegistry>,
    resume: ResumeService,
    context: ResourceContext,
    single_use: SingleUseHandlerService,
    retained: RetainedHandlerService,
}

impl Runtime {
    pub(crate) fn assemble(
        config: RuntimeConfig,
        locks: Arc<LockRegistry<ResourceKey>>,
        scheduler: Scheduler,
        tasks: Arc<TaskRegistry>,
        context: ResourceContext,
    ) -> Self {
        let resume = ResumeService::new(scheduler.clone());
        let single_use = SingleUseHandlerService::new(context.clone());
        let retained =
            RetainedHandlerService::new(context.clone(), config.handlers.max_idle_per_module);
        Self {
            config,
            locks,
            scheduler,
            tasks,
            resume,
            context,
            single_use,
            retained,
        }
    }

    /// Configuration the runtime was built from.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Per-resource lock registry.
    #[must_use]
    pub const fn locks(&self) -> &Arc<LockRegistry<ResourceKey>> {
        &self.locks
    }

    /// Scheduler running every resource operation.
    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Registry of suspended calls.
    #[must_use]
    pub const fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    /// Resume entry points.
    #[must_use]
    pub const fn resume(&self) -> &ResumeService {
        &self.resume
    }

    /// Create, invoke and destroy resources.
    #[must_use]
    pub const fn context(&self) -> &ResourceContext {
        &self.context
    }

    /// One resource per call.
    #[must_use]
    pub const fn single_use(&self) -> &SingleUseHandlerService {
        &self.single_use
    }

    /// Pooled resources reused across calls.
    #[must_use]
    pub const fn retained(&self) -> &RetainedHandlerService {
        &self.retained
    }

    /// Stop accepting work and let queued work drain, kill suspended calls,
    /// then destroy every resource and stop lock reclamation.
    pub fn shutdown(&self) {
        info!("Runtime shutting down");
        self.scheduler.shutdown();

        match self.tasks.stop() {
            Ok(killed) => info!(killed, "Suspended tasks killed"),
            Err(RuntimeError::NotRunning) => {}
            Err(err) => warn!(error = %err, "Stopping task registry failed"),
        }

        let destroyed = self.context.destroy_all();
        self.locks.stop_reclaimer();
        info!(destroyed, "Runtime stopped");
    }
}

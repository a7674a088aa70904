//! Locking, scheduling, task correlation and resource orchestration.

pub mod context;
pub mod error;
pub mod handler;
pub mod lock_registry;
pub mod resource;
pub mod result_handle;
pub mod resume;
pub mod scheduler;
pub mod task_registry;
pub mod worker_pool;

pub use context::ResourceContext;
pub use error::{AppResult, RtResult, RuntimeError};
pub use handler::{RetainedHandlerService, SingleUseHandlerService};
pub use lock_registry::{Condition, LockKey, LockRegistry, Monitor, SharedLock};
pub use resource::{
    Dispatcher, ErrorCallback, Resource, ResourceCell, ResourceLoader, ResourceRegistry,
    ResultCallback, SharedResource,
};
pub use result_handle::{Resolver, ResultHandle};
pub use resume::ResumeService;
pub use scheduler::Scheduler;
pub use task_registry::TaskRegistry;
pub use worker_pool::{ErrorHandler, Job, PoolError, PoolStats, WorkerPool};

//! Error types for runtime operations.

use thiserror::Error;

use crate::core::worker_pool::PoolError;
use crate::util::ids::TaskToken;

/// Errors produced by runtime components.
///
/// Cloneable so a single failure can be delivered to every callback pair
/// registered against a task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// A task token was registered twice before resolution.
    #[error("task already registered: {0}")]
    DuplicateTask(TaskToken),
    /// Delivered to every outstanding task when the task registry stops.
    #[error("task killed: task registry stopped")]
    TaskKilled,
    /// A resume arrived for a token the resource no longer knows.
    #[error("unknown task: {0}")]
    UnknownTask(TaskToken),
    /// No resource exists for the given key or path.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
    /// A resource is already registered at the given path.
    #[error("resource already exists at path: {0}")]
    DuplicatePath(String),
    /// The loader has no constructor for the module.
    #[error("module not found: {0}")]
    ModuleNotFound(String),
    /// The resource does not expose the requested method.
    #[error("method not found: {0}")]
    MethodNotFound(String),
    /// Malformed resource path.
    #[error("invalid path: {0}")]
    InvalidPath(String),
    /// Malformed resource key.
    #[error("invalid resource key: {0}")]
    InvalidKey(String),
    /// An operation body (or resource method) failed.
    #[error("operation failed: {0}")]
    Operation(String),
    /// An operation body or callback panicked.
    #[error("operation panicked: {0}")]
    Panicked(String),
    /// The component is not running (never started, or shut down).
    #[error("not running")]
    NotRunning,
    /// The component was started twice.
    #[error("already running")]
    AlreadyRunning,
    /// The result handle was canceled.
    #[error("canceled")]
    Canceled,
    /// Waiting for a result timed out.
    #[error("timed out")]
    Timeout,
    /// Worker pool rejected or lost the job.
    #[error("worker pool error: {0}")]
    Pool(#[from] PoolError),
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RuntimeError {
    /// Convenience constructor for [`RuntimeError::Operation`].
    pub fn operation(message: impl std::fmt::Display) -> Self {
        Self::Operation(message.to_string())
    }

    /// Build a [`RuntimeError::Panicked`] from a caught panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Self::Panicked(message)
    }

    /// Races where the target moved on before the event arrived.
    #[must_use]
    pub const fn is_benign_race(&self) -> bool {
        matches!(self, Self::UnknownTask(_) | Self::ResourceNotFound(_))
    }
}

/// Result alias for runtime operations.
pub type RtResult<T> = Result<T, RuntimeError>;

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

//! Configuration models for the worker pool, lock registry, timer and
//! handler services.

pub mod runtime;

pub use runtime::{
    HandlerConfig, LockRegistryConfig, RuntimeConfig, TimerConfig, WorkerPoolConfig,
};

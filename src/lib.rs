//! # Resource Runtime
//!
//! Scheduling and locking runtime for stateful, addressable resources.
//!
//! A resource is a unit of state reached by key or path. The runtime makes
//! sure only one operation touches a resource at a time, runs those
//! operations on a pool of dedicated worker threads, fires delayed work from
//! a timer, and correlates suspended calls with the events (network
//! replies, timers, errors) that later resume them.
//!
//! ## Components
//!
//! - **Lock registry**: one reclaimable exclusive lock per key, with named
//!   conditions. Entries appear on first use and disappear once idle.
//! - **Scheduler**: runs an operation under the resource's lock on the
//!   worker pool, immediately or after a delay.
//! - **Task registry**: token to pending-callback map with exactly-once
//!   resolution and a kill-all on stop.
//! - **Resume service**: turns resume events into scheduled, locked calls.
//! - **Resource context**: create, invoke and destroy resources through
//!   cancelable, single-resolution result handles.
//! - **Handler services**: single-use and retained resources for one-shot
//!   calls.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use resource_runtime::builders::RuntimeBuilder;
//! use resource_runtime::config::RuntimeConfig;
//! use resource_runtime::infra::FactoryLoader;
//! use resource_runtime::util::{Attributes, ResourcePath};
//!
//! let loader = FactoryLoader::new().with_module("counter", |key, _attrs, _args| {
//!     Ok(Box::new(Counter::new(key)))
//! });
//! let runtime = RuntimeBuilder::new(RuntimeConfig::from_env()?)
//!     .with_loader(Arc::new(loader))
//!     .build()?;
//!
//! let path = ResourcePath::parse("counters/main")?;
//! let key = runtime
//!     .context()
//!     .create("counter", &path, &Attributes::new(), vec![])?;
//! let value = runtime
//!     .context()
//!     .invoke(key, "increment", vec![])
//!     .wait_timeout(Duration::from_secs(5))?;
//!
//! runtime.shutdown();
//! ```
//!
//! For complete scenarios, see the integration tests under `tests/`.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Builders assembling runtime components from configuration.
pub mod builders;
/// Configuration models for the worker pool, locks, timer and handlers.
pub mod config;
/// Locking, scheduling, task correlation and resource orchestration.
pub mod core;
/// In-memory resource registry and loader.
pub mod infra;
/// Assembled runtime and timer.
pub mod runtime;
/// Identifiers, values and telemetry helpers.
pub mod util;

pub use crate::builders::RuntimeBuilder;
pub use crate::core::{ResultHandle, RtResult, RuntimeError};
pub use crate::runtime::Runtime;

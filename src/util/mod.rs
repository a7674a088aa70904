//! Shared utilities.

pub mod ids;
pub mod telemetry;

pub use ids::{Attributes, ResourceKey, ResourcePath, TaskToken, Value, TEMPORARY_ROOT};
pub use telemetry::{init_tracing, init_tracing_with};

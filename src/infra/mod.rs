//! In-memory implementations of the resource registry and loader.

pub mod loader;
pub mod registry;

pub use loader::{FactoryLoader, ResourceFactory};
pub use registry::InMemoryResourceRegistry;

//! Resource registry backends.

pub mod memory;

pub use memory::InMemoryResourceRegistry;

//! Builders assembling runtime components from configuration.

pub mod runtime_builder;

pub use runtime_builder::RuntimeBuilder;

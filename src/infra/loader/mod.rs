//! Resource loader backends.

pub mod factory;

pub use factory::{FactoryLoader, ResourceFactory};

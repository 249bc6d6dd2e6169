//! Configuration models for the worker pool, resource defaults and store.

pub mod fabric;

pub use fabric::{FabricConfig, ProcessorConfig, ResourceConfig, StoreBackendConfig, StoreConfig};

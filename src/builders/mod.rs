//! Builders that assemble fabric components from configuration.

pub mod fabric_builder;

pub use fabric_builder::{Fabric, FabricBuilder, QueueRoute};

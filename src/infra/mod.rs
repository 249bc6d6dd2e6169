//! Infrastructure adapters for the pending queue and persistence backends.

pub mod queue;
pub mod store;

pub use queue::PendingQueue;
pub use store::{InMemoryStore, JsonFileStore, ResourceStore, TaskStore, TrainingJobStore};

//! Persistence contract consumed by the fabric.
//!
//! The fabric treats durable storage only through these narrow read/write
//! traits. Runtime usage of containers and queues is never persisted.

pub mod file;
pub mod memory;

use uuid::Uuid;

use crate::core::error::FabricError;
use crate::core::resource::{ResourceContainer, ResourceQueue};
use crate::core::task::{BackgroundTask, TaskId, TaskStatus};
use crate::core::training_job::{JobStatus, TrainingJob};

pub use file::JsonFileStore;
pub use memory::InMemoryStore;

/// Durable task rows keyed by id.
pub trait TaskStore: Send + Sync {
    /// Insert or replace a task row.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::Storage`] on backend failure.
    fn upsert_task(&self, task: &BackgroundTask) -> Result<(), FabricError>;

    /// Read one task row.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::Storage`] on backend failure.
    fn get_task(&self, id: TaskId) -> Result<Option<BackgroundTask>, FabricError>;

    /// Task rows, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::Storage`] on backend failure.
    fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<BackgroundTask>, FabricError>;

    /// Task rows belonging to an entity.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::Storage`] on backend failure.
    fn list_tasks_for_entity(&self, entity_id: &str) -> Result<Vec<BackgroundTask>, FabricError>;
}

/// Durable container and queue configuration rows.
pub trait ResourceStore: Send + Sync {
    /// Insert or replace a container row.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::Storage`] on backend failure.
    fn upsert_container(&self, container: &ResourceContainer) -> Result<(), FabricError>;

    /// All container rows.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::Storage`] on backend failure.
    fn list_containers(&self) -> Result<Vec<ResourceContainer>, FabricError>;

    /// Insert or replace a queue row.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::Storage`] on backend failure.
    fn upsert_queue(&self, queue: &ResourceQueue) -> Result<(), FabricError>;

    /// All queue rows.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::Storage`] on backend failure.
    fn list_queues(&self) -> Result<Vec<ResourceQueue>, FabricError>;
}

/// Durable training job rows.
pub trait TrainingJobStore: Send + Sync {
    /// Insert or replace a job row.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::Storage`] on backend failure.
    fn upsert_training_job(&self, job: &TrainingJob) -> Result<(), FabricError>;

    /// Read one job row.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::Storage`] on backend failure.
    fn get_training_job(&self, id: Uuid) -> Result<Option<TrainingJob>, FabricError>;

    /// Job rows, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::Storage`] on backend failure.
    fn list_training_jobs(&self, status: Option<JobStatus>)
        -> Result<Vec<TrainingJob>, FabricError>;
}

/// A backend implementing every persistence trait.
pub trait FabricStore: TaskStore + ResourceStore + TrainingJobStore {}

impl<T> FabricStore for T where T: TaskStore + ResourceStore + TrainingJobStore {}

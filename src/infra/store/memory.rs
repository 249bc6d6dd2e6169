//! In-memory store for development and tests.

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

use super::{ResourceStore, TaskStore, TrainingJobStore};
use crate::core::error::FabricError;
use crate::core::resource::{ResourceContainer, ResourceQueue};
use crate::core::task::{BackgroundTask, TaskId, TaskStatus};
use crate::core::training_job::{JobStatus, TrainingJob};

/// Non-durable store keeping every row in maps.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tasks: RwLock<HashMap<TaskId, BackgroundTask>>,
    containers: RwLock<HashMap<Uuid, ResourceContainer>>,
    queues: RwLock<HashMap<Uuid, ResourceQueue>>,
    jobs: RwLock<HashMap<Uuid, TrainingJob>>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

pub(crate) fn sort_tasks(tasks: &mut [BackgroundTask]) {
    tasks.sort_by(|a, b| {
        a.created_at_ms
            .cmp(&b.created_at_ms)
            .then_with(|| a.sequence.cmp(&b.sequence))
    });
}

impl TaskStore for InMemoryStore {
    fn upsert_task(&self, task: &BackgroundTask) -> Result<(), FabricError> {
        self.tasks.write().insert(task.id, task.clone());
        Ok(())
    }

    fn get_task(&self, id: TaskId) -> Result<Option<BackgroundTask>, FabricError> {
        Ok(self.tasks.read().get(&id).cloned())
    }

    fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<BackgroundTask>, FabricError> {
        let mut tasks: Vec<_> = self
            .tasks
            .read()
            .values()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        sort_tasks(&mut tasks);
        Ok(tasks)
    }

    fn list_tasks_for_entity(&self, entity_id: &str) -> Result<Vec<BackgroundTask>, FabricError> {
        let mut tasks: Vec<_> = self
            .tasks
            .read()
            .values()
            .filter(|t| t.related_entity_id.as_deref() == Some(entity_id))
            .cloned()
            .collect();
        sort_tasks(&mut tasks);
        Ok(tasks)
    }
}

impl ResourceStore for InMemoryStore {
    fn upsert_container(&self, container: &ResourceContainer) -> Result<(), FabricError> {
        self.containers
            .write()
            .insert(container.id, container.clone());
        Ok(())
    }

    fn list_containers(&self) -> Result<Vec<ResourceContainer>, FabricError> {
        let mut rows: Vec<_> = self.containers.read().values().cloned().collect();
        rows.sort_by_key(|c| c.created_at_ms);
        Ok(rows)
    }

    fn upsert_queue(&self, queue: &ResourceQueue) -> Result<(), FabricError> {
        self.queues.write().insert(queue.id, queue.clone());
        Ok(())
    }

    fn list_queues(&self) -> Result<Vec<ResourceQueue>, FabricError> {
        let mut rows: Vec<_> = self.queues.read().values().cloned().collect();
        rows.sort_by_key(|q| q.created_at_ms);
        Ok(rows)
    }
}

impl TrainingJobStore for InMemoryStore {
    fn upsert_training_job(&self, job: &TrainingJob) -> Result<(), FabricError> {
        self.jobs.write().insert(job.id, job.clone());
        Ok(())
    }

    fn get_training_job(&self, id: Uuid) -> Result<Option<TrainingJob>, FabricError> {
        Ok(self.jobs.read().get(&id).cloned())
    }

    fn list_training_jobs(
        &self,
        status: Option<JobStatus>,
    ) -> Result<Vec<TrainingJob>, FabricError> {
        let mut rows: Vec<_> = self
            .jobs
            .read()
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        rows.sort_by_key(|j| j.created_at_ms);
        Ok(rows)
    }
}

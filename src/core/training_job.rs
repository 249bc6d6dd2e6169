//! Long-lived training job rows tracked outside the generic task table.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util::clock::now_ms;

/// Training job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Waiting for resources.
    Queued,
    /// Training in progress.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Stopped on request.
    Cancelled,
}

/// A training job and the resource bookkeeping that survives a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingJob {
    /// Job identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Current status.
    pub status: JobStatus,
    /// Resource queue the job was admitted through.
    pub queue_id: Option<Uuid>,
    /// Lease held while running.
    pub lease_id: Option<Uuid>,
    /// Task that drives this job, if any.
    pub task_id: Option<Uuid>,
    /// Error message when Failed.
    pub error_message: Option<String>,
    /// Creation time, ms since epoch.
    pub created_at_ms: u128,
    /// Start time, ms since epoch.
    pub started_at_ms: Option<u128>,
    /// Completion time, ms since epoch.
    pub completed_at_ms: Option<u128>,
}

impl TrainingJob {
    /// New queued job.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: JobStatus::Queued,
            queue_id: None,
            lease_id: None,
            task_id: None,
            error_message: None,
            created_at_ms: now_ms(),
            started_at_ms: None,
            completed_at_ms: None,
        }
    }

    /// Fail the job and drop its lease reference.
    pub fn fail(&mut self, error_message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error_message = Some(error_message.into());
        self.lease_id = None;
        self.completed_at_ms = Some(now_ms());
    }
}

//! Startup reconciliation of training job rows.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::error::FabricError;
use crate::core::resource_service::ResourceService;
use crate::core::training_job::JobStatus;
use crate::infra::store::TrainingJobStore;

/// Outcome of one training recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingRecoveryReport {
    /// Orphaned Running jobs marked Failed.
    pub failed: usize,
    /// Leases that were still outstanding and got released.
    pub leases_released: usize,
    /// Jobs whose row could not be written.
    pub skipped: usize,
}

/// Fails training jobs left Running by a previous process.
pub struct TrainingJobRecovery {
    store: Arc<dyn TrainingJobStore>,
    resources: Option<Arc<ResourceService>>,
}

impl TrainingJobRecovery {
    /// Recovery over `store`, releasing surviving leases through `resources`.
    #[must_use]
    pub fn new(store: Arc<dyn TrainingJobStore>, resources: Option<Arc<ResourceService>>) -> Self {
        Self { store, resources }
    }

    /// Run one pass.
    ///
    /// # Errors
    ///
    /// [`FabricError::Storage`] if the rows cannot be listed.
    pub fn run(&self) -> Result<TrainingRecoveryReport, FabricError> {
        let mut report = TrainingRecoveryReport::default();
        for mut job in self.store.list_training_jobs(Some(JobStatus::Running))? {
            let lease_id = job.lease_id;
            job.fail(
                FabricError::InterruptedByRestart(
                    "training job was running when the previous process stopped".into(),
                )
                .to_string(),
            );
            if let Err(e) = self.store.upsert_training_job(&job) {
                tracing::error!(job_id = %job.id, error = %e, "failed to persist interrupted job");
                report.skipped += 1;
                continue;
            }
            if let (Some(resources), Some(lease_id)) = (&self.resources, lease_id) {
                if resources.release_by_id(lease_id) {
                    report.leases_released += 1;
                }
            }
            tracing::warn!(job_id = %job.id, name = %job.name, "orphaned training job marked failed");
            report.failed += 1;
        }
        tracing::info!(
            failed = report.failed,
            leases_released = report.leases_released,
            "training recovery finished"
        );
        Ok(report)
    }
}

//! Startup reconciliation of persisted task rows.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::audit::AuditAction;
use crate::core::error::FabricError;
use crate::core::task::TaskStatus;
use crate::core::task_manager::{AdoptOutcome, BackgroundTaskManager};
use crate::infra::store::TaskStore;

/// Outcome of one operation recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecoveryReport {
    /// Orphaned Running rows marked Failed.
    pub interrupted: usize,
    /// Pending rows placed back in the queue.
    pub requeued: usize,
    /// Terminal rows loaded for queries.
    pub loaded: usize,
    /// Rows already tracked by the manager.
    pub already_known: usize,
    /// Rows skipped as corrupt or unwritable.
    pub skipped: usize,
}

/// Fails orphaned Running tasks and restores Pending ones.
///
/// Running rows are never resumed: the handler's in-memory progress died with
/// the previous process. The pass is idempotent; a row handled once is known
/// to the manager and ignored on the next run.
pub struct OperationRecovery {
    store: Arc<dyn TaskStore>,
    manager: Arc<BackgroundTaskManager>,
}

impl OperationRecovery {
    /// Recovery over `store`, feeding `manager`.
    #[must_use]
    pub fn new(store: Arc<dyn TaskStore>, manager: Arc<BackgroundTaskManager>) -> Self {
        Self { store, manager }
    }

    /// Run one pass.
    ///
    /// # Errors
    ///
    /// [`FabricError::Storage`] if the rows cannot be listed. Failures on a
    /// single row are logged and counted as skipped.
    pub fn run(&self) -> Result<OperationRecoveryReport, FabricError> {
        let mut report = OperationRecoveryReport::default();
        for mut row in self.store.list_tasks(None)? {
            if let Err(reason) = row.check_invariants() {
                tracing::warn!(task_id = %row.id, %reason, "skipping corrupt task row");
                report.skipped += 1;
                continue;
            }

            let interrupted = row.status == TaskStatus::Running;
            if interrupted {
                if self.manager.is_live(row.id) {
                    report.already_known += 1;
                    continue;
                }
                row.mark_failed(
                    FabricError::InterruptedByRestart(
                        "task was running when the previous process stopped".into(),
                    )
                    .to_string(),
                );
                if let Err(e) = self.store.upsert_task(&row) {
                    tracing::error!(task_id = %row.id, error = %e, "failed to persist interrupted task");
                    report.skipped += 1;
                    continue;
                }
                self.manager
                    .record(&row, AuditAction::Recover, Some("interrupted".into()));
                tracing::warn!(task_id = %row.id, task_type = %row.task_type, "orphaned task marked failed");
            }

            match self.manager.adopt(row) {
                AdoptOutcome::Requeued => report.requeued += 1,
                AdoptOutcome::AlreadyKnown => report.already_known += 1,
                AdoptOutcome::Loaded if interrupted => report.interrupted += 1,
                AdoptOutcome::Loaded => report.loaded += 1,
            }
        }
        tracing::info!(
            interrupted = report.interrupted,
            requeued = report.requeued,
            loaded = report.loaded,
            skipped = report.skipped,
            "operation recovery finished"
        );
        Ok(report)
    }
}

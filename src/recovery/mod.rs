//! Startup recovery: reconcile persisted non-terminal rows with the absence
//! of live workers. Both passes run before the task processor starts.

pub mod operation;
pub mod training;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use operation::{OperationRecovery, OperationRecoveryReport};
pub use training::{TrainingJobRecovery, TrainingRecoveryReport};

use crate::core::error::FabricError;
use crate::core::resource_service::ResourceService;
use crate::core::task_manager::BackgroundTaskManager;
use crate::infra::store::{TaskStore, TrainingJobStore};

/// Combined outcome of both recovery passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Task rows.
    pub operations: OperationRecoveryReport,
    /// Training job rows.
    pub training: TrainingRecoveryReport,
}

/// Run operation recovery, then training recovery.
///
/// # Errors
///
/// [`FabricError::Storage`] if either store cannot be listed.
pub fn run_startup_recovery(
    tasks: Arc<dyn TaskStore>,
    jobs: Arc<dyn TrainingJobStore>,
    manager: Arc<BackgroundTaskManager>,
    resources: Option<Arc<ResourceService>>,
) -> Result<RecoveryReport, FabricError> {
    let operations = OperationRecovery::new(tasks, manager).run()?;
    let training = TrainingJobRecovery::new(jobs, resources).run()?;
    Ok(RecoveryReport {
        operations,
        training,
    })
}

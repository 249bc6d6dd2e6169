//! Producer-facing request/response models for web and CLI callers.

use serde::{Deserialize, Serialize};

use crate::builders::Fabric;
use crate::core::error::FabricError;
use crate::core::hardware::DetectedHardware;
use crate::core::resource::{ContainerStatus, QueueStatus};
use crate::core::task::{BackgroundTask, TaskId, TaskStatus, TaskType, DEFAULT_PRIORITY};
use crate::core::task_manager::BackgroundTaskManager;
use crate::core::task_processor::ProcessorStats;

/// Schedule request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleTaskRequest {
    /// Task type.
    pub task_type: TaskType,
    /// Display name.
    pub name: String,
    /// Opaque parameter record.
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Owning entity.
    #[serde(default)]
    pub related_entity_id: Option<String>,
    /// Priority; lower runs first.
    #[serde(default)]
    pub priority: Option<i32>,
}

/// Task status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    /// Task identifier.
    pub task_id: TaskId,
    /// Display name.
    pub name: String,
    /// Task type.
    pub task_type: TaskType,
    /// Current status.
    pub status: TaskStatus,
    /// Progress percent.
    pub progress_percent: u8,
    /// Latest progress message.
    pub progress_message: Option<String>,
    /// Units processed.
    pub progress_current: u64,
    /// Units expected.
    pub progress_total: u64,
    /// Result record, when Completed.
    pub result: Option<serde_json::Value>,
    /// Result type name.
    pub result_type: Option<String>,
    /// Error message, when Failed.
    pub error_message: Option<String>,
    /// Owning entity.
    pub related_entity_id: Option<String>,
    /// Creation time, ms since epoch.
    pub created_at_ms: u128,
    /// Completion time, ms since epoch.
    pub completed_at_ms: Option<u128>,
}

impl From<&BackgroundTask> for TaskStatusResponse {
    fn from(task: &BackgroundTask) -> Self {
        Self {
            task_id: task.id,
            name: task.name.clone(),
            task_type: task.task_type,
            status: task.status,
            progress_percent: task.progress_percent,
            progress_message: task.progress_message.clone(),
            progress_current: task.progress_current,
            progress_total: task.progress_total,
            result: task.result.clone(),
            result_type: task.result_type.clone(),
            error_message: task.error_message.clone(),
            related_entity_id: task.related_entity_id.clone(),
            created_at_ms: task.created_at_ms,
            completed_at_ms: task.completed_at_ms,
        }
    }
}

/// Cancel response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CancelResponse {
    /// Task identifier.
    pub task_id: TaskId,
    /// Whether cancellation was accepted.
    pub accepted: bool,
}

/// Observability snapshot for setup and status screens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FabricOverview {
    /// Container usage.
    pub containers: Vec<ContainerStatus>,
    /// Queue admission state.
    pub queues: Vec<QueueStatus>,
    /// Hardware detected at first run.
    pub hardware: Option<DetectedHardware>,
    /// Worker pool state.
    pub processor: ProcessorStats,
    /// Tasks waiting for a worker.
    pub pending_tasks: usize,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
    /// Whether workers are running.
    pub workers_running: bool,
    /// Tasks waiting for a worker.
    pub pending_tasks: usize,
}

/// Schedule a task from a request.
///
/// # Errors
///
/// [`FabricError::Validation`] for rejected input, [`FabricError::Storage`] on
/// persistence failure.
pub fn schedule_task(
    manager: &BackgroundTaskManager,
    req: ScheduleTaskRequest,
) -> Result<TaskStatusResponse, FabricError> {
    let task = manager.schedule_task(
        req.task_type,
        req.name,
        req.parameters,
        req.related_entity_id,
        req.priority.unwrap_or(DEFAULT_PRIORITY),
    )?;
    Ok(TaskStatusResponse::from(&task))
}

/// Status of one task.
///
/// # Errors
///
/// [`FabricError::TaskNotFound`] for an unknown id.
pub fn task_status(
    manager: &BackgroundTaskManager,
    id: TaskId,
) -> Result<TaskStatusResponse, FabricError> {
    manager
        .get_task(id)
        .map(|t| TaskStatusResponse::from(&t))
        .ok_or(FabricError::TaskNotFound(id))
}

/// Tasks, optionally filtered by status.
pub fn list_tasks(manager: &BackgroundTaskManager, status: Option<TaskStatus>) -> Vec<TaskStatusResponse> {
    manager
        .get_tasks(status)
        .iter()
        .map(TaskStatusResponse::from)
        .collect()
}

/// Tasks belonging to an entity.
pub fn list_entity_tasks(manager: &BackgroundTaskManager, entity_id: &str) -> Vec<TaskStatusResponse> {
    manager
        .get_tasks_for_entity(entity_id)
        .iter()
        .map(TaskStatusResponse::from)
        .collect()
}

/// Request cancellation.
pub fn cancel_task(manager: &BackgroundTaskManager, id: TaskId) -> CancelResponse {
    CancelResponse {
        task_id: id,
        accepted: manager.cancel_task(id),
    }
}

/// Snapshot of containers, queues, hardware and workers.
#[must_use]
pub fn overview(fabric: &Fabric) -> FabricOverview {
    FabricOverview {
        containers: fabric.resources().container_status(),
        queues: fabric.resources().queue_status(),
        hardware: fabric.resources().hardware(),
        processor: fabric.processor().stats(),
        pending_tasks: fabric.manager().pending_count(),
    }
}

/// Return a health payload.
#[must_use]
pub fn health(fabric: &Fabric) -> Health {
    let processor = fabric.processor().stats();
    Health {
        ok: processor.running,
        workers_running: processor.running,
        pending_tasks: fabric.manager().pending_count(),
    }
}

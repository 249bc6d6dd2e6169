//! API surface exposed to producers.

pub mod api;

pub use api::{
    cancel_task, health, list_entity_tasks, list_tasks, overview, schedule_task, task_status,
    CancelResponse, FabricOverview, Health, ScheduleTaskRequest, TaskStatusResponse,
};

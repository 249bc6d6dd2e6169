//! Tests for producer-facing request/response models

use std::sync::Arc;

use prometheus_task_fabric::core::{
    BackgroundTaskManager, FabricError, HandlerRegistry, TaskStatus, TaskType, DEFAULT_PRIORITY,
};
use prometheus_task_fabric::infra::store::InMemoryStore;
use prometheus_task_fabric::runtime::{self, ScheduleTaskRequest, TaskStatusResponse};

fn manager() -> BackgroundTaskManager {
    BackgroundTaskManager::new(Arc::new(InMemoryStore::new()), Arc::new(HandlerRegistry::new()))
}

#[test]
fn test_schedule_request_defaults() {
    let req: ScheduleTaskRequest =
        serde_json::from_str(r#"{"task_type": "Backtest", "name": "bt"}"#).unwrap();
    assert!(req.parameters.is_null());
    assert!(req.priority.is_none());

    let m = manager();
    let resp = runtime::schedule_task(&m, req).unwrap();
    assert_eq!(resp.status, TaskStatus::Pending);
    assert_eq!(m.get_task(resp.task_id).unwrap().priority, DEFAULT_PRIORITY);
}

#[test]
fn test_status_response_round_trips_as_json() {
    let m = manager();
    let task = m
        .schedule_task(TaskType::ModelTest, "eval", serde_json::json!({}), None, 5)
        .unwrap();
    let resp = runtime::task_status(&m, task.id).unwrap();
    let value = serde_json::to_value(&resp).unwrap();
    assert_eq!(value["status"], "Pending");
    assert_eq!(value["task_type"], "ModelTest");
    let back: TaskStatusResponse = serde_json::from_value(value).unwrap();
    assert_eq!(back.task_id, task.id);
}

#[test]
fn test_unknown_task_status() {
    let m = manager();
    let err = runtime::task_status(&m, uuid::Uuid::new_v4()).unwrap_err();
    assert!(matches!(err, FabricError::TaskNotFound(_)));
    assert!(!runtime::cancel_task(&m, uuid::Uuid::new_v4()).accepted);
}

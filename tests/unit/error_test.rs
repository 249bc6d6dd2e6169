//! Tests for error types

use std::time::Duration;

use prometheus_task_fabric::core::{FabricError, HandlerError, TaskStatus, TaskType};
use uuid::Uuid;

#[test]
fn test_unknown_task_type_error() {
    let err = FabricError::UnknownTaskType(TaskType::Backtest);
    assert_eq!(format!("{}", err), "unknown task type: Backtest");
}

#[test]
fn test_queue_wait_timeout_error() {
    let err = FabricError::QueueWaitTimeout {
        queue: "default".to_string(),
        waited: Duration::from_secs(1),
    };
    assert_eq!(
        format!("{}", err),
        "queue wait timeout: queue `default` did not admit within 1s"
    );
}

#[test]
fn test_invalid_transition_error() {
    let id = Uuid::nil();
    let err = FabricError::InvalidTransition {
        id,
        from: TaskStatus::Completed,
        to: TaskStatus::Failed,
    };
    assert_eq!(
        format!("{}", err),
        format!("invalid transition for task {id}: Completed -> Failed")
    );
}

#[test]
fn test_interrupted_error() {
    let err = FabricError::InterruptedByRestart("worker gone".to_string());
    assert_eq!(format!("{}", err), "interrupted by restart: worker gone");
}

#[test]
fn test_handler_errors() {
    assert_eq!(HandlerError::Cancelled.to_string(), "task was cancelled");
    let err: HandlerError = anyhow::anyhow!("exchange unreachable").into();
    assert_eq!(err.to_string(), "exchange unreachable");
    let err = HandlerError::InvalidParameters("missing symbol".to_string());
    assert_eq!(err.to_string(), "invalid parameters: missing symbol");
}

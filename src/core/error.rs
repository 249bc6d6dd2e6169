//! Error types for scheduler operations.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use super::task::{TaskId, TaskStatus, TaskType};

/// Errors produced by fabric components.
#[derive(Debug, Error)]
pub enum FabricError {
    /// Schedule-time input was rejected; the task was never created.
    #[error("validation error: {0}")]
    Validation(String),
    /// No handler is registered for the task type.
    #[error("unknown task type: {0}")]
    UnknownTaskType(TaskType),
    /// The handler failed while executing.
    #[error("handler execution error: {0}")]
    HandlerExecution(String),
    /// Admission through a resource queue was not granted in time.
    #[error("queue wait timeout: queue `{queue}` did not admit within {waited:?}")]
    QueueWaitTimeout {
        /// Queue name.
        queue: String,
        /// Configured maximum wait.
        waited: Duration,
    },
    /// The task was running when the previous process stopped.
    #[error("interrupted by restart: {0}")]
    InterruptedByRestart(String),
    /// No task with this id.
    #[error("task {0} not found")]
    TaskNotFound(TaskId),
    /// A producer gave up waiting for the task to finish.
    #[error("timed out waiting for task {0}")]
    WaitTimeout(TaskId),
    /// No resource queue with this id.
    #[error("resource queue {0} not found")]
    QueueNotFound(Uuid),
    /// No resource container with this id.
    #[error("resource container {0} not found")]
    ContainerNotFound(Uuid),
    /// A status transition that the lifecycle does not allow.
    #[error("invalid transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        /// Task identifier.
        id: TaskId,
        /// Current status.
        from: TaskStatus,
        /// Requested status.
        to: TaskStatus,
    },
    /// A queue demands more units than a container will ever hold.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),
    /// The wait was abandoned because the task was cancelled.
    #[error("cancelled")]
    Cancelled,
    /// Persistence backend failure.
    #[error("storage error: {0}")]
    Storage(String),
    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),
    /// A worker thread or its runtime could not be started.
    #[error("worker error: {0}")]
    Worker(String),
    /// The component is shutting down.
    #[error("shutting down")]
    Shutdown,
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

//! Task lifecycle, handler dispatch and resource admission.

pub mod audit;
pub mod error;
pub mod handler;
pub mod hardware;
pub mod resource;
pub mod resource_service;
pub mod task;
pub mod task_manager;
pub mod task_processor;
pub mod training_job;

pub use audit::{build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink};
pub use error::{AppResult, FabricError};
pub use handler::{
    DynTaskHandler, HandlerError, HandlerRegistry, ProgressReporter, TaskContext, TaskHandler,
    TaskOutput, TaskParameters,
};
pub use hardware::{DetectedHardware, HardwareProbe, StaticProbe, SystemProbe};
pub use resource::{
    ContainerStatus, Lease, QueueOptions, QueueStatus, ResourceContainer, ResourceDemand,
    ResourceKind, ResourceQueue,
};
pub use resource_service::{ResourceService, DEFAULT_QUEUE_NAME};
pub use task::{BackgroundTask, TaskId, TaskStatus, TaskType, DEFAULT_PRIORITY};
pub use task_manager::{AdoptOutcome, BackgroundTaskManager};
pub use task_processor::{ProcessorStats, TaskProcessor, WorkerState, WorkerStats};
pub use training_job::{JobStatus, TrainingJob};

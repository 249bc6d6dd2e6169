//! Handler plugin contract: typed parameters, execution context and registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::error::FabricError;
use super::resource::Lease;
use super::task::{BackgroundTask, TaskId, TaskType};
use super::task_manager::BackgroundTaskManager;

/// Typed parameter record for one task type.
///
/// Parameters cross the scheduler boundary as opaque JSON; the handler
/// reconstructs and validates them.
pub trait TaskParameters: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Validate the parameters after deserialization.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the parameters are unusable.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Outcome of a handler that did not complete.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler observed its cancellation token and stopped.
    #[error("task was cancelled")]
    Cancelled,
    /// Parameters could not be reconstructed from the stored record.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    /// Any other failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Serialized handler result keyed by its type name.
#[derive(Debug, Clone)]
pub struct TaskOutput {
    /// Short type name of the result record.
    pub result_type: String,
    /// Serialized result.
    pub value: serde_json::Value,
}

/// Forwards a handler's progress into the task manager, in emission order.
#[derive(Clone)]
pub struct ProgressReporter {
    manager: Arc<BackgroundTaskManager>,
    task_id: TaskId,
}

impl ProgressReporter {
    pub(crate) const fn new(manager: Arc<BackgroundTaskManager>, task_id: TaskId) -> Self {
        Self { manager, task_id }
    }

    /// Report a percent and message.
    pub fn report(&self, percent: u8, message: impl Into<String>) {
        self.send(percent, Some(message.into()), None, None);
    }

    /// Report granular counters; percent is derived from them.
    pub fn report_counts(&self, current: u64, total: u64, message: impl Into<String>) {
        let percent = if total == 0 {
            0
        } else {
            u8::try_from(current.min(total).saturating_mul(100) / total).unwrap_or(100)
        };
        self.send(percent, Some(message.into()), Some(current), Some(total));
    }

    fn send(&self, percent: u8, message: Option<String>, current: Option<u64>, total: Option<u64>) {
        if let Err(e) = self
            .manager
            .update_task_progress(self.task_id, percent, message, current, total)
        {
            tracing::debug!(task_id = %self.task_id, error = %e, "progress update dropped");
        }
    }
}

/// Per-execution scope handed to a handler.
///
/// Carries the task snapshot taken at dequeue, the cancellation token the
/// handler must honor, the progress sink, and the resource lease.
pub struct TaskContext {
    task: BackgroundTask,
    token: CancellationToken,
    progress: ProgressReporter,
    lease: Option<Lease>,
}

impl TaskContext {
    /// Build a context for one execution.
    #[must_use]
    pub const fn new(
        task: BackgroundTask,
        token: CancellationToken,
        progress: ProgressReporter,
        lease: Option<Lease>,
    ) -> Self {
        Self {
            task,
            token,
            progress,
            lease,
        }
    }

    /// Task snapshot taken when the task was claimed.
    #[must_use]
    pub const fn task(&self) -> &BackgroundTask {
        &self.task
    }

    /// Task identifier.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.task.id
    }

    /// Cancellation token for this execution.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Safe-point check: `Err(HandlerError::Cancelled)` once cancellation was requested.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Cancelled`] when the token is cancelled.
    pub fn check_cancelled(&self) -> Result<(), HandlerError> {
        if self.token.is_cancelled() {
            Err(HandlerError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Progress sink.
    #[must_use]
    pub const fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    /// Lease granted for this execution, if the task ran under admission control.
    #[must_use]
    pub const fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }
}

/// Executes one task type.
///
/// Implementations check [`TaskContext::check_cancelled`] before each unit of
/// work. A handler that never checks runs to completion despite cancellation.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Parameter contract.
    type Params: TaskParameters;
    /// Result record written onto the task on success.
    type Output: Serialize + Send + 'static;

    /// Task type this handler executes.
    fn task_type(&self) -> TaskType;

    /// Execute the task.
    async fn execute(
        &self,
        params: Self::Params,
        ctx: &TaskContext,
    ) -> Result<Self::Output, HandlerError>;
}

/// Type-erased handler stored in the registry.
#[async_trait]
pub trait DynTaskHandler: Send + Sync {
    /// Task type this handler executes.
    fn handled_type(&self) -> TaskType;

    /// Reconstruct and validate a parameter record.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::Validation`] when the record is malformed or invalid.
    fn validate_parameters(&self, raw: &serde_json::Value) -> Result<(), FabricError>;

    /// Execute with an opaque parameter record.
    async fn execute_raw(
        &self,
        raw: serde_json::Value,
        ctx: &TaskContext,
    ) -> Result<TaskOutput, HandlerError>;
}

#[async_trait]
impl<H> DynTaskHandler for H
where
    H: TaskHandler,
{
    fn handled_type(&self) -> TaskType {
        self.task_type()
    }

    fn validate_parameters(&self, raw: &serde_json::Value) -> Result<(), FabricError> {
        let params: H::Params = serde_json::from_value(raw.clone()).map_err(|e| {
            FabricError::Validation(format!("{} parameters: {e}", self.task_type()))
        })?;
        params.validate().map_err(|reason| {
            FabricError::Validation(format!("{} parameters: {reason}", self.task_type()))
        })
    }

    async fn execute_raw(
        &self,
        raw: serde_json::Value,
        ctx: &TaskContext,
    ) -> Result<TaskOutput, HandlerError> {
        let params: H::Params = serde_json::from_value(raw)
            .map_err(|e| HandlerError::InvalidParameters(e.to_string()))?;
        let output = self.execute(params, ctx).await?;
        let value = serde_json::to_value(&output).map_err(anyhow::Error::from)?;
        Ok(TaskOutput {
            result_type: short_type_name::<H::Output>().to_string(),
            value,
        })
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Mapping from task type to handler, resolved once at startup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn DynTaskHandler>>,
}

impl HandlerRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for its type.
    pub fn register<H: TaskHandler>(&mut self, handler: H) {
        self.register_arc(Arc::new(handler));
    }

    /// Register an already shared handler.
    pub fn register_arc(&mut self, handler: Arc<dyn DynTaskHandler>) {
        let task_type = handler.handled_type();
        if self.handlers.insert(task_type, handler).is_some() {
            tracing::warn!(%task_type, "replacing registered handler");
        }
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with_handler<H: TaskHandler>(mut self, handler: H) -> Self {
        self.register(handler);
        self
    }

    /// Resolve the handler for a task type.
    #[must_use]
    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn DynTaskHandler>> {
        self.handlers.get(&task_type).cloned()
    }

    /// Registered task types.
    #[must_use]
    pub fn task_types(&self) -> Vec<TaskType> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort();
        types
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize)]
    struct EchoParams {
        text: String,
    }

    impl TaskParameters for EchoParams {
        fn validate(&self) -> Result<(), String> {
            if self.text.is_empty() {
                return Err("text must not be empty".into());
            }
            Ok(())
        }
    }

    #[derive(Serialize)]
    struct EchoResult {
        text: String,
    }

    struct EchoHandler;

    #[async_trait]
    impl TaskHandler for EchoHandler {
        type Params = EchoParams;
        type Output = EchoResult;

        fn task_type(&self) -> TaskType {
            TaskType::ModelTest
        }

        async fn execute(
            &self,
            params: EchoParams,
            _ctx: &TaskContext,
        ) -> Result<EchoResult, HandlerError> {
            Ok(EchoResult { text: params.text })
        }
    }

    #[test]
    fn registry_resolves_by_type() {
        let registry = HandlerRegistry::new().with_handler(EchoHandler);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(TaskType::ModelTest).is_some());
        assert!(registry.get(TaskType::Backtest).is_none());
        assert_eq!(registry.task_types(), vec![TaskType::ModelTest]);
    }

    #[test]
    fn parameter_contract_validates() {
        let handler = EchoHandler;
        assert!(handler
            .validate_parameters(&serde_json::json!({"text": "hi"}))
            .is_ok());
        let err = handler
            .validate_parameters(&serde_json::json!({"text": ""}))
            .unwrap_err();
        assert!(matches!(err, FabricError::Validation(_)));
        let err = handler
            .validate_parameters(&serde_json::json!({"other": 1}))
            .unwrap_err();
        assert!(matches!(err, FabricError::Validation(_)));
    }

    #[test]
    fn short_type_names() {
        assert_eq!(short_type_name::<EchoResult>(), "EchoResult");
    }
}

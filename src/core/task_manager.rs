//! Background task manager: the registry that owns task status transitions.
//!
//! One instance is constructed at process start and shared by handle with the
//! task processor and every producer. All state transitions happen inside a
//! short write-locked critical section; reads take the read lock. Waiting
//! (for new work or for a task to finish) never happens under the lock.
//!
//! Row writes after a transition happen outside the state lock, serialized by
//! a separate mutex that re-reads the latest row, so the store's last row for
//! a task is never older than its last in-memory change.
//!
//! New work is announced through a counting semaphore: every scheduled task
//! adds one permit, so a signal sent before a worker starts waiting is never
//! lost and any number of workers can wait concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;

use super::audit::{build_audit_event, AuditAction, AuditSink};
use super::error::FabricError;
use super::handler::{HandlerRegistry, TaskOutput, TaskParameters};
use super::task::{BackgroundTask, TaskId, TaskStatus, TaskType};
use crate::infra::queue::PendingQueue;
use crate::infra::store::TaskStore;

/// Result of handing a persisted row to the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdoptOutcome {
    /// Pending row placed back in the queue.
    Requeued,
    /// Terminal row loaded for queries.
    Loaded,
    /// The manager already tracks this id.
    AlreadyKnown,
}

#[derive(Default)]
struct ManagerState {
    tasks: HashMap<TaskId, BackgroundTask>,
    pending: PendingQueue,
    tokens: HashMap<TaskId, CancellationToken>,
    next_sequence: u64,
}

/// Central registry of background tasks.
pub struct BackgroundTaskManager {
    store: Arc<dyn TaskStore>,
    registry: Arc<HandlerRegistry>,
    state: RwLock<ManagerState>,
    write_order: Mutex<()>,
    signal: Semaphore,
    terminal_tx: watch::Sender<u64>,
    audit: Option<Mutex<Box<dyn AuditSink>>>,
}

impl BackgroundTaskManager {
    /// Create an empty manager over a task store and a handler registry.
    #[must_use]
    pub fn new(store: Arc<dyn TaskStore>, registry: Arc<HandlerRegistry>) -> Self {
        let (terminal_tx, _) = watch::channel(0);
        Self {
            store,
            registry,
            state: RwLock::new(ManagerState::default()),
            write_order: Mutex::new(()),
            signal: Semaphore::new(0),
            terminal_tx,
            audit: None,
        }
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Box<dyn AuditSink>) -> Self {
        self.audit = Some(Mutex::new(audit));
        self
    }

    /// Handler registry used for parameter validation.
    #[must_use]
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Create a Pending task, persist it and signal waiting workers.
    ///
    /// Parameters are validated by the registered handler's parameter
    /// contract. A task type with no registered handler is accepted here and
    /// fails when a worker picks it up.
    ///
    /// # Errors
    ///
    /// - [`FabricError::Validation`] if the name is empty or the parameters are rejected
    /// - [`FabricError::Storage`] if the row cannot be persisted
    pub fn schedule_task(
        &self,
        task_type: TaskType,
        name: impl Into<String>,
        parameters: serde_json::Value,
        related_entity_id: Option<String>,
        priority: i32,
    ) -> Result<BackgroundTask, FabricError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(FabricError::Validation("task name must not be empty".into()));
        }
        if let Some(handler) = self.registry.get(task_type) {
            handler.validate_parameters(&parameters)?;
        }

        let task = {
            let mut state = self.state.write();
            let task = BackgroundTask::new(
                task_type,
                name,
                parameters,
                related_entity_id,
                priority,
                state.next_sequence,
            );
            self.store.upsert_task(&task)?;
            state.next_sequence += 1;
            state.pending.push(&task);
            state.tokens.insert(task.id, CancellationToken::new());
            state.tasks.insert(task.id, task.clone());
            task
        };

        self.record(&task, AuditAction::Schedule, None);
        tracing::info!(
            task_id = %task.id,
            task_type = %task.task_type,
            priority = task.priority,
            "task scheduled"
        );
        self.signal_new_task();
        Ok(task)
    }

    /// Schedule with typed parameters.
    ///
    /// # Errors
    ///
    /// Same as [`Self::schedule_task`], plus [`FabricError::Validation`] if the
    /// parameters cannot be serialized.
    pub fn schedule_typed<P: TaskParameters>(
        &self,
        task_type: TaskType,
        name: impl Into<String>,
        params: &P,
        related_entity_id: Option<String>,
        priority: i32,
    ) -> Result<BackgroundTask, FabricError> {
        let parameters = serde_json::to_value(params)
            .map_err(|e| FabricError::Validation(format!("parameters: {e}")))?;
        self.schedule_task(task_type, name, parameters, related_entity_id, priority)
    }

    /// Claim the best Pending task and transition it to Running.
    ///
    /// The pop and the status change happen under one write lock, so a task is
    /// claimed by at most one caller. Stale heap entries (cancelled while
    /// pending) are skipped.
    pub fn dequeue_next_task(&self) -> Option<BackgroundTask> {
        let claimed = {
            let mut state = self.state.write();
            loop {
                let id = state.pending.pop()?;
                let Some(task) = state.tasks.get_mut(&id) else {
                    continue;
                };
                if task.status != TaskStatus::Pending {
                    continue;
                }
                task.mark_running();
                break task.clone();
            }
        };
        self.persist_latest(claimed.id);
        self.record(&claimed, AuditAction::Start, None);
        tracing::debug!(task_id = %claimed.id, "task claimed");
        Some(claimed)
    }

    /// Apply a progress report to a Running task.
    ///
    /// # Errors
    ///
    /// - [`FabricError::TaskNotFound`] for an unknown id
    /// - [`FabricError::InvalidTransition`] if the task is not Running
    pub fn update_task_progress(
        &self,
        id: TaskId,
        percent: u8,
        message: Option<String>,
        current: Option<u64>,
        total: Option<u64>,
    ) -> Result<(), FabricError> {
        let task = {
            let mut state = self.state.write();
            let task = state
                .tasks
                .get_mut(&id)
                .ok_or(FabricError::TaskNotFound(id))?;
            if task.status != TaskStatus::Running {
                return Err(FabricError::InvalidTransition {
                    id,
                    from: task.status,
                    to: TaskStatus::Running,
                });
            }
            task.apply_progress(percent, message, current, total);
            task.clone()
        };
        self.persist_latest(id);
        self.record(
            &task,
            AuditAction::Progress,
            Some(task.progress_percent.to_string()),
        );
        Ok(())
    }

    /// Transition a Running task to Completed.
    ///
    /// # Errors
    ///
    /// [`FabricError::InvalidTransition`] if the task is not Running (e.g. a
    /// second completion), [`FabricError::TaskNotFound`] for an unknown id.
    pub fn complete_task(&self, id: TaskId, output: Option<TaskOutput>) -> Result<(), FabricError> {
        let (result, result_type) = match output {
            Some(o) => (Some(o.value), Some(o.result_type)),
            None => (None, None),
        };
        let task = self.finish(id, TaskStatus::Completed, |t| {
            t.mark_completed(result, result_type);
        })?;
        self.record(&task, AuditAction::Complete, None);
        tracing::info!(task_id = %id, "task completed");
        Ok(())
    }

    /// Transition a Running task to Failed with a message.
    ///
    /// # Errors
    ///
    /// [`FabricError::InvalidTransition`] if the task is not Running,
    /// [`FabricError::TaskNotFound`] for an unknown id.
    pub fn fail_task(&self, id: TaskId, error_message: impl Into<String>) -> Result<(), FabricError> {
        let error_message = error_message.into();
        let task = self.finish(id, TaskStatus::Failed, |t| t.mark_failed(error_message))?;
        self.record(&task, AuditAction::Fail, task.error_message.clone());
        tracing::warn!(
            task_id = %id,
            error = task.error_message.as_deref().unwrap_or_default(),
            "task failed"
        );
        Ok(())
    }

    /// Record that a Running task unwound after cancellation.
    ///
    /// # Errors
    ///
    /// [`FabricError::InvalidTransition`] if the task is not Running,
    /// [`FabricError::TaskNotFound`] for an unknown id.
    pub fn mark_cancelled(&self, id: TaskId) -> Result<(), FabricError> {
        let task = self.finish(id, TaskStatus::Cancelled, BackgroundTask::mark_cancelled)?;
        self.record(&task, AuditAction::Cancel, None);
        tracing::info!(task_id = %id, "running task cancelled");
        Ok(())
    }

    fn finish(
        &self,
        id: TaskId,
        to: TaskStatus,
        apply: impl FnOnce(&mut BackgroundTask),
    ) -> Result<BackgroundTask, FabricError> {
        let task = {
            let mut state = self.state.write();
            let task = state
                .tasks
                .get_mut(&id)
                .ok_or(FabricError::TaskNotFound(id))?;
            if task.status != TaskStatus::Running {
                return Err(FabricError::InvalidTransition {
                    id,
                    from: task.status,
                    to,
                });
            }
            apply(task);
            let task = task.clone();
            state.tokens.remove(&id);
            task
        };
        self.persist_latest(id);
        self.notify_terminal();
        Ok(task)
    }

    /// Request cancellation.
    ///
    /// A Pending task becomes Cancelled immediately. A Running task has its
    /// token cancelled and stays Running until its handler unwinds. Returns
    /// `false` for terminal or unknown tasks.
    pub fn cancel_task(&self, id: TaskId) -> bool {
        let mut state = self.state.write();
        let Some(task) = state.tasks.get_mut(&id) else {
            tracing::debug!(task_id = %id, "cancel requested for unknown task");
            return false;
        };
        match task.status {
            TaskStatus::Pending => {
                task.mark_cancelled();
                let task = task.clone();
                if let Some(token) = state.tokens.remove(&id) {
                    token.cancel();
                }
                drop(state);
                self.persist_latest(id);
                self.record(&task, AuditAction::Cancel, Some("pending".into()));
                tracing::info!(task_id = %id, "pending task cancelled");
                self.notify_terminal();
                true
            }
            TaskStatus::Running => {
                let task = task.clone();
                if let Some(token) = state.tokens.get(&id) {
                    token.cancel();
                }
                drop(state);
                self.record(&task, AuditAction::Cancel, Some("requested".into()));
                tracing::info!(task_id = %id, "cancellation requested for running task");
                true
            }
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => false,
        }
    }

    /// Snapshot of one task.
    #[must_use]
    pub fn get_task(&self, id: TaskId) -> Option<BackgroundTask> {
        self.state.read().tasks.get(&id).cloned()
    }

    /// Tasks in creation order, optionally filtered by status.
    #[must_use]
    pub fn get_tasks(&self, status: Option<TaskStatus>) -> Vec<BackgroundTask> {
        self.collect(|t| status.is_none_or(|s| t.status == s))
    }

    /// Tasks belonging to an entity, in creation order.
    #[must_use]
    pub fn get_tasks_for_entity(&self, entity_id: &str) -> Vec<BackgroundTask> {
        self.collect(|t| t.related_entity_id.as_deref() == Some(entity_id))
    }

    fn collect(&self, pred: impl Fn(&BackgroundTask) -> bool) -> Vec<BackgroundTask> {
        let mut tasks: Vec<_> = self
            .state
            .read()
            .tasks
            .values()
            .filter(|t| pred(t))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.sequence.cmp(&b.sequence))
        });
        tasks
    }

    /// Token the handler of a Pending or Running task must honor.
    #[must_use]
    pub fn get_cancellation_token(&self, id: TaskId) -> Option<CancellationToken> {
        self.state.read().tokens.get(&id).cloned()
    }

    /// Number of Pending tasks.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state
            .read()
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .count()
    }

    /// Whether this process is running the task right now.
    #[must_use]
    pub fn is_live(&self, id: TaskId) -> bool {
        let state = self.state.read();
        state.tokens.contains_key(&id)
            && state
                .tasks
                .get(&id)
                .is_some_and(|t| t.status == TaskStatus::Running)
    }

    /// Announce one unit of new work.
    pub fn signal_new_task(&self) {
        self.signal.add_permits(1);
    }

    /// Suspend until new work is signaled (`true`) or `ct` is cancelled (`false`).
    pub async fn wait_for_tasks(&self, ct: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            () = ct.cancelled() => false,
            permit = self.signal.acquire() => match permit {
                Ok(permit) => {
                    permit.forget();
                    true
                }
                Err(_) => false,
            },
        }
    }

    /// Wait until the task reaches a terminal state.
    ///
    /// # Errors
    ///
    /// - [`FabricError::TaskNotFound`] for an unknown id
    /// - [`FabricError::WaitTimeout`] if the task is still active after `timeout`
    pub async fn wait_for_terminal(
        &self,
        id: TaskId,
        timeout: Duration,
    ) -> Result<BackgroundTask, FabricError> {
        let mut rx = self.terminal_tx.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let task = self.get_task(id).ok_or(FabricError::TaskNotFound(id))?;
            if task.status.is_terminal() {
                return Ok(task);
            }
            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(FabricError::Shutdown),
                Err(_) => return Err(FabricError::WaitTimeout(id)),
            }
        }
    }

    /// Take ownership of a persisted row from a previous process lifetime.
    ///
    /// Pending rows re-enter the queue with their original ordering keys and
    /// are signaled; other rows are loaded for queries only.
    pub fn adopt(&self, task: BackgroundTask) -> AdoptOutcome {
        let outcome = {
            let mut state = self.state.write();
            if state.tasks.contains_key(&task.id) {
                return AdoptOutcome::AlreadyKnown;
            }
            state.next_sequence = state.next_sequence.max(task.sequence + 1);
            if task.status == TaskStatus::Pending {
                state.pending.push(&task);
                state.tokens.insert(task.id, CancellationToken::new());
                state.tasks.insert(task.id, task.clone());
                AdoptOutcome::Requeued
            } else {
                state.tasks.insert(task.id, task.clone());
                AdoptOutcome::Loaded
            }
        };
        if outcome == AdoptOutcome::Requeued {
            self.record(&task, AuditAction::Recover, Some("requeued".into()));
            tracing::info!(task_id = %task.id, "pending task restored");
            self.signal_new_task();
        }
        outcome
    }

    /// Write the current row for `id`. Takes `write_order` before the read
    /// lock; never call with the state lock held.
    fn persist_latest(&self, id: TaskId) {
        let _order = self.write_order.lock();
        let Some(task) = self.state.read().tasks.get(&id).cloned() else {
            return;
        };
        if let Err(e) = self.store.upsert_task(&task) {
            tracing::error!(task_id = %id, error = %e, "failed to persist task row");
        }
    }

    fn notify_terminal(&self) {
        self.terminal_tx.send_modify(|v| *v = v.wrapping_add(1));
    }

    pub(crate) fn record(&self, task: &BackgroundTask, action: AuditAction, payload: Option<String>) {
        if let Some(audit) = &self.audit {
            audit.lock().record(build_audit_event(task, action, payload));
        }
    }
}

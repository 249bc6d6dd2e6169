//! Task lifecycle audit trail.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use super::task::{BackgroundTask, TaskId, TaskType};
use crate::util::clock::now_ms;

/// Lifecycle action recorded for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    /// Task created as Pending.
    Schedule,
    /// Task claimed by a worker.
    Start,
    /// Progress update applied.
    Progress,
    /// Task completed.
    Complete,
    /// Task failed.
    Fail,
    /// Task cancelled, or cancellation requested while running.
    Cancel,
    /// Task row reconciled by startup recovery.
    Recover,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Schedule => "schedule",
            Self::Start => "start",
            Self::Progress => "progress",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Cancel => "cancel",
            Self::Recover => "recover",
        };
        f.write_str(s)
    }
}

/// Audit event structure.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Related task identifier.
    pub task_id: TaskId,
    /// Related task type.
    pub task_type: TaskType,
    /// Action taken.
    pub action: AuditAction,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub payload: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// Bounded in-memory audit sink. Clones share the same buffer.
#[derive(Clone)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<VecDeque<AuditEvent>>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events.min(1024)))),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Events for one task, oldest first.
    #[must_use]
    pub fn events_for(&self, task_id: TaskId) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Helper to build an audit event for a task.
#[must_use]
pub fn build_audit_event(
    task: &BackgroundTask,
    action: AuditAction,
    payload: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: Uuid::new_v4().to_string(),
        task_id: task.id,
        task_type: task.task_type,
        action,
        created_at_ms: now_ms(),
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_is_bounded() {
        let task = BackgroundTask::new(
            TaskType::Backtest,
            "bt",
            serde_json::Value::Null,
            None,
            100,
            0,
        );
        let mut sink = InMemoryAuditSink::new(2);
        let reader = sink.clone();
        sink.record(build_audit_event(&task, AuditAction::Schedule, None));
        sink.record(build_audit_event(&task, AuditAction::Start, None));
        sink.record(build_audit_event(&task, AuditAction::Complete, None));
        let actions: Vec<_> = reader.events().iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![AuditAction::Start, AuditAction::Complete]);
        assert_eq!(AuditAction::Complete.to_string(), "complete");
    }
}

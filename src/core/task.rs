//! Background task model and its status lifecycle.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util::clock::now_ms;

/// Unique task identifier, generated at schedule time.
pub type TaskId = Uuid;

/// Default scheduling priority. Lower values run first.
pub const DEFAULT_PRIORITY: i32 = 100;

/// Kind of work a task performs; selects the handler that executes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskType {
    /// Market data ingestion from an exchange API.
    DataIngestion,
    /// Model training run.
    ModelTraining,
    /// Evaluation of a trained model against a held-out set.
    ModelTest,
    /// Strategy backtest over historical data.
    Backtest,
}

impl TaskType {
    /// Stable name used to key serialized parameter records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DataIngestion => "DataIngestion",
            Self::ModelTraining => "ModelTraining",
            Self::ModelTest => "ModelTest",
            Self::Backtest => "Backtest",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Waiting to be claimed by a worker.
    Pending,
    /// Claimed by a worker and executing.
    Running,
    /// Finished successfully; carries a result.
    Completed,
    /// Finished with an error message.
    Failed,
    /// Cancelled before or during execution.
    Cancelled,
}

impl TaskStatus {
    /// Whether the status is final.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// A schedulable, cancellable unit of background work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundTask {
    /// Unique identifier.
    pub id: TaskId,
    /// Human-readable name.
    pub name: String,
    /// Task type; selects the handler.
    pub task_type: TaskType,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Progress percent, 0..=100.
    pub progress_percent: u8,
    /// Latest progress message.
    pub progress_message: Option<String>,
    /// Units of work processed so far.
    pub progress_current: u64,
    /// Total units of work, when known.
    pub progress_total: u64,
    /// Opaque parameter record, interpreted only by the handler.
    pub parameters: serde_json::Value,
    /// Opaque result record; present only when Completed.
    pub result: Option<serde_json::Value>,
    /// Type name of the result record.
    pub result_type: Option<String>,
    /// Error message; present only when Failed.
    pub error_message: Option<String>,
    /// Scheduling priority; lower runs first.
    pub priority: i32,
    /// Entity this task belongs to (dataset, job, ...).
    pub related_entity_id: Option<String>,
    /// Creation time, ms since epoch.
    pub created_at_ms: u128,
    /// Time the task was claimed, ms since epoch.
    pub started_at_ms: Option<u128>,
    /// Time the task reached a terminal state, ms since epoch.
    pub completed_at_ms: Option<u128>,
    /// Monotonic schedule order, breaks creation-time ties.
    pub sequence: u64,
}

impl BackgroundTask {
    /// Build a new Pending task.
    pub fn new(
        task_type: TaskType,
        name: impl Into<String>,
        parameters: serde_json::Value,
        related_entity_id: Option<String>,
        priority: i32,
        sequence: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            task_type,
            status: TaskStatus::Pending,
            progress_percent: 0,
            progress_message: None,
            progress_current: 0,
            progress_total: 0,
            parameters,
            result: None,
            result_type: None,
            error_message: None,
            priority,
            related_entity_id,
            created_at_ms: now_ms(),
            started_at_ms: None,
            completed_at_ms: None,
            sequence,
        }
    }

    /// Check the result/error invariant for the current status.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated rule.
    pub fn check_invariants(&self) -> Result<(), String> {
        match self.status {
            TaskStatus::Pending | TaskStatus::Running => {
                if self.result.is_some() || self.error_message.is_some() {
                    return Err(format!(
                        "{} task carries a result or error message",
                        self.status
                    ));
                }
            }
            TaskStatus::Completed => {
                if self.error_message.is_some() {
                    return Err("completed task carries an error message".into());
                }
                if self.progress_percent != 100 {
                    return Err("completed task progress is not 100".into());
                }
            }
            TaskStatus::Failed => {
                if self.result.is_some() {
                    return Err("failed task carries a result".into());
                }
                if self.error_message.is_none() {
                    return Err("failed task has no error message".into());
                }
            }
            TaskStatus::Cancelled => {
                if self.result.is_some() {
                    return Err("cancelled task carries a result".into());
                }
            }
        }
        if self.progress_percent > 100 {
            return Err(format!("progress {} exceeds 100", self.progress_percent));
        }
        Ok(())
    }

    pub(crate) fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at_ms = Some(now_ms());
    }

    pub(crate) fn mark_completed(
        &mut self,
        result: Option<serde_json::Value>,
        result_type: Option<String>,
    ) {
        self.status = TaskStatus::Completed;
        self.progress_percent = 100;
        self.result = result;
        self.result_type = result_type;
        self.error_message = None;
        self.completed_at_ms = Some(now_ms());
    }

    pub(crate) fn mark_failed(&mut self, error_message: String) {
        self.status = TaskStatus::Failed;
        self.result = None;
        self.result_type = None;
        self.error_message = Some(error_message);
        self.completed_at_ms = Some(now_ms());
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.result = None;
        self.result_type = None;
        self.completed_at_ms = Some(now_ms());
    }

    /// Apply a progress report. Percent is clamped to 0..=100 and never decreases.
    pub(crate) fn apply_progress(
        &mut self,
        percent: u8,
        message: Option<String>,
        current: Option<u64>,
        total: Option<u64>,
    ) {
        self.progress_percent = percent.min(100).max(self.progress_percent);
        if message.is_some() {
            self.progress_message = message;
        }
        if let Some(current) = current {
            self.progress_current = current;
        }
        if let Some(total) = total {
            self.progress_total = total;
        }
    }
}

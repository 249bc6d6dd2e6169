//! In-memory pending queue ordered by priority and creation time.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::core::task::{BackgroundTask, TaskId};

/// Heap entry: lower priority value first, then earlier creation, then schedule order.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingEntry {
    priority: i32,
    created_at_ms: u128,
    sequence: u64,
    id: TaskId,
}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse every key so the smallest wins.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.created_at_ms.cmp(&self.created_at_ms))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Priority heap of pending task ids.
///
/// Entries are never removed eagerly; callers skip ids whose task is no longer
/// Pending (e.g. cancelled) when popping.
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: BinaryHeap<PendingEntry>,
}

impl PendingQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task by its ordering keys. O(log n).
    pub fn push(&mut self, task: &BackgroundTask) {
        self.entries.push(PendingEntry {
            priority: task.priority,
            created_at_ms: task.created_at_ms,
            sequence: task.sequence,
            id: task.id,
        });
    }

    /// Pop the best id. O(log n).
    pub fn pop(&mut self) -> Option<TaskId> {
        self.entries.pop().map(|e| e.id)
    }

    /// Number of entries, including stale ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the heap is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::TaskType;

    fn make_task(priority: i32, created_at_ms: u128, sequence: u64) -> BackgroundTask {
        let mut task = BackgroundTask::new(
            TaskType::DataIngestion,
            format!("task-{sequence}"),
            serde_json::Value::Null,
            None,
            priority,
            sequence,
        );
        task.created_at_ms = created_at_ms;
        task
    }

    #[test]
    fn test_priority_ordering() {
        let mut q = PendingQueue::new();
        let a = make_task(300, 100, 0);
        let b = make_task(100, 200, 1);
        let c = make_task(200, 300, 2);
        q.push(&a);
        q.push(&b);
        q.push(&c);

        assert_eq!(q.pop(), Some(b.id));
        assert_eq!(q.pop(), Some(c.id));
        assert_eq!(q.pop(), Some(a.id));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_fifo_within_priority() {
        let mut q = PendingQueue::new();
        let late = make_task(100, 300, 0);
        let early = make_task(100, 100, 1);
        let middle = make_task(100, 200, 2);
        q.push(&late);
        q.push(&early);
        q.push(&middle);

        assert_eq!(q.pop(), Some(early.id));
        assert_eq!(q.pop(), Some(middle.id));
        assert_eq!(q.pop(), Some(late.id));
    }

    #[test]
    fn test_sequence_breaks_timestamp_ties() {
        let mut q = PendingQueue::new();
        let second = make_task(100, 100, 8);
        let first = make_task(100, 100, 7);
        q.push(&second);
        q.push(&first);

        assert_eq!(q.pop(), Some(first.id));
        assert_eq!(q.pop(), Some(second.id));
    }

    #[test]
    fn test_empty_queue() {
        let mut q = PendingQueue::new();
        assert!(q.is_empty());
        assert_eq!(q.pop(), None);
        assert_eq!(q.len(), 0);
    }
}

//! Tests for utility functions

use prometheus_task_fabric::core::{BackgroundTask, TaskType};
use prometheus_task_fabric::infra::PendingQueue;
use prometheus_task_fabric::util::{init_tracing, now_ms};

#[test]
fn test_now_ms_is_monotonic_enough() {
    let a = now_ms();
    let b = now_ms();
    assert!(a > 1_600_000_000_000);
    assert!(b >= a);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    tracing::info!("tracing initialised twice without panicking");
}

#[test]
fn test_pending_queue_orders_by_priority_then_age() {
    let mut queue = PendingQueue::new();
    let make = |priority, sequence| {
        let mut t = BackgroundTask::new(
            TaskType::Backtest,
            "t",
            serde_json::Value::Null,
            None,
            priority,
            sequence,
        );
        t.created_at_ms = 1;
        t
    };
    let a = make(200, 0);
    let b = make(100, 1);
    let c = make(100, 2);
    for t in [&a, &b, &c] {
        queue.push(t);
    }
    assert_eq!(queue.len(), 3);
    assert_eq!(queue.pop(), Some(b.id));
    assert_eq!(queue.pop(), Some(c.id));
    assert_eq!(queue.pop(), Some(a.id));
    assert!(queue.is_empty());
}

//! Tests for audit sink

use prometheus_task_fabric::core::{
    build_audit_event, AuditAction, AuditSink, BackgroundTask, InMemoryAuditSink, TaskType,
};

fn task(name: &str) -> BackgroundTask {
    BackgroundTask::new(TaskType::ModelTraining, name, serde_json::Value::Null, None, 100, 0)
}

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);
    let t = task("train");

    let event = build_audit_event(&t, AuditAction::Fail, Some("oom".to_string()));
    sink.record(event);
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0].task_id, t.id);
    assert_eq!(events[0].task_type, TaskType::ModelTraining);
    assert_eq!(events[0].action, AuditAction::Fail);
    assert_eq!(events[0].payload.as_deref(), Some("oom"));
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);
    let t = task("train");
    for action in [AuditAction::Schedule, AuditAction::Start, AuditAction::Complete] {
        sink.record(build_audit_event(&t, action, None));
    }
    let actions: Vec<_> = sink.events().iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![AuditAction::Start, AuditAction::Complete]);
}

#[test]
fn test_events_for_filters_by_task() {
    let mut sink = InMemoryAuditSink::new(10);
    let a = task("a");
    let b = task("b");
    sink.record(build_audit_event(&a, AuditAction::Schedule, None));
    sink.record(build_audit_event(&b, AuditAction::Schedule, None));
    sink.record(build_audit_event(&a, AuditAction::Cancel, Some("pending".into())));
    assert_eq!(sink.events_for(a.id).len(), 2);
    assert_eq!(sink.events_for(b.id).len(), 1);
}

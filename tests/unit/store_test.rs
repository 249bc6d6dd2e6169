//! Tests for persistence backends

use prometheus_task_fabric::core::{
    BackgroundTask, JobStatus, ResourceContainer, ResourceKind, TaskStatus, TaskType, TrainingJob,
};
use prometheus_task_fabric::infra::store::{
    InMemoryStore, JsonFileStore, ResourceStore, TaskStore, TrainingJobStore,
};

fn task(entity: Option<&str>) -> BackgroundTask {
    BackgroundTask::new(
        TaskType::DataIngestion,
        "ingest",
        serde_json::json!({"symbol": "BTCUSDT"}),
        entity.map(str::to_string),
        100,
        0,
    )
}

#[test]
fn test_file_store_replays_last_row() {
    let dir = tempfile::tempdir().unwrap();
    let mut t = task(Some("dataset-1"));
    {
        let store = JsonFileStore::open(dir.path()).unwrap();
        store.upsert_task(&t).unwrap();
        t.status = TaskStatus::Running;
        store.upsert_task(&t).unwrap();
    }

    let store = JsonFileStore::open(dir.path()).unwrap();
    assert_eq!(store.skipped_rows(), 0);
    let rows = store.list_tasks(None).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, TaskStatus::Running);
    assert_eq!(store.list_tasks_for_entity("dataset-1").unwrap().len(), 1);
    assert!(store.list_tasks(Some(TaskStatus::Pending)).unwrap().is_empty());
}

#[test]
fn test_file_store_compaction_keeps_live_rows() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::open(dir.path()).unwrap();
    let mut t = task(None);
    for status in [TaskStatus::Pending, TaskStatus::Running, TaskStatus::Failed] {
        t.status = status;
        if status == TaskStatus::Failed {
            t.error_message = Some("boom".into());
        }
        store.upsert_task(&t).unwrap();
    }
    store
        .upsert_container(&ResourceContainer::new("cpu", ResourceKind::Cpu, 4))
        .unwrap();
    store.compact().unwrap();

    let log = std::fs::read_to_string(dir.path().join("tasks.jsonl")).unwrap();
    assert_eq!(log.lines().count(), 1);
    let reopened = JsonFileStore::open(dir.path()).unwrap();
    assert_eq!(
        reopened.get_task(t.id).unwrap().unwrap().status,
        TaskStatus::Failed
    );
    assert_eq!(reopened.list_containers().unwrap().len(), 1);
}

#[test]
fn test_training_jobs_filter_by_status() {
    let store = InMemoryStore::new();
    let queued = TrainingJob::new("queued");
    let mut running = TrainingJob::new("running");
    running.status = JobStatus::Running;
    store.upsert_training_job(&queued).unwrap();
    store.upsert_training_job(&running).unwrap();

    let rows = store.list_training_jobs(Some(JobStatus::Running)).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, running.id);
    assert_eq!(store.list_training_jobs(None).unwrap().len(), 2);
    assert!(store.get_training_job(queued.id).unwrap().is_some());
}

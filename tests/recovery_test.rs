//! Startup recovery tests
//!
//! Rows left behind by a previous process are reconciled before any worker
//! starts:
//! - Running rows become Failed with an interruption message, exactly once
//! - Pending rows are requeued with their original ordering
//! - Corrupt rows are skipped
//! - Running training jobs are failed and their leases released

use std::sync::Arc;
use std::time::Duration;

use prometheus_task_fabric::builders::FabricBuilder;
use prometheus_task_fabric::config::{FabricConfig, ProcessorConfig};
use prometheus_task_fabric::core::{
    AuditAction, BackgroundTask, BackgroundTaskManager, HandlerRegistry, InMemoryAuditSink,
    JobStatus, ResourceService, StaticProbe, TaskStatus, TaskType, TrainingJob,
};
use prometheus_task_fabric::handlers::{DataIngestionHandler, InMemoryKlineSink, SyntheticKlineSource};
use prometheus_task_fabric::infra::store::{
    InMemoryStore, JsonFileStore, TaskStore, TrainingJobStore,
};
use prometheus_task_fabric::recovery::{OperationRecovery, TrainingJobRecovery};
use serde_json::json;
use tokio_util::sync::CancellationToken;

// ============================================================================
// HELPERS
// ============================================================================

const HOUR: u64 = 3_600_000;

fn row(name: &str, status: TaskStatus, priority: i32, sequence: u64) -> BackgroundTask {
    let mut task = BackgroundTask::new(
        TaskType::Backtest,
        name,
        json!({}),
        None,
        priority,
        sequence,
    );
    task.status = status;
    if status != TaskStatus::Pending {
        task.started_at_ms = Some(task.created_at_ms);
    }
    if status == TaskStatus::Completed {
        task.progress_percent = 100;
        task.result = Some(json!({"ok": true}));
        task.completed_at_ms = Some(task.created_at_ms);
    }
    task
}

fn manager_over(store: Arc<dyn TaskStore>) -> Arc<BackgroundTaskManager> {
    Arc::new(BackgroundTaskManager::new(store, Arc::new(HandlerRegistry::new())))
}

// ============================================================================
// OPERATION RECOVERY
// ============================================================================

#[test]
fn test_running_row_is_failed_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let running = row("orphan", TaskStatus::Running, 100, 0);
    {
        let store = JsonFileStore::open(dir.path()).unwrap();
        store.upsert_task(&running).unwrap();
    }

    let store: Arc<dyn TaskStore> = Arc::new(JsonFileStore::open(dir.path()).unwrap());
    let sink = InMemoryAuditSink::new(100);
    let manager = Arc::new(
        BackgroundTaskManager::new(Arc::clone(&store), Arc::new(HandlerRegistry::new()))
            .with_audit(Box::new(sink.clone())),
    );
    let recovery = OperationRecovery::new(Arc::clone(&store), Arc::clone(&manager));

    let first = recovery.run().unwrap();
    assert_eq!(first.interrupted, 1);
    let failed = manager.get_task(running.id).unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    let message = failed.error_message.clone().unwrap();
    assert!(message.contains("interrupted"), "unexpected message: {message}");
    assert!(failed.completed_at_ms.is_some());
    assert!(failed.check_invariants().is_ok());

    let second = recovery.run().unwrap();
    assert_eq!(second.interrupted, 0);
    assert_eq!(second.already_known, 1);

    let recovers: Vec<_> = sink
        .events_for(running.id)
        .into_iter()
        .filter(|e| e.action == AuditAction::Recover)
        .collect();
    assert_eq!(recovers.len(), 1);
    assert_eq!(recovers[0].payload.as_deref(), Some("interrupted"));

    // A later process sees a plain Failed row.
    drop(recovery);
    drop(manager);
    drop(store);
    let reopened: Arc<dyn TaskStore> = Arc::new(JsonFileStore::open(dir.path()).unwrap());
    let manager = manager_over(Arc::clone(&reopened));
    let third = OperationRecovery::new(reopened, Arc::clone(&manager))
        .run()
        .unwrap();
    assert_eq!(third.interrupted, 0);
    assert_eq!(third.loaded, 1);
    assert_eq!(
        manager.get_task(running.id).unwrap().error_message.as_deref(),
        Some(message.as_str())
    );
}

#[tokio::test]
async fn test_pending_rows_are_requeued_in_order() {
    let store = Arc::new(InMemoryStore::new());
    let late = row("p300", TaskStatus::Pending, 300, 0);
    let early = row("p100", TaskStatus::Pending, 100, 1);
    let done = row("done", TaskStatus::Completed, 1, 2);
    for r in [&late, &early, &done] {
        store.upsert_task(r).unwrap();
    }

    let manager = manager_over(store.clone());
    let report = OperationRecovery::new(store.clone(), Arc::clone(&manager))
        .run()
        .unwrap();
    assert_eq!(report.requeued, 2);
    assert_eq!(report.loaded, 1);
    assert_eq!(report.interrupted, 0);
    assert_eq!(manager.pending_count(), 2);

    let ct = CancellationToken::new();
    let woke = tokio::time::timeout(Duration::from_secs(1), manager.wait_for_tasks(&ct))
        .await
        .unwrap();
    assert!(woke, "requeued rows must be signaled");

    assert_eq!(manager.dequeue_next_task().unwrap().id, early.id);
    assert_eq!(manager.dequeue_next_task().unwrap().id, late.id);
    assert!(manager.dequeue_next_task().is_none());

    let fresh = manager
        .schedule_task(TaskType::Backtest, "fresh", json!({}), None, 1)
        .unwrap();
    assert_eq!(fresh.sequence, 3);
}

#[test]
fn test_corrupt_rows_are_skipped() {
    let store = Arc::new(InMemoryStore::new());
    let mut bad = row("bad", TaskStatus::Running, 100, 0);
    bad.error_message = Some("running rows never carry an error".into());
    let good = row("good", TaskStatus::Pending, 100, 1);
    store.upsert_task(&bad).unwrap();
    store.upsert_task(&good).unwrap();

    let manager = manager_over(store.clone());
    let report = OperationRecovery::new(store, Arc::clone(&manager))
        .run()
        .unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.requeued, 1);
    assert!(manager.get_task(bad.id).is_none());
    assert!(manager.get_task(good.id).is_some());
}

#[test]
fn test_unparseable_lines_do_not_block_open() {
    let dir = tempfile::tempdir().unwrap();
    let pending = row("survivor", TaskStatus::Pending, 100, 0);
    {
        let store = JsonFileStore::open(dir.path()).unwrap();
        store.upsert_task(&pending).unwrap();
    }
    let mut log = std::fs::OpenOptions::new()
        .append(true)
        .open(dir.path().join("tasks.jsonl"))
        .unwrap();
    std::io::Write::write_all(&mut log, b"{not json\n").unwrap();

    let store = JsonFileStore::open(dir.path()).unwrap();
    assert_eq!(store.skipped_rows(), 1);
    assert_eq!(store.list_tasks(None).unwrap().len(), 1);
}

// ============================================================================
// TRAINING JOB RECOVERY
// ============================================================================

#[tokio::test]
async fn test_running_training_jobs_are_failed_and_leases_released() {
    let store = Arc::new(InMemoryStore::new());
    let resources = Arc::new(
        ResourceService::new(
            store.clone(),
            Arc::new(StaticProbe::new(2, 0, 1 << 30)),
            Default::default(),
        )
        .unwrap(),
    );
    let queue = resources.ensure_default_queue_exists().unwrap();
    let lease = resources.acquire(queue.id, "job").await.unwrap();

    let mut running = TrainingJob::new("lstm");
    running.status = JobStatus::Running;
    running.queue_id = Some(queue.id);
    running.lease_id = Some(lease.id);
    let queued = TrainingJob::new("waiting");
    let mut completed = TrainingJob::new("done");
    completed.status = JobStatus::Completed;
    for job in [&running, &queued, &completed] {
        store.upsert_training_job(job).unwrap();
    }

    let recovery = TrainingJobRecovery::new(store.clone(), Some(Arc::clone(&resources)));
    let report = recovery.run().unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.leases_released, 1);
    assert!(resources.lease(lease.id).is_none());

    let after = store.get_training_job(running.id).unwrap().unwrap();
    assert_eq!(after.status, JobStatus::Failed);
    assert!(after.lease_id.is_none());
    assert!(after.error_message.unwrap().contains("interrupted"));
    assert_eq!(
        store.get_training_job(queued.id).unwrap().unwrap().status,
        JobStatus::Queued
    );
    assert_eq!(
        store.get_training_job(completed.id).unwrap().unwrap().status,
        JobStatus::Completed
    );

    let again = recovery.run().unwrap();
    assert_eq!(again.failed, 0);
}

// ============================================================================
// STARTUP
// ============================================================================

#[tokio::test]
async fn test_fabric_recovers_before_workers_start() {
    let dir = tempfile::tempdir().unwrap();
    let start = 1_700_000_000_000 / HOUR * HOUR;
    let mut pending = BackgroundTask::new(
        TaskType::DataIngestion,
        "ETHUSDT 1h",
        json!({"symbol": "ETHUSDT", "interval": "1h", "start_time_ms": start, "end_time_ms": start + 6 * HOUR}),
        None,
        100,
        0,
    );
    pending.created_at_ms = 1;
    let orphan = row("orphan", TaskStatus::Running, 100, 1);
    let mut job = TrainingJob::new("orphaned job");
    job.status = JobStatus::Running;
    {
        let store = JsonFileStore::open(dir.path()).unwrap();
        store.upsert_task(&pending).unwrap();
        store.upsert_task(&orphan).unwrap();
        store.upsert_training_job(&job).unwrap();
    }

    let sink = Arc::new(InMemoryKlineSink::new());
    let fabric = FabricBuilder::new(
        FabricConfig::default()
            .with_processor(ProcessorConfig::default().with_worker_count(2).with_shutdown_timeout_ms(1000)),
    )
    .with_store(Arc::new(JsonFileStore::open(dir.path()).unwrap()))
    .with_probe(Arc::new(StaticProbe::new(4, 0, 1 << 30)))
    .with_handler(DataIngestionHandler::new(
        Arc::new(SyntheticKlineSource::new()),
        sink.clone(),
    ))
    .build()
    .unwrap();

    let report = fabric.recovery_report();
    assert_eq!(report.operations.requeued, 1);
    assert_eq!(report.operations.interrupted, 1);
    assert_eq!(report.training.failed, 1);

    let done = fabric
        .manager()
        .wait_for_terminal(pending.id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(sink.klines("ETHUSDT", "1h").len(), 6);
    assert_eq!(
        fabric.manager().get_task(orphan.id).unwrap().status,
        TaskStatus::Failed
    );
    assert_eq!(
        fabric
            .training_jobs()
            .get_training_job(job.id)
            .unwrap()
            .unwrap()
            .status,
        JobStatus::Failed
    );
    fabric.shutdown();
}

//! Tests for the fabric builder

use std::sync::Arc;

use prometheus_task_fabric::builders::{FabricBuilder, QueueRoute};
use prometheus_task_fabric::config::{FabricConfig, ProcessorConfig, StoreBackendConfig, StoreConfig};
use prometheus_task_fabric::core::{FabricError, StaticProbe, TaskType, DEFAULT_QUEUE_NAME};
use prometheus_task_fabric::infra::store::JsonFileStore;

fn config() -> FabricConfig {
    FabricConfig::default().with_processor(
        ProcessorConfig::default()
            .with_worker_count(1)
            .with_shutdown_timeout_ms(500),
    )
}

#[test]
fn test_build_creates_defaults_and_routes() {
    let fabric = FabricBuilder::new(config())
        .with_probe(Arc::new(StaticProbe::new(4, 1, 1 << 30)))
        .with_queue_for(
            TaskType::ModelTraining,
            QueueRoute::new("training").with_max_concurrent_jobs(1),
        )
        .build()
        .unwrap();

    let queues = fabric.resources().queues();
    assert_eq!(queues.len(), 2);
    let default = queues.iter().find(|q| q.is_default).unwrap();
    let training = queues.iter().find(|q| q.name == "training").unwrap();
    assert_eq!(default.name, DEFAULT_QUEUE_NAME);
    assert_eq!(training.cpu_container_id, default.cpu_container_id);
    assert_eq!(training.demand, default.demand);
    assert_eq!(training.max_concurrent_jobs, 1);
    assert!(fabric.processor().stats().running);
    fabric.shutdown();
}

#[test]
fn test_build_rejects_invalid_config() {
    let cfg = FabricConfig::default().with_processor(ProcessorConfig::default().with_worker_count(0));
    let err = FabricBuilder::new(cfg).build().err().unwrap();
    assert!(matches!(err, FabricError::Config(_)));

    let cfg = config().with_store(StoreConfig {
        backend: StoreBackendConfig::File,
        dir: None,
    });
    assert!(matches!(
        FabricBuilder::new(cfg).build().err().unwrap(),
        FabricError::Config(_)
    ));
}

#[test]
fn test_routes_are_reused_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let build = || {
        FabricBuilder::new(config())
            .with_store(Arc::new(JsonFileStore::open(dir.path()).unwrap()))
            .with_probe(Arc::new(StaticProbe::new(2, 0, 1 << 30)))
            .with_queue_for(TaskType::Backtest, QueueRoute::new("backtests"))
            .build()
            .unwrap()
    };

    let first = build();
    let mut ids: Vec<_> = first.resources().queues().iter().map(|q| q.id).collect();
    ids.sort();
    first.shutdown();
    drop(first);

    let second = build();
    let mut again: Vec<_> = second.resources().queues().iter().map(|q| q.id).collect();
    again.sort();
    assert_eq!(ids, again);
    assert_eq!(second.resources().containers().len(), 3);
    second.shutdown();
}

#[test]
fn test_file_backend_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let fabric = FabricBuilder::new(config().with_store(StoreConfig::file(dir.path())))
        .with_probe(Arc::new(StaticProbe::new(2, 0, 1 << 30)))
        .build()
        .unwrap();
    fabric.shutdown();
    assert!(dir.path().join("containers.jsonl").exists());
    assert!(dir.path().join("queues.jsonl").exists());
}

//! Tests for configuration validation

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use prometheus_task_fabric::config::{
    FabricConfig, ProcessorConfig, ResourceConfig, StoreBackendConfig, StoreConfig,
};
use prometheus_task_fabric::core::FabricError;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_defaults_are_valid() {
    let cfg = FabricConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.processor.worker_count, 4);
    assert_eq!(cfg.resources.default_max_concurrent_jobs, 2);
    assert!((cfg.resources.ram_fraction - 0.8).abs() < f64::EPSILON);
    assert_eq!(cfg.store.backend, StoreBackendConfig::InMemory);
}

#[test]
fn test_processor_config_validation() {
    assert!(ProcessorConfig::default().validate().is_ok());
    assert!(ProcessorConfig::default()
        .with_worker_count(0)
        .validate()
        .is_err());
    assert!(ProcessorConfig::default()
        .with_thread_stack_size(0)
        .validate()
        .is_err());
}

#[test]
fn test_resource_config_validation() {
    assert!(ResourceConfig::default().with_ram_fraction(0.0).validate().is_err());
    assert!(ResourceConfig::default().with_ram_fraction(1.5).validate().is_err());
    assert!(ResourceConfig::default().with_ram_fraction(1.0).validate().is_ok());
    assert!(ResourceConfig::default()
        .with_default_max_concurrent_jobs(0)
        .validate()
        .is_err());
    let bounded = ResourceConfig::default()
        .with_default_max_job_duration(Duration::from_secs(60))
        .with_default_max_queue_wait(Duration::from_millis(1500));
    assert_eq!(bounded.default_max_job_duration_ms, Some(60_000));
    assert_eq!(bounded.default_max_queue_wait_ms, Some(1500));
}

#[test]
fn test_file_store_requires_dir() {
    let cfg = StoreConfig {
        backend: StoreBackendConfig::File,
        dir: None,
    };
    assert!(cfg.validate().is_err());
    assert!(StoreConfig::file("/tmp/fabric").validate().is_ok());
}

#[test]
fn test_json_config_fills_defaults() {
    let cfg = FabricConfig::from_json_str(
        r#"{"processor": {"worker_count": 8}, "store": {"backend": "file", "dir": "/var/lib/fabric"}}"#,
    )
    .unwrap();
    assert_eq!(cfg.processor.worker_count, 8);
    assert_eq!(cfg.processor.shutdown_timeout_ms, 5_000);
    assert_eq!(cfg.store.dir, Some(PathBuf::from("/var/lib/fabric")));
    assert_eq!(cfg.resources, ResourceConfig::default());

    let err = FabricConfig::from_json_str(r#"{"processor": {"worker_count": 0}}"#).unwrap_err();
    assert!(matches!(err, FabricError::Config(_)));
    let err = FabricConfig::from_json_str("not json").unwrap_err();
    assert!(matches!(err, FabricError::Config(_)));
}

#[test]
fn test_env_overrides() {
    let cfg = FabricConfig::default()
        .with_overrides(lookup(&[
            ("FABRIC_WORKER_COUNT", "6"),
            ("FABRIC_RAM_FRACTION", "0.5"),
            ("FABRIC_RAM_ACCOUNTING", "false"),
            ("FABRIC_QUEUE_MAX_CONCURRENT_JOBS", "3"),
            ("FABRIC_QUEUE_MAX_WAIT_MS", "2000"),
            ("FABRIC_STORE_DIR", "/data/fabric"),
        ]))
        .unwrap();
    assert_eq!(cfg.processor.worker_count, 6);
    assert!((cfg.resources.ram_fraction - 0.5).abs() < f64::EPSILON);
    assert!(!cfg.resources.ram_accounting);
    assert_eq!(cfg.resources.default_max_concurrent_jobs, 3);
    assert_eq!(cfg.resources.default_max_queue_wait_ms, Some(2000));
    assert_eq!(cfg.store, StoreConfig::file("/data/fabric"));
}

#[test]
fn test_bad_env_override_is_rejected() {
    let err = FabricConfig::default()
        .with_overrides(lookup(&[("FABRIC_WORKER_COUNT", "many")]))
        .unwrap_err();
    assert!(err.to_string().contains("FABRIC_WORKER_COUNT"));

    let err = FabricConfig::default()
        .with_overrides(lookup(&[("FABRIC_WORKER_COUNT", "0")]))
        .unwrap_err();
    assert!(matches!(err, FabricError::Config(_)));
}

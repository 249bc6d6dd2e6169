//! # Prometheus Task Fabric
//!
//! Single-process job execution for the Prometheus ML research platform:
//! long-running, cancellable background tasks (data ingestion, training,
//! backtests) run by a bounded worker pool against finite CPU, GPU and RAM
//! without oversubscription.
//!
//! ## Components
//!
//! - **`BackgroundTaskManager`**: the task registry. Schedules, claims by
//!   priority, tracks progress and owns per-task cancellation tokens.
//! - **`TaskProcessor`**: dedicated OS worker threads that claim tasks, pass
//!   resource admission and run the registered handler.
//! - **`ResourceService`**: containers (raw capacity) and queues (admission
//!   policy) with FIFO waiting, wait timeouts and idempotent release.
//! - **Recovery**: at startup, orphaned Running rows are failed and Pending
//!   rows are restored before any worker starts.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use prometheus_task_fabric::builders::FabricBuilder;
//! use prometheus_task_fabric::config::FabricConfig;
//! use prometheus_task_fabric::core::{TaskType, DEFAULT_PRIORITY};
//! use prometheus_task_fabric::handlers::{DataIngestionHandler, InMemoryKlineSink, SyntheticKlineSource};
//!
//! let fabric = FabricBuilder::new(FabricConfig::from_env()?)
//!     .with_handler(DataIngestionHandler::new(
//!         Arc::new(SyntheticKlineSource::new()),
//!         Arc::new(InMemoryKlineSink::new()),
//!     ))
//!     .build()?;
//!
//! let task = fabric.manager().schedule_task(
//!     TaskType::DataIngestion,
//!     "BTCUSDT 1h",
//!     serde_json::json!({"symbol": "BTCUSDT", "interval": "1h",
//!                        "start_time_ms": 0, "end_time_ms": 86_400_000}),
//!     None,
//!     DEFAULT_PRIORITY,
//! )?;
//! let done = fabric.manager().wait_for_terminal(task.id, Duration::from_secs(30)).await?;
//! fabric.shutdown();
//! ```
//!
//! For complete scenarios, see `tests/processor_test.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Task lifecycle, handler dispatch and resource admission.
pub mod core;
/// Configuration models for the worker pool, resource defaults and store.
pub mod config;
/// Builders that assemble fabric components from configuration.
pub mod builders;
/// Reference task handlers.
pub mod handlers;
/// Infrastructure adapters: pending queue and persistence backends.
pub mod infra;
/// Startup recovery of persisted task and training job rows.
pub mod recovery;
/// API surface exposed to producers.
pub mod runtime;
/// Shared utilities.
pub mod util;

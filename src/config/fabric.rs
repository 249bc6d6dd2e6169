//! Fabric configuration: worker pool, resource defaults and store backend.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::FabricError;

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Stack size for worker threads, in bytes.
    pub thread_stack_size: Option<usize>,
    /// How long `shutdown` waits for workers to exit, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            thread_stack_size: None,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl ProcessorConfig {
    /// Set the worker count.
    #[must_use]
    pub const fn with_worker_count(mut self, n: usize) -> Self {
        self.worker_count = n;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = Some(bytes);
        self
    }

    /// Set the shutdown timeout.
    #[must_use]
    pub const fn with_shutdown_timeout_ms(mut self, ms: u64) -> Self {
        self.shutdown_timeout_ms = ms;
        self
    }

    /// Shutdown timeout as a duration.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Validate processor settings.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.thread_stack_size == Some(0) {
            return Err("thread_stack_size must be greater than 0".into());
        }
        Ok(())
    }
}

/// Sizing of the default containers and limits of the default queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Fraction of total RAM given to the default RAM container.
    pub ram_fraction: f64,
    /// Whether the default queue accounts RAM.
    pub ram_accounting: bool,
    /// Concurrency ceiling of the default queue.
    pub default_max_concurrent_jobs: u32,
    /// Default queue max job duration, in milliseconds.
    pub default_max_job_duration_ms: Option<u64>,
    /// Default queue max admission wait, in milliseconds.
    pub default_max_queue_wait_ms: Option<u64>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            ram_fraction: 0.8,
            ram_accounting: true,
            default_max_concurrent_jobs: 2,
            default_max_job_duration_ms: None,
            default_max_queue_wait_ms: None,
        }
    }
}

impl ResourceConfig {
    /// Set the RAM fraction.
    #[must_use]
    pub const fn with_ram_fraction(mut self, fraction: f64) -> Self {
        self.ram_fraction = fraction;
        self
    }

    /// Enable or disable RAM accounting on the default queue.
    #[must_use]
    pub const fn with_ram_accounting(mut self, enabled: bool) -> Self {
        self.ram_accounting = enabled;
        self
    }

    /// Set the default queue concurrency.
    #[must_use]
    pub const fn with_default_max_concurrent_jobs(mut self, n: u32) -> Self {
        self.default_max_concurrent_jobs = n;
        self
    }

    /// Bound default queue job duration.
    #[must_use]
    pub const fn with_default_max_job_duration(mut self, d: Duration) -> Self {
        self.default_max_job_duration_ms = Some(duration_ms(d));
        self
    }

    /// Bound default queue admission wait.
    #[must_use]
    pub const fn with_default_max_queue_wait(mut self, d: Duration) -> Self {
        self.default_max_queue_wait_ms = Some(duration_ms(d));
        self
    }

    /// Validate resource settings.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.ram_fraction > 0.0 && self.ram_fraction <= 1.0) {
            return Err("ram_fraction must be in (0, 1]".into());
        }
        if self.default_max_concurrent_jobs == 0 {
            return Err("default_max_concurrent_jobs must be greater than 0".into());
        }
        if self.default_max_job_duration_ms == Some(0) {
            return Err("default_max_job_duration_ms must be greater than 0".into());
        }
        if self.default_max_queue_wait_ms == Some(0) {
            return Err("default_max_queue_wait_ms must be greater than 0".into());
        }
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn duration_ms(d: Duration) -> u64 {
    d.as_millis() as u64
}

/// Store backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackendConfig {
    /// Process-local maps; nothing survives a restart.
    #[default]
    InMemory,
    /// Append-only JSONL files in a directory.
    File,
}

/// Persistence settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend kind.
    pub backend: StoreBackendConfig,
    /// Directory for the file backend.
    pub dir: Option<PathBuf>,
}

impl StoreConfig {
    /// File backend rooted at `dir`.
    pub fn file(dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: StoreBackendConfig::File,
            dir: Some(dir.into()),
        }
    }

    /// Validate store settings.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.backend == StoreBackendConfig::File && self.dir.is_none() {
            return Err("file store requires a dir".into());
        }
        Ok(())
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    /// Worker pool.
    pub processor: ProcessorConfig,
    /// Resource defaults.
    pub resources: ResourceConfig,
    /// Persistence.
    pub store: StoreConfig,
}

impl FabricConfig {
    /// Replace the processor section.
    #[must_use]
    pub fn with_processor(mut self, processor: ProcessorConfig) -> Self {
        self.processor = processor;
        self
    }

    /// Replace the resources section.
    #[must_use]
    pub fn with_resources(mut self, resources: ResourceConfig) -> Self {
        self.resources = resources;
        self
    }

    /// Replace the store section.
    #[must_use]
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns the section name and the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        self.processor
            .validate()
            .map_err(|e| format!("processor invalid: {e}"))?;
        self.resources
            .validate()
            .map_err(|e| format!("resources invalid: {e}"))?;
        self.store
            .validate()
            .map_err(|e| format!("store invalid: {e}"))?;
        Ok(())
    }

    /// Parse from JSON and validate. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// [`FabricError::Config`] on parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, FabricError> {
        let cfg: Self = serde_json::from_str(input)
            .map_err(|e| FabricError::Config(format!("parse error: {e}")))?;
        cfg.validate().map_err(FabricError::Config)?;
        Ok(cfg)
    }

    /// Defaults overridden by `FABRIC_*` variables, after loading `.env` if present.
    ///
    /// # Errors
    ///
    /// [`FabricError::Config`] if a variable does not parse or the result is invalid.
    pub fn from_env() -> Result<Self, FabricError> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(FabricError::Config(format!(".env: {e}"))),
        }
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `FABRIC_*` overrides read through `lookup`, then validate.
    ///
    /// Recognised keys: `FABRIC_WORKER_COUNT`, `FABRIC_THREAD_STACK_SIZE`,
    /// `FABRIC_SHUTDOWN_TIMEOUT_MS`, `FABRIC_RAM_FRACTION`,
    /// `FABRIC_RAM_ACCOUNTING`, `FABRIC_QUEUE_MAX_CONCURRENT_JOBS`,
    /// `FABRIC_QUEUE_MAX_JOB_DURATION_MS`, `FABRIC_QUEUE_MAX_WAIT_MS` and
    /// `FABRIC_STORE_DIR` (selects the file backend).
    ///
    /// # Errors
    ///
    /// [`FabricError::Config`] if a value does not parse or the result is invalid.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, FabricError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, "FABRIC_WORKER_COUNT")? {
            self.processor.worker_count = v;
        }
        if let Some(v) = parse_var(&lookup, "FABRIC_THREAD_STACK_SIZE")? {
            self.processor.thread_stack_size = Some(v);
        }
        if let Some(v) = parse_var(&lookup, "FABRIC_SHUTDOWN_TIMEOUT_MS")? {
            self.processor.shutdown_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "FABRIC_RAM_FRACTION")? {
            self.resources.ram_fraction = v;
        }
        if let Some(v) = parse_var(&lookup, "FABRIC_RAM_ACCOUNTING")? {
            self.resources.ram_accounting = v;
        }
        if let Some(v) = parse_var(&lookup, "FABRIC_QUEUE_MAX_CONCURRENT_JOBS")? {
            self.resources.default_max_concurrent_jobs = v;
        }
        if let Some(v) = parse_var(&lookup, "FABRIC_QUEUE_MAX_JOB_DURATION_MS")? {
            self.resources.default_max_job_duration_ms = Some(v);
        }
        if let Some(v) = parse_var(&lookup, "FABRIC_QUEUE_MAX_WAIT_MS")? {
            self.resources.default_max_queue_wait_ms = Some(v);
        }
        if let Some(dir) = lookup("FABRIC_STORE_DIR").filter(|d| !d.trim().is_empty()) {
            self.store = StoreConfig::file(dir);
        }
        self.validate().map_err(FabricError::Config)?;
        Ok(self)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, FabricError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| FabricError::Config(format!("{key}={raw}: {e}")))
        })
        .transpose()
}

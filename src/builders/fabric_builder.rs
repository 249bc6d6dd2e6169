//! Startup wiring: store, resources, manager, recovery, then workers.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{FabricConfig, StoreBackendConfig};
use crate::core::audit::AuditSink;
use crate::core::error::FabricError;
use crate::core::handler::{HandlerRegistry, TaskHandler};
use crate::core::hardware::{HardwareProbe, SystemProbe};
use crate::core::resource::{QueueOptions, ResourceQueue};
use crate::core::resource_service::ResourceService;
use crate::core::task::TaskType;
use crate::core::task_manager::BackgroundTaskManager;
use crate::core::task_processor::TaskProcessor;
use crate::infra::store::{FabricStore, InMemoryStore, JsonFileStore, ResourceStore, TaskStore, TrainingJobStore};
use crate::recovery::{run_startup_recovery, RecoveryReport};

/// A named queue over the default containers, used to route one task type.
///
/// Routed queues take the default queue's per-job demand and differ only in
/// their limits.
#[derive(Debug, Clone)]
pub struct QueueRoute {
    name: String,
    max_concurrent_jobs: u32,
    max_job_duration: Option<Duration>,
    max_queue_wait: Option<Duration>,
}

impl QueueRoute {
    /// Route through queue `name`, one job at a time by default.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_concurrent_jobs: 1,
            max_job_duration: None,
            max_queue_wait: None,
        }
    }

    /// Concurrency ceiling.
    #[must_use]
    pub const fn with_max_concurrent_jobs(mut self, n: u32) -> Self {
        self.max_concurrent_jobs = n;
        self
    }

    /// Job duration bound.
    #[must_use]
    pub const fn with_max_job_duration(mut self, d: Duration) -> Self {
        self.max_job_duration = Some(d);
        self
    }

    /// Admission wait bound.
    #[must_use]
    pub const fn with_max_queue_wait(mut self, d: Duration) -> Self {
        self.max_queue_wait = Some(d);
        self
    }
}

struct Stores {
    tasks: Arc<dyn TaskStore>,
    resources: Arc<dyn ResourceStore>,
    jobs: Arc<dyn TrainingJobStore>,
}

impl Stores {
    fn from_backend<S: FabricStore + 'static>(store: Arc<S>) -> Self {
        Self {
            tasks: store.clone(),
            resources: store.clone(),
            jobs: store,
        }
    }

    fn from_config(config: &FabricConfig) -> Result<Self, FabricError> {
        match (config.store.backend, &config.store.dir) {
            (StoreBackendConfig::InMemory, _) => Ok(Self::from_backend(Arc::new(InMemoryStore::new()))),
            (StoreBackendConfig::File, Some(dir)) => {
                Ok(Self::from_backend(Arc::new(JsonFileStore::open(dir)?)))
            }
            (StoreBackendConfig::File, None) => {
                Err(FabricError::Config("file store requires a dir".into()))
            }
        }
    }
}

/// Builds a running [`Fabric`].
///
/// Order of `build`: store, resource service with default containers and
/// queue, task manager, both recovery passes, and only then the worker pool.
pub struct FabricBuilder {
    config: FabricConfig,
    registry: HandlerRegistry,
    probe: Arc<dyn HardwareProbe>,
    stores: Option<Stores>,
    audit: Option<Box<dyn AuditSink>>,
    routes: Vec<(TaskType, QueueRoute)>,
}

impl FabricBuilder {
    /// Builder over `config` with the system hardware probe.
    #[must_use]
    pub fn new(config: FabricConfig) -> Self {
        Self {
            config,
            registry: HandlerRegistry::new(),
            probe: Arc::new(SystemProbe),
            stores: None,
            audit: None,
            routes: Vec::new(),
        }
    }

    /// Register a handler.
    #[must_use]
    pub fn with_handler<H: TaskHandler>(mut self, handler: H) -> Self {
        self.registry.register(handler);
        self
    }

    /// Replace the hardware probe.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn HardwareProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Use this store instead of the one named in the config.
    #[must_use]
    pub fn with_store<S: FabricStore + 'static>(mut self, store: Arc<S>) -> Self {
        self.stores = Some(Stores::from_backend(store));
        self
    }

    /// Record lifecycle events to `audit`.
    #[must_use]
    pub fn with_audit(mut self, audit: Box<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Admit `task_type` through its own queue over the default containers.
    #[must_use]
    pub fn with_queue_for(mut self, task_type: TaskType, route: QueueRoute) -> Self {
        self.routes.push((task_type, route));
        self
    }

    /// Wire everything and start the workers.
    ///
    /// # Errors
    ///
    /// - [`FabricError::Config`] for invalid configuration
    /// - [`FabricError::Storage`] if the store cannot be opened or read
    /// - [`FabricError::Worker`] if worker threads cannot be spawned
    pub fn build(self) -> Result<Fabric, FabricError> {
        self.config.validate().map_err(FabricError::Config)?;
        let stores = match self.stores {
            Some(stores) => stores,
            None => Stores::from_config(&self.config)?,
        };

        let resources = Arc::new(ResourceService::new(
            stores.resources,
            self.probe,
            self.config.resources.clone(),
        )?);
        resources.ensure_default_containers_exist()?;
        let default_queue = resources.ensure_default_queue_exists()?;

        let mut resolved = Vec::with_capacity(self.routes.len());
        for (task_type, route) in self.routes {
            let queue = resolve_route(&resources, &default_queue, route)?;
            resolved.push((task_type, queue.id));
        }

        let registry = Arc::new(self.registry);
        let mut manager = BackgroundTaskManager::new(Arc::clone(&stores.tasks), Arc::clone(&registry));
        if let Some(audit) = self.audit {
            manager = manager.with_audit(audit);
        }
        let manager = Arc::new(manager);

        let recovery = run_startup_recovery(
            stores.tasks,
            Arc::clone(&stores.jobs),
            Arc::clone(&manager),
            Some(Arc::clone(&resources)),
        )?;

        let mut processor = TaskProcessor::new(
            self.config.processor.clone(),
            Arc::clone(&manager),
            registry,
        )?
        .with_resources(Arc::clone(&resources));
        for (task_type, queue_id) in resolved {
            processor = processor.with_queue_for(task_type, queue_id);
        }
        processor.start()?;

        tracing::info!(
            workers = self.config.processor.worker_count,
            default_queue = %default_queue.id,
            requeued = recovery.operations.requeued,
            interrupted = recovery.operations.interrupted,
            "fabric started"
        );
        Ok(Fabric {
            config: self.config,
            manager,
            resources,
            processor,
            jobs: stores.jobs,
            recovery,
        })
    }
}

fn resolve_route(
    resources: &ResourceService,
    default_queue: &ResourceQueue,
    route: QueueRoute,
) -> Result<ResourceQueue, FabricError> {
    if let Some(existing) = resources.queues().into_iter().find(|q| q.name == route.name) {
        return Ok(existing);
    }
    let mut options = QueueOptions::new(
        route.name,
        default_queue.cpu_container_id,
        default_queue.gpu_container_id,
    )
    .with_max_concurrent_jobs(route.max_concurrent_jobs)
    .with_demand(default_queue.demand);
    options.max_job_duration = route.max_job_duration;
    options.max_queue_wait = route.max_queue_wait;
    options.ram_container_id = default_queue.ram_container_id;
    resources.create_queue(options)
}

/// A started fabric: manager, resource service and worker pool.
pub struct Fabric {
    config: FabricConfig,
    manager: Arc<BackgroundTaskManager>,
    resources: Arc<ResourceService>,
    processor: TaskProcessor,
    jobs: Arc<dyn TrainingJobStore>,
    recovery: RecoveryReport,
}

impl Fabric {
    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &FabricConfig {
        &self.config
    }

    /// Task manager handle for producers.
    #[must_use]
    pub const fn manager(&self) -> &Arc<BackgroundTaskManager> {
        &self.manager
    }

    /// Resource service handle.
    #[must_use]
    pub const fn resources(&self) -> &Arc<ResourceService> {
        &self.resources
    }

    /// Worker pool.
    #[must_use]
    pub const fn processor(&self) -> &TaskProcessor {
        &self.processor
    }

    /// Training job rows.
    #[must_use]
    pub const fn training_jobs(&self) -> &Arc<dyn TrainingJobStore> {
        &self.jobs
    }

    /// What startup recovery did.
    #[must_use]
    pub const fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Stop the worker pool.
    pub fn shutdown(&self) {
        self.processor.shutdown();
    }
}

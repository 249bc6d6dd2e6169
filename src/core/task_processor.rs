//! Task processor: a fixed pool of worker threads draining the task manager.
//!
//! Each worker is a dedicated OS thread with its own current-thread tokio
//! runtime, so handler bodies never stall the producer's runtime. A worker
//! loops through Idle (waiting for a signal), Claimed (task dequeued, waiting
//! for resource admission) and Executing (handler running), then back to Idle.
//!
//! Handler failures, cancellations and panics all end at the worker boundary
//! as a terminal task status; nothing escapes to the pool.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::FabricError;
use super::handler::{HandlerError, HandlerRegistry, ProgressReporter, TaskContext, TaskOutput};
use super::resource::Lease;
use super::resource_service::ResourceService;
use super::task::{BackgroundTask, TaskId, TaskType};
use super::task_manager::BackgroundTaskManager;
use crate::config::ProcessorConfig;

/// Per-worker lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    /// Waiting for work.
    #[default]
    Idle,
    /// Holding a dequeued task, waiting for admission.
    Claimed,
    /// Running a handler.
    Executing,
}

/// Snapshot of one worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Worker index.
    pub worker_id: usize,
    /// Current state.
    pub state: WorkerState,
    /// Task being processed, if any.
    pub current_task: Option<TaskId>,
}

/// Snapshot of the whole pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessorStats {
    /// Configured worker count.
    pub worker_count: usize,
    /// Whether workers are running.
    pub running: bool,
    /// Per-worker state.
    pub workers: Vec<WorkerStats>,
    /// Tasks claimed since start.
    pub claimed_tasks: u64,
    /// Tasks that ended Completed.
    pub completed_tasks: u64,
    /// Tasks that ended Failed.
    pub failed_tasks: u64,
    /// Tasks that ended Cancelled.
    pub cancelled_tasks: u64,
}

#[derive(Debug, Default)]
struct ProcessorCounters {
    claimed: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

/// State shared by all workers.
struct WorkerContext {
    manager: Arc<BackgroundTaskManager>,
    registry: Arc<HandlerRegistry>,
    resources: Option<Arc<ResourceService>>,
    routes: HashMap<TaskType, Uuid>,
    counters: Arc<ProcessorCounters>,
    slots: Arc<Vec<Mutex<WorkerStats>>>,
    shutdown: CancellationToken,
}

/// Bounded worker pool executing tasks from a [`BackgroundTaskManager`].
pub struct TaskProcessor {
    config: ProcessorConfig,
    manager: Arc<BackgroundTaskManager>,
    registry: Arc<HandlerRegistry>,
    resources: Option<Arc<ResourceService>>,
    routes: HashMap<TaskType, Uuid>,
    counters: Arc<ProcessorCounters>,
    slots: Arc<Vec<Mutex<WorkerStats>>>,
    shutdown: CancellationToken,
    started: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskProcessor {
    /// Create a stopped processor. Call [`Self::start`] to spawn workers.
    ///
    /// # Errors
    ///
    /// [`FabricError::Config`] if the processor config is invalid.
    pub fn new(
        config: ProcessorConfig,
        manager: Arc<BackgroundTaskManager>,
        registry: Arc<HandlerRegistry>,
    ) -> Result<Self, FabricError> {
        config.validate().map_err(FabricError::Config)?;
        let slots = (0..config.worker_count)
            .map(|worker_id| {
                Mutex::new(WorkerStats {
                    worker_id,
                    ..WorkerStats::default()
                })
            })
            .collect();
        Ok(Self {
            config,
            manager,
            registry,
            resources: None,
            routes: HashMap::new(),
            counters: Arc::new(ProcessorCounters::default()),
            slots: Arc::new(slots),
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Run every task under admission control of `resources`.
    #[must_use]
    pub fn with_resources(mut self, resources: Arc<ResourceService>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Admit tasks of `task_type` through `queue_id` instead of the default queue.
    #[must_use]
    pub fn with_queue_for(mut self, task_type: TaskType, queue_id: Uuid) -> Self {
        self.routes.insert(task_type, queue_id);
        self
    }

    /// Spawn the worker threads. Calling it twice is a no-op.
    ///
    /// # Errors
    ///
    /// [`FabricError::Worker`] if a thread cannot be spawned; workers already
    /// spawned are stopped.
    pub fn start(&self) -> Result<(), FabricError> {
        if self.started.swap(true, Ordering::AcqRel) {
            warn!("task processor already started");
            return Ok(());
        }
        let ctx = Arc::new(WorkerContext {
            manager: Arc::clone(&self.manager),
            registry: Arc::clone(&self.registry),
            resources: self.resources.clone(),
            routes: self.routes.clone(),
            counters: Arc::clone(&self.counters),
            slots: Arc::clone(&self.slots),
            shutdown: self.shutdown.clone(),
        });

        let mut workers = self.workers.lock();
        for worker_id in 0..self.config.worker_count {
            match spawn_worker(worker_id, Arc::clone(&ctx), self.config.thread_stack_size) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    drop(workers);
                    self.shutdown();
                    return Err(FabricError::Worker(format!(
                        "failed to spawn worker {worker_id}: {e}"
                    )));
                }
            }
        }
        info!(
            worker_count = self.config.worker_count,
            routes = self.routes.len(),
            admission = self.resources.is_some(),
            "task processor started"
        );
        Ok(())
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            worker_count: self.config.worker_count,
            running: self.started.load(Ordering::Acquire) && !self.shutdown.is_cancelled(),
            workers: self.slots.iter().map(|s| s.lock().clone()).collect(),
            claimed_tasks: self.counters.claimed.load(Ordering::Relaxed),
            completed_tasks: self.counters.completed.load(Ordering::Relaxed),
            failed_tasks: self.counters.failed.load(Ordering::Relaxed),
            cancelled_tasks: self.counters.cancelled.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting work and join the workers.
    ///
    /// Idle workers exit at once; a worker running a handler exits after the
    /// handler returns. Workers still busy after the configured timeout are
    /// detached.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!("shutting down task processor");
        self.shutdown.cancel();

        let timeout = self.config.shutdown_timeout();
        let mut workers = self.workers.lock();
        let worker_count = workers.len();
        for (idx, worker) in workers.drain(..).enumerate() {
            let (tx, rx) = std::sync::mpsc::channel();
            let joiner = thread::spawn(move || {
                let _ = tx.send(worker.join().is_ok());
            });
            match rx.recv_timeout(timeout) {
                Ok(true) => {
                    debug!(worker_id = idx, "worker joined");
                    let _ = joiner.join();
                }
                Ok(false) => {
                    warn!(worker_id = idx, "worker panicked");
                    let _ = joiner.join();
                }
                Err(_) => warn!(worker_id = idx, ?timeout, "worker did not exit in time, detaching"),
            }
        }
        info!(worker_count, "task processor shut down");
    }
}

impl Drop for TaskProcessor {
    fn drop(&mut self) {
        if !self.shutdown.is_cancelled() {
            self.shutdown.cancel();
            debug!("task processor dropped without shutdown, workers detached");
        }
    }
}

fn spawn_worker(
    worker_id: usize,
    ctx: Arc<WorkerContext>,
    stack_size: Option<usize>,
) -> std::io::Result<JoinHandle<()>> {
    let mut builder = thread::Builder::new().name(format!("fabric-worker-{worker_id}"));
    if let Some(size) = stack_size {
        builder = builder.stack_size(size);
    }
    builder.spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                error!(worker_id, error = %e, "failed to create worker runtime");
                return;
            }
        };
        debug!(worker_id, "worker started");
        rt.block_on(ctx.worker_loop(worker_id));
        debug!(worker_id, "worker exiting");
    })
}

impl WorkerContext {
    async fn worker_loop(&self, worker_id: usize) {
        loop {
            self.set_state(worker_id, WorkerState::Idle, None);
            if !self.manager.wait_for_tasks(&self.shutdown).await {
                break;
            }
            let Some(task) = self.manager.dequeue_next_task() else {
                continue;
            };
            self.counters.claimed.fetch_add(1, Ordering::Relaxed);
            self.set_state(worker_id, WorkerState::Claimed, Some(task.id));
            debug!(worker_id, task_id = %task.id, task_type = %task.task_type, "worker claimed task");
            self.run_task(worker_id, task).await;
        }
    }

    fn set_state(&self, worker_id: usize, state: WorkerState, task: Option<TaskId>) {
        if let Some(slot) = self.slots.get(worker_id) {
            let mut slot = slot.lock();
            slot.state = state;
            slot.current_task = task;
        }
    }

    async fn run_task(&self, worker_id: usize, task: BackgroundTask) {
        let id = task.id;
        let Some(handler) = self.registry.get(task.task_type) else {
            self.fail(id, FabricError::UnknownTaskType(task.task_type).to_string());
            return;
        };
        let Some(token) = self.manager.get_cancellation_token(id) else {
            warn!(task_id = %id, "claimed task has no cancellation token, skipping");
            return;
        };
        if token.is_cancelled() {
            self.cancelled(id);
            return;
        }

        let lease = match self.admit(&task, &token).await {
            Ok(lease) => lease,
            Err(FabricError::Cancelled) => {
                self.cancelled(id);
                return;
            }
            Err(e) => {
                self.fail(id, e.to_string());
                return;
            }
        };

        self.set_state(worker_id, WorkerState::Executing, Some(id));
        let limit = lease.as_ref().and_then(Lease::max_duration);
        let ctx = TaskContext::new(
            task.clone(),
            token.clone(),
            ProgressReporter::new(Arc::clone(&self.manager), id),
            lease.clone(),
        );

        let exec = AssertUnwindSafe(handler.execute_raw(task.parameters, &ctx)).catch_unwind();
        let (outcome, overran) = match limit {
            Some(limit) => {
                tokio::pin!(exec);
                tokio::select! {
                    res = &mut exec => (res, false),
                    () = tokio::time::sleep(limit) => {
                        warn!(task_id = %id, ?limit, "max job duration reached, cancelling");
                        token.cancel();
                        (exec.await, true)
                    }
                }
            }
            None => (exec.await, false),
        };
        drop(ctx);

        if let (Some(resources), Some(lease)) = (&self.resources, &lease) {
            resources.release(lease);
        }
        self.finish(id, outcome, overran.then_some(limit).flatten());
    }

    async fn admit(
        &self,
        task: &BackgroundTask,
        token: &CancellationToken,
    ) -> Result<Option<Lease>, FabricError> {
        let Some(resources) = &self.resources else {
            return Ok(None);
        };
        let queue_id = match self.routes.get(&task.task_type) {
            Some(id) => *id,
            None => match resources.default_queue_id() {
                Some(id) => id,
                None => {
                    debug!(task_id = %task.id, "no default queue, running without admission");
                    return Ok(None);
                }
            },
        };
        resources
            .acquire_with_cancel(queue_id, &task.id.to_string(), token)
            .await
            .map(Some)
    }

    fn finish(
        &self,
        id: TaskId,
        outcome: Result<Result<TaskOutput, HandlerError>, Box<dyn Any + Send>>,
        overran: Option<Duration>,
    ) {
        match outcome {
            Ok(Ok(output)) => match self.manager.complete_task(id, Some(output)) {
                Ok(()) => {
                    self.counters.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => warn!(task_id = %id, error = %e, "completion rejected"),
            },
            Ok(Err(HandlerError::Cancelled)) => match overran {
                Some(limit) => self.fail(id, format!("exceeded max job duration of {limit:?}")),
                None => self.cancelled(id),
            },
            Ok(Err(e)) => self.fail(id, FabricError::HandlerExecution(e.to_string()).to_string()),
            Err(panic) => self.fail(
                id,
                FabricError::HandlerExecution(format!("handler panicked: {}", panic_message(&*panic)))
                    .to_string(),
            ),
        }
    }

    fn fail(&self, id: TaskId, message: String) {
        match self.manager.fail_task(id, message) {
            Ok(()) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!(task_id = %id, error = %e, "failure rejected"),
        }
    }

    fn cancelled(&self, id: TaskId) {
        match self.manager.mark_cancelled(id) {
            Ok(()) => {
                self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!(task_id = %id, error = %e, "cancellation rejected"),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

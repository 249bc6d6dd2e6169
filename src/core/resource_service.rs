//! Resource container and queue service: admission control over CPU, GPU and RAM.
//!
//! Containers hold raw capacity; queues hold policy. Acquiring through a queue
//! reserves the queue's per-job demand from each of its containers and one of
//! its concurrency slots. Callers that cannot be admitted wait in a FIFO list
//! on the queue. Waiters are woken by [`ResourceService::release`], which hands
//! the freed capacity straight to the earliest admissible waiter, so a woken
//! caller never races a newcomer for the units it was promised.
//!
//! All accounting happens inside one short mutex section; waiting happens on
//! a oneshot channel outside it.

use std::collections::{HashMap, VecDeque};
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::FabricError;
use super::hardware::{DetectedHardware, HardwareProbe};
use super::resource::{
    ContainerStatus, Lease, QueueOptions, QueueStatus, ResourceContainer, ResourceDemand,
    ResourceKind, ResourceQueue,
};
use crate::config::ResourceConfig;
use crate::infra::store::ResourceStore;
use crate::util::clock::now_ms;

/// Name of the default queue.
pub const DEFAULT_QUEUE_NAME: &str = "default";

struct ContainerSlot {
    config: ResourceContainer,
    used: u64,
    /// Lease id to holder id.
    holders: HashMap<Uuid, String>,
}

struct Waiter {
    ticket: u64,
    holder_id: String,
    tx: oneshot::Sender<Lease>,
}

struct QueueSlot {
    config: ResourceQueue,
    running: u32,
    waiters: VecDeque<Waiter>,
}

#[derive(Default)]
struct ResourceState {
    containers: HashMap<Uuid, ContainerSlot>,
    queues: HashMap<Uuid, QueueSlot>,
    leases: HashMap<Uuid, Lease>,
    next_ticket: u64,
    hardware: Option<DetectedHardware>,
}

fn requirements(queue: &ResourceQueue) -> Vec<(Uuid, u64)> {
    let mut reqs = vec![
        (queue.cpu_container_id, queue.demand.cpu_threads),
        (queue.gpu_container_id, queue.demand.gpu_devices),
    ];
    if let Some(ram) = queue.ram_container_id {
        reqs.push((ram, queue.demand.ram_bytes));
    }
    reqs
}

impl ResourceState {
    fn can_admit(&self, queue_id: Uuid) -> bool {
        let Some(queue) = self.queues.get(&queue_id) else {
            return false;
        };
        if queue.running >= queue.config.max_concurrent_jobs {
            return false;
        }
        requirements(&queue.config).iter().all(|(cid, units)| {
            self.containers
                .get(cid)
                .is_some_and(|c| c.used + units <= c.config.capacity)
        })
    }

    /// Reserve units and a slot. Caller has checked `can_admit`.
    fn grant(&mut self, queue_id: Uuid, holder_id: &str) -> Option<Lease> {
        let queue = self.queues.get_mut(&queue_id)?;
        queue.running += 1;
        let reqs = requirements(&queue.config);
        let lease = Lease {
            id: Uuid::new_v4(),
            queue_id,
            holder_id: holder_id.to_owned(),
            demand: queue.config.demand,
            container_ids: reqs.iter().map(|(cid, _)| *cid).collect(),
            granted_at_ms: now_ms(),
            max_duration_ms: queue.config.max_job_duration_ms,
        };
        for (cid, units) in reqs {
            if let Some(c) = self.containers.get_mut(&cid) {
                c.used += units;
                c.holders.insert(lease.id, lease.holder_id.clone());
            }
        }
        self.leases.insert(lease.id, lease.clone());
        Some(lease)
    }

    /// Return a lease's units and slot. The lease must already be out of `leases`.
    fn return_units(&mut self, lease: &Lease) {
        if let Some(queue) = self.queues.get_mut(&lease.queue_id) {
            queue.running = queue.running.saturating_sub(1);
            for (cid, units) in requirements(&queue.config) {
                if let Some(c) = self.containers.get_mut(&cid) {
                    c.used = c.used.saturating_sub(units);
                    c.holders.remove(&lease.id);
                }
            }
        }
    }

    /// Hand free capacity to waiters, earliest ticket first among admissible heads.
    fn dispatch(&mut self) -> usize {
        let mut granted = 0;
        loop {
            let next = self
                .queues
                .iter()
                .filter_map(|(qid, q)| {
                    let head = q.waiters.front()?;
                    self.can_admit(*qid).then_some((head.ticket, *qid))
                })
                .min();
            let Some((_, queue_id)) = next else {
                break;
            };
            let Some(waiter) = self
                .queues
                .get_mut(&queue_id)
                .and_then(|q| q.waiters.pop_front())
            else {
                break;
            };
            if waiter.tx.is_closed() {
                continue;
            }
            let Some(lease) = self.grant(queue_id, &waiter.holder_id) else {
                break;
            };
            if let Err(lease) = waiter.tx.send(lease) {
                self.leases.remove(&lease.id);
                self.return_units(&lease);
                continue;
            }
            granted += 1;
        }
        granted
    }

    fn remove_waiter(&mut self, queue_id: Uuid, ticket: u64) -> bool {
        let Some(queue) = self.queues.get_mut(&queue_id) else {
            return false;
        };
        let before = queue.waiters.len();
        queue.waiters.retain(|w| w.ticket != ticket);
        queue.waiters.len() != before
    }

    fn default_container(&self, kind: ResourceKind) -> Option<&ResourceContainer> {
        self.containers
            .values()
            .map(|c| &c.config)
            .find(|c| c.is_default && c.kind == kind)
    }
}

enum Wake {
    Granted(Result<Lease, oneshot::error::RecvError>),
    Cancelled,
    TimedOut,
}

async fn wait_limit(limit: Option<Duration>) {
    match limit {
        Some(d) => tokio::time::sleep(d).await,
        None => pending().await,
    }
}

/// A queued acquire. Dropping it leaves the wait list and returns any lease
/// that was handed over but never received.
struct PendingAdmission<'a> {
    service: &'a ResourceService,
    queue_id: Uuid,
    ticket: u64,
    rx: oneshot::Receiver<Lease>,
    settled: bool,
}

impl PendingAdmission<'_> {
    /// Leave the wait list. Returns the lease if a release granted one first.
    fn withdraw(&mut self) -> Option<Lease> {
        self.settled = true;
        let removed = {
            let mut state = self.service.state.lock();
            let removed = state.remove_waiter(self.queue_id, self.ticket);
            if removed {
                state.dispatch();
            }
            removed
        };
        if removed {
            None
        } else {
            self.rx.try_recv().ok()
        }
    }
}

impl Drop for PendingAdmission<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(lease) = self.withdraw() {
            tracing::debug!(
                queue_id = %self.queue_id,
                lease_id = %lease.id,
                "acquire dropped after grant, returning lease"
            );
            self.service.release(&lease);
        }
    }
}

/// Owner of resource containers, queues and their usage counters.
pub struct ResourceService {
    store: Arc<dyn ResourceStore>,
    probe: Arc<dyn HardwareProbe>,
    settings: ResourceConfig,
    state: Mutex<ResourceState>,
}

impl ResourceService {
    /// Build the service and load persisted container and queue rows.
    ///
    /// # Errors
    ///
    /// [`FabricError::Storage`] if the rows cannot be read.
    pub fn new(
        store: Arc<dyn ResourceStore>,
        probe: Arc<dyn HardwareProbe>,
        settings: ResourceConfig,
    ) -> Result<Self, FabricError> {
        let mut state = ResourceState::default();
        for config in store.list_containers()? {
            state.containers.insert(
                config.id,
                ContainerSlot {
                    config,
                    used: 0,
                    holders: HashMap::new(),
                },
            );
        }
        for config in store.list_queues()? {
            state.queues.insert(
                config.id,
                QueueSlot {
                    config,
                    running: 0,
                    waiters: VecDeque::new(),
                },
            );
        }
        tracing::debug!(
            containers = state.containers.len(),
            queues = state.queues.len(),
            "resource rows loaded"
        );
        Ok(Self {
            store,
            probe,
            settings,
            state: Mutex::new(state),
        })
    }

    /// Hardware snapshot, detected once and cached for the process lifetime.
    pub fn detect_hardware(&self) -> DetectedHardware {
        if let Some(hw) = self.state.lock().hardware.clone() {
            return hw;
        }
        let detected = self.probe.detect();
        self.state
            .lock()
            .hardware
            .get_or_insert(detected)
            .clone()
    }

    /// Cached hardware snapshot, if detection already ran.
    #[must_use]
    pub fn hardware(&self) -> Option<DetectedHardware> {
        self.state.lock().hardware.clone()
    }

    /// Create the default CPU, GPU and RAM containers that do not exist yet.
    ///
    /// Returns the containers created by this call; empty when all defaults
    /// already exist.
    ///
    /// # Errors
    ///
    /// [`FabricError::Storage`] if a row cannot be persisted.
    pub fn ensure_default_containers_exist(&self) -> Result<Vec<ResourceContainer>, FabricError> {
        let missing: Vec<ResourceKind> = {
            let state = self.state.lock();
            [ResourceKind::Cpu, ResourceKind::Gpu, ResourceKind::Ram]
                .into_iter()
                .filter(|k| state.default_container(*k).is_none())
                .collect()
        };
        if missing.is_empty() {
            return Ok(Vec::new());
        }

        let hw = self.detect_hardware();
        let mut created = Vec::new();
        let mut state = self.state.lock();
        for kind in missing {
            if state.default_container(kind).is_some() {
                continue;
            }
            let (name, capacity) = match kind {
                ResourceKind::Cpu => ("default-cpu", hw.cpu_cores),
                ResourceKind::Gpu => ("default-gpu", hw.gpu_count),
                ResourceKind::Ram => ("default-ram", self.ram_capacity(&hw)),
            };
            let mut container = ResourceContainer::new(name, kind, capacity);
            container.is_default = true;
            self.store.upsert_container(&container)?;
            tracing::info!(
                container_id = %container.id,
                %kind,
                capacity,
                "default container created"
            );
            state.containers.insert(
                container.id,
                ContainerSlot {
                    config: container.clone(),
                    used: 0,
                    holders: HashMap::new(),
                },
            );
            created.push(container);
        }
        Ok(created)
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    fn ram_capacity(&self, hw: &DetectedHardware) -> u64 {
        (hw.total_ram_bytes as f64 * self.settings.ram_fraction) as u64
    }

    /// Return the default queue, creating it over the default containers if needed.
    ///
    /// # Errors
    ///
    /// [`FabricError::Storage`] if a row cannot be persisted.
    pub fn ensure_default_queue_exists(&self) -> Result<ResourceQueue, FabricError> {
        if let Some(existing) = self.default_queue() {
            return Ok(existing);
        }
        self.ensure_default_containers_exist()?;

        let (cpu, gpu, ram) = {
            let state = self.state.lock();
            let id = |kind| state.default_container(kind).map(|c| c.id);
            (
                id(ResourceKind::Cpu),
                id(ResourceKind::Gpu),
                id(ResourceKind::Ram),
            )
        };
        let (Some(cpu), Some(gpu)) = (cpu, gpu) else {
            return Err(FabricError::ContainerNotFound(Uuid::nil()));
        };

        let mut options = QueueOptions::new(DEFAULT_QUEUE_NAME, cpu, gpu)
            .with_max_concurrent_jobs(self.settings.default_max_concurrent_jobs);
        options.max_job_duration = self
            .settings
            .default_max_job_duration_ms
            .map(Duration::from_millis);
        options.max_queue_wait = self
            .settings
            .default_max_queue_wait_ms
            .map(Duration::from_millis);
        if self.settings.ram_accounting {
            options.ram_container_id = ram;
        }
        self.insert_queue(options, true)
    }

    /// The default queue, if it exists.
    #[must_use]
    pub fn default_queue(&self) -> Option<ResourceQueue> {
        self.state
            .lock()
            .queues
            .values()
            .map(|q| &q.config)
            .find(|q| q.is_default)
            .cloned()
    }

    /// Id of the default queue, if it exists.
    #[must_use]
    pub fn default_queue_id(&self) -> Option<Uuid> {
        self.default_queue().map(|q| q.id)
    }

    /// Create and persist a non-default container.
    ///
    /// # Errors
    ///
    /// - [`FabricError::Validation`] for an empty name
    /// - [`FabricError::Storage`] if the row cannot be persisted
    pub fn create_container(
        &self,
        name: impl Into<String>,
        kind: ResourceKind,
        capacity: u64,
    ) -> Result<ResourceContainer, FabricError> {
        let container = ResourceContainer::new(name, kind, capacity);
        if container.name.trim().is_empty() {
            return Err(FabricError::Validation("container name must not be empty".into()));
        }
        let mut state = self.state.lock();
        self.store.upsert_container(&container)?;
        state.containers.insert(
            container.id,
            ContainerSlot {
                config: container.clone(),
                used: 0,
                holders: HashMap::new(),
            },
        );
        tracing::info!(container_id = %container.id, %kind, capacity, "container created");
        Ok(container)
    }

    /// Create and persist a non-default queue.
    ///
    /// # Errors
    ///
    /// - [`FabricError::Validation`] for bad limits or containers of the wrong kind
    /// - [`FabricError::ContainerNotFound`] for an unknown container
    /// - [`FabricError::Storage`] if the row cannot be persisted
    pub fn create_queue(&self, options: QueueOptions) -> Result<ResourceQueue, FabricError> {
        self.insert_queue(options, false)
    }

    fn insert_queue(&self, options: QueueOptions, is_default: bool) -> Result<ResourceQueue, FabricError> {
        if options.name.trim().is_empty() {
            return Err(FabricError::Validation("queue name must not be empty".into()));
        }
        if options.max_concurrent_jobs == 0 {
            return Err(FabricError::Validation(
                "max_concurrent_jobs must be greater than 0".into(),
            ));
        }

        let mut state = self.state.lock();
        if is_default {
            if let Some(existing) = state.queues.values().find(|q| q.config.is_default) {
                return Ok(existing.config.clone());
            }
        }
        let check = |id: Uuid, kind: ResourceKind| -> Result<u64, FabricError> {
            let c = state
                .containers
                .get(&id)
                .ok_or(FabricError::ContainerNotFound(id))?;
            if c.config.kind != kind {
                return Err(FabricError::Validation(format!(
                    "container {id} is {}, expected {kind}",
                    c.config.kind
                )));
            }
            Ok(c.config.capacity)
        };
        check(options.cpu_container_id, ResourceKind::Cpu)?;
        let gpu_capacity = check(options.gpu_container_id, ResourceKind::Gpu)?;
        let ram_capacity = options
            .ram_container_id
            .map(|id| check(id, ResourceKind::Ram))
            .transpose()?;

        let demand = options.demand.unwrap_or_else(|| ResourceDemand {
            cpu_threads: 1,
            gpu_devices: u64::from(gpu_capacity > 0),
            ram_bytes: ram_capacity.map_or(0, |cap| cap / u64::from(options.max_concurrent_jobs)),
        });

        let queue = ResourceQueue {
            id: Uuid::new_v4(),
            name: options.name,
            cpu_container_id: options.cpu_container_id,
            gpu_container_id: options.gpu_container_id,
            ram_container_id: options.ram_container_id,
            max_concurrent_jobs: options.max_concurrent_jobs,
            max_job_duration_ms: options.max_job_duration.map(duration_ms),
            max_queue_wait_ms: options.max_queue_wait.map(duration_ms),
            demand,
            is_default,
            created_at_ms: now_ms(),
        };
        self.store.upsert_queue(&queue)?;
        state.queues.insert(
            queue.id,
            QueueSlot {
                config: queue.clone(),
                running: 0,
                waiters: VecDeque::new(),
            },
        );
        tracing::info!(
            queue_id = %queue.id,
            name = %queue.name,
            max_concurrent_jobs = queue.max_concurrent_jobs,
            is_default,
            "queue created"
        );
        Ok(queue)
    }

    /// Queue configuration by id.
    #[must_use]
    pub fn queue(&self, id: Uuid) -> Option<ResourceQueue> {
        self.state.lock().queues.get(&id).map(|q| q.config.clone())
    }

    /// All container configurations.
    #[must_use]
    pub fn containers(&self) -> Vec<ResourceContainer> {
        let mut rows: Vec<_> = self
            .state
            .lock()
            .containers
            .values()
            .map(|c| c.config.clone())
            .collect();
        rows.sort_by_key(|c| c.created_at_ms);
        rows
    }

    /// All queue configurations.
    #[must_use]
    pub fn queues(&self) -> Vec<ResourceQueue> {
        let mut rows: Vec<_> = self
            .state
            .lock()
            .queues
            .values()
            .map(|q| q.config.clone())
            .collect();
        rows.sort_by_key(|q| q.created_at_ms);
        rows
    }

    /// Acquire a lease through a queue, waiting as long as the queue allows.
    ///
    /// # Errors
    ///
    /// See [`Self::acquire_with_cancel`].
    pub async fn acquire(&self, queue_id: Uuid, holder_id: &str) -> Result<Lease, FabricError> {
        self.acquire_with_cancel(queue_id, holder_id, &CancellationToken::new())
            .await
    }

    /// Acquire a lease, giving up if `token` is cancelled while waiting.
    ///
    /// # Errors
    ///
    /// - [`FabricError::QueueNotFound`] / [`FabricError::ContainerNotFound`] for unknown ids
    /// - [`FabricError::CapacityExceeded`] if the demand can never fit
    /// - [`FabricError::QueueWaitTimeout`] if the queue's max wait elapsed
    /// - [`FabricError::Cancelled`] if `token` was cancelled first
    pub async fn acquire_with_cancel(
        &self,
        queue_id: Uuid,
        holder_id: &str,
        token: &CancellationToken,
    ) -> Result<Lease, FabricError> {
        let (rx, ticket, limit, queue_name) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let queue = state
                .queues
                .get(&queue_id)
                .ok_or(FabricError::QueueNotFound(queue_id))?;
            for (cid, units) in requirements(&queue.config) {
                let c = state
                    .containers
                    .get(&cid)
                    .ok_or(FabricError::ContainerNotFound(cid))?;
                if units > c.config.capacity {
                    return Err(FabricError::CapacityExceeded(format!(
                        "queue `{}` demands {units} from container `{}` of capacity {}",
                        queue.config.name, c.config.name, c.config.capacity
                    )));
                }
            }
            let queue_name = queue.config.name.clone();
            let limit = queue.config.max_queue_wait();

            if queue.waiters.is_empty() && state.can_admit(queue_id) {
                if let Some(lease) = state.grant(queue_id, holder_id) {
                    drop(guard);
                    tracing::debug!(
                        queue_id = %queue_id,
                        lease_id = %lease.id,
                        holder = holder_id,
                        "lease granted"
                    );
                    return Ok(lease);
                }
            }

            let (tx, rx) = oneshot::channel();
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            if let Some(queue) = state.queues.get_mut(&queue_id) {
                queue.waiters.push_back(Waiter {
                    ticket,
                    holder_id: holder_id.to_owned(),
                    tx,
                });
            }
            (rx, ticket, limit, queue_name)
        };
        tracing::debug!(queue_id = %queue_id, holder = holder_id, ticket, "waiting for admission");
        let mut pending = PendingAdmission {
            service: self,
            queue_id,
            ticket,
            rx,
            settled: false,
        };

        let wake = tokio::select! {
            biased;
            res = &mut pending.rx => Wake::Granted(res),
            () = token.cancelled() => Wake::Cancelled,
            () = wait_limit(limit) => Wake::TimedOut,
        };

        let timed_out = match wake {
            Wake::Granted(Ok(lease)) => {
                pending.settled = true;
                tracing::debug!(
                    queue_id = %queue_id,
                    lease_id = %lease.id,
                    holder = holder_id,
                    "lease granted after wait"
                );
                return Ok(lease);
            }
            Wake::Granted(Err(_)) => {
                pending.settled = true;
                return Err(FabricError::Shutdown);
            }
            Wake::Cancelled => false,
            Wake::TimedOut => true,
        };

        // A lease here means a release granted one just in time.
        let granted = pending.withdraw();

        match (timed_out, granted) {
            (true, Some(lease)) => Ok(lease),
            (true, None) => {
                let waited = limit.unwrap_or_default();
                tracing::warn!(queue_id = %queue_id, holder = holder_id, ?waited, "admission timed out");
                Err(FabricError::QueueWaitTimeout {
                    queue: queue_name,
                    waited,
                })
            }
            (false, granted) => {
                if let Some(lease) = granted {
                    self.release(&lease);
                }
                tracing::debug!(queue_id = %queue_id, holder = holder_id, "admission wait cancelled");
                Err(FabricError::Cancelled)
            }
        }
    }

    /// Return a lease's units and wake waiters. A second release is a no-op
    /// returning `false`.
    pub fn release(&self, lease: &Lease) -> bool {
        self.release_by_id(lease.id)
    }

    /// Release by lease id. Unknown ids return `false`.
    pub fn release_by_id(&self, lease_id: Uuid) -> bool {
        let (released, woken) = {
            let mut state = self.state.lock();
            match state.leases.remove(&lease_id) {
                Some(lease) => {
                    state.return_units(&lease);
                    (Some(lease), state.dispatch())
                }
                None => (None, 0),
            }
        };
        match released {
            Some(lease) => {
                tracing::debug!(
                    lease_id = %lease_id,
                    queue_id = %lease.queue_id,
                    holder = %lease.holder_id,
                    woken,
                    "lease released"
                );
                true
            }
            None => {
                tracing::debug!(lease_id = %lease_id, "release of unknown lease ignored");
                false
            }
        }
    }

    /// Outstanding lease by id.
    #[must_use]
    pub fn lease(&self, lease_id: Uuid) -> Option<Lease> {
        self.state.lock().leases.get(&lease_id).cloned()
    }

    /// Point-in-time usage of every container.
    #[must_use]
    pub fn container_status(&self) -> Vec<ContainerStatus> {
        let state = self.state.lock();
        let mut rows: Vec<_> = state
            .containers
            .values()
            .map(|c| {
                let queued_waiters = state
                    .queues
                    .values()
                    .filter(|q| requirements(&q.config).iter().any(|(cid, _)| *cid == c.config.id))
                    .map(|q| q.waiters.len())
                    .sum();
                let mut holders: Vec<String> = c.holders.values().cloned().collect();
                holders.sort();
                ContainerStatus {
                    id: c.config.id,
                    name: c.config.name.clone(),
                    kind: c.config.kind,
                    capacity: c.config.capacity,
                    used: c.used,
                    available: c.config.capacity.saturating_sub(c.used),
                    queued_waiters,
                    holders,
                    is_default: c.config.is_default,
                }
            })
            .collect();
        drop(state);
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    /// Point-in-time admission state of every queue.
    #[must_use]
    pub fn queue_status(&self) -> Vec<QueueStatus> {
        let state = self.state.lock();
        let mut rows: Vec<_> = state
            .queues
            .values()
            .map(|q| {
                let mut holders: Vec<String> = state
                    .leases
                    .values()
                    .filter(|l| l.queue_id == q.config.id)
                    .map(|l| l.holder_id.clone())
                    .collect();
                holders.sort();
                QueueStatus {
                    id: q.config.id,
                    name: q.config.name.clone(),
                    running_jobs: q.running,
                    max_concurrent_jobs: q.config.max_concurrent_jobs,
                    queued_waiters: q.waiters.len(),
                    holders,
                    is_default: q.config.is_default,
                }
            })
            .collect();
        drop(state);
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }
}

#[allow(clippy::cast_possible_truncation)]
fn duration_ms(d: Duration) -> u64 {
    d.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hardware::StaticProbe;
    use crate::infra::store::InMemoryStore;

    fn service(cpu: u64, gpu: u64) -> ResourceService {
        ResourceService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(StaticProbe::new(cpu, gpu, 1 << 30)),
            ResourceConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn default_demand_skips_empty_gpu_container() {
        let svc = service(4, 0);
        let queue = svc.ensure_default_queue_exists().unwrap();
        assert_eq!(queue.demand.cpu_threads, 1);
        assert_eq!(queue.demand.gpu_devices, 0);
        let ram = svc
            .containers()
            .into_iter()
            .find(|c| c.kind == ResourceKind::Ram)
            .unwrap();
        assert_eq!(queue.ram_container_id, Some(ram.id));
        assert_eq!(queue.demand.ram_bytes, ram.capacity / 2);
    }

    #[tokio::test]
    async fn demand_above_capacity_fails_fast() {
        let svc = service(4, 0);
        let cpu = svc.create_container("tiny", ResourceKind::Cpu, 1).unwrap();
        let gpu = svc.create_container("gpu", ResourceKind::Gpu, 0).unwrap();
        let queue = svc
            .create_queue(QueueOptions::new("wide", cpu.id, gpu.id).with_demand(ResourceDemand {
                cpu_threads: 2,
                gpu_devices: 0,
                ram_bytes: 0,
            }))
            .unwrap();
        let err = svc.acquire(queue.id, "h").await.unwrap_err();
        assert!(matches!(err, FabricError::CapacityExceeded(_)));
    }

    #[test]
    fn wrong_container_kind_is_rejected() {
        let svc = service(4, 0);
        let cpu = svc.create_container("cpu", ResourceKind::Cpu, 1).unwrap();
        let err = svc
            .create_queue(QueueOptions::new("q", cpu.id, cpu.id))
            .unwrap_err();
        assert!(matches!(err, FabricError::Validation(_)));
    }

    #[tokio::test]
    async fn dropped_waiter_does_not_leak_capacity() {
        let svc = service(1, 0);
        let queue = svc.ensure_default_queue_exists().unwrap();
        let held = svc.acquire(queue.id, "a").await.unwrap();

        let pending = svc.acquire(queue.id, "b");
        let timed = tokio::time::timeout(Duration::from_millis(20), pending).await;
        assert!(timed.is_err());

        assert!(svc.release(&held));
        let status = svc.queue_status();
        assert_eq!(status[0].running_jobs, 0);
        assert_eq!(status[0].queued_waiters, 0);
    }

    #[test]
    fn second_default_insert_returns_existing_queue() {
        let svc = service(2, 0);
        let first = svc.ensure_default_queue_exists().unwrap();
        let again = svc
            .insert_queue(
                QueueOptions::new("other", first.cpu_container_id, first.gpu_container_id),
                true,
            )
            .unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(svc.queues().len(), 1);
    }

    #[test]
    fn concurrent_ensure_creates_one_default_queue() {
        let svc = service(2, 0);
        let ids: Vec<Uuid> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| svc.ensure_default_queue_exists().unwrap().id))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(svc.queues().iter().filter(|q| q.is_default).count(), 1);
    }
}

//! Resource containers, queues, leases and their status views.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util::clock::now_ms;

/// Resource kind held by a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// CPU threads.
    Cpu,
    /// GPU devices.
    Gpu,
    /// RAM bytes.
    Ram,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
            Self::Ram => "ram",
        };
        f.write_str(s)
    }
}

/// Persisted configuration of a capacity-bounded pool of one resource kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceContainer {
    /// Container identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Capacity in units (threads, devices or bytes).
    pub capacity: u64,
    /// Whether this is the default container of its kind.
    pub is_default: bool,
    /// Creation time, ms since epoch.
    pub created_at_ms: u128,
}

impl ResourceContainer {
    /// Build a non-default container.
    pub fn new(name: impl Into<String>, kind: ResourceKind, capacity: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            capacity,
            is_default: false,
            created_at_ms: now_ms(),
        }
    }
}

/// Units one admitted job reserves from each container of a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDemand {
    /// CPU threads per job.
    pub cpu_threads: u64,
    /// GPU devices per job.
    pub gpu_devices: u64,
    /// RAM bytes per job; ignored when the queue has no RAM container.
    pub ram_bytes: u64,
}

/// Persisted admission policy pairing containers with limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQueue {
    /// Queue identifier.
    pub id: Uuid,
    /// Queue name.
    pub name: String,
    /// CPU container.
    pub cpu_container_id: Uuid,
    /// GPU container.
    pub gpu_container_id: Uuid,
    /// Optional RAM container; without one no RAM accounting happens.
    pub ram_container_id: Option<Uuid>,
    /// Maximum simultaneous admissions through this queue.
    pub max_concurrent_jobs: u32,
    /// Maximum job run time once admitted, in milliseconds.
    pub max_job_duration_ms: Option<u64>,
    /// Maximum time a caller may wait for admission, in milliseconds.
    pub max_queue_wait_ms: Option<u64>,
    /// Units each admitted job reserves.
    pub demand: ResourceDemand,
    /// Whether this is the default queue.
    pub is_default: bool,
    /// Creation time, ms since epoch.
    pub created_at_ms: u128,
}

impl ResourceQueue {
    /// Maximum job duration, if bounded.
    #[must_use]
    pub fn max_job_duration(&self) -> Option<Duration> {
        self.max_job_duration_ms.map(Duration::from_millis)
    }

    /// Maximum admission wait, if bounded.
    #[must_use]
    pub fn max_queue_wait(&self) -> Option<Duration> {
        self.max_queue_wait_ms.map(Duration::from_millis)
    }
}

/// Options for creating a resource queue.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Queue name.
    pub name: String,
    /// CPU container.
    pub cpu_container_id: Uuid,
    /// GPU container.
    pub gpu_container_id: Uuid,
    /// Optional RAM container.
    pub ram_container_id: Option<Uuid>,
    /// Maximum simultaneous admissions.
    pub max_concurrent_jobs: u32,
    /// Maximum job duration.
    pub max_job_duration: Option<Duration>,
    /// Maximum admission wait.
    pub max_queue_wait: Option<Duration>,
    /// Per-job demand; derived from the containers when `None`.
    pub demand: Option<ResourceDemand>,
}

impl QueueOptions {
    /// Options for a queue over the given CPU and GPU containers.
    pub fn new(name: impl Into<String>, cpu_container_id: Uuid, gpu_container_id: Uuid) -> Self {
        Self {
            name: name.into(),
            cpu_container_id,
            gpu_container_id,
            ram_container_id: None,
            max_concurrent_jobs: 1,
            max_job_duration: None,
            max_queue_wait: None,
            demand: None,
        }
    }

    /// Attach a RAM container.
    #[must_use]
    pub const fn with_ram_container(mut self, id: Uuid) -> Self {
        self.ram_container_id = Some(id);
        self
    }

    /// Set the concurrency ceiling.
    #[must_use]
    pub const fn with_max_concurrent_jobs(mut self, n: u32) -> Self {
        self.max_concurrent_jobs = n;
        self
    }

    /// Bound job duration.
    #[must_use]
    pub const fn with_max_job_duration(mut self, d: Duration) -> Self {
        self.max_job_duration = Some(d);
        self
    }

    /// Bound admission wait.
    #[must_use]
    pub const fn with_max_queue_wait(mut self, d: Duration) -> Self {
        self.max_queue_wait = Some(d);
        self
    }

    /// Set the per-job demand explicitly.
    #[must_use]
    pub const fn with_demand(mut self, demand: ResourceDemand) -> Self {
        self.demand = Some(demand);
        self
    }
}

/// A granted reservation through one queue, held for the duration of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Lease identifier.
    pub id: Uuid,
    /// Queue that admitted the holder.
    pub queue_id: Uuid,
    /// Holder (task or job id).
    pub holder_id: String,
    /// Units reserved.
    pub demand: ResourceDemand,
    /// Containers the units were taken from (CPU, GPU, optional RAM).
    pub container_ids: Vec<Uuid>,
    /// Grant time, ms since epoch.
    pub granted_at_ms: u128,
    /// Duration bound copied from the queue; enforced by the lease holder.
    pub max_duration_ms: Option<u64>,
}

impl Lease {
    /// Duration bound the holder must enforce, if any.
    #[must_use]
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_ms.map(Duration::from_millis)
    }
}

/// Point-in-time view of a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStatus {
    /// Container identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Capacity in units.
    pub capacity: u64,
    /// Units in use.
    pub used: u64,
    /// Units free.
    pub available: u64,
    /// Callers waiting on queues that draw from this container.
    pub queued_waiters: usize,
    /// Current holders.
    pub holders: Vec<String>,
    /// Whether this is a default container.
    pub is_default: bool,
}

/// Point-in-time view of a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Queue identifier.
    pub id: Uuid,
    /// Queue name.
    pub name: String,
    /// Outstanding leases.
    pub running_jobs: u32,
    /// Concurrency ceiling.
    pub max_concurrent_jobs: u32,
    /// Callers waiting for admission.
    pub queued_waiters: usize,
    /// Holders of outstanding leases.
    pub holders: Vec<String>,
    /// Whether this is the default queue.
    pub is_default: bool,
}

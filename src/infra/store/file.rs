//! File-backed store using one JSON-lines log per collection.
//!
//! Every upsert appends the full row; on open the log is replayed and the last
//! row for each key wins. Lines that fail to parse are logged and skipped so a
//! single corrupted row cannot block startup. [`JsonFileStore::compact`]
//! rewrites each log with only the live rows.

use std::collections::HashMap;
use std::fs::{self, create_dir_all, OpenOptions};
use std::hash::Hash;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use super::memory::sort_tasks;
use super::{ResourceStore, TaskStore, TrainingJobStore};
use crate::core::error::FabricError;
use crate::core::resource::{ResourceContainer, ResourceQueue};
use crate::core::task::{BackgroundTask, TaskId, TaskStatus};
use crate::core::training_job::{JobStatus, TrainingJob};

fn storage_err(e: impl std::fmt::Display) -> FabricError {
    FabricError::Storage(e.to_string())
}

/// One JSONL log plus its replayed rows.
struct Collection<K, V> {
    path: PathBuf,
    rows: Mutex<HashMap<K, V>>,
    key: fn(&V) -> K,
}

impl<K, V> Collection<K, V>
where
    K: Eq + Hash + Copy,
    V: Serialize + DeserializeOwned + Clone,
{
    fn open(path: PathBuf, key: fn(&V) -> K) -> Result<(Self, usize), FabricError> {
        let mut rows = HashMap::new();
        let mut skipped = 0;
        if path.exists() {
            let file = OpenOptions::new()
                .read(true)
                .open(&path)
                .map_err(storage_err)?;
            for (line_no, line) in BufReader::new(file).lines().enumerate() {
                let line = line.map_err(storage_err)?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<V>(&line) {
                    Ok(row) => {
                        rows.insert(key(&row), row);
                    }
                    Err(e) => {
                        skipped += 1;
                        tracing::warn!(
                            path = %path.display(),
                            line = line_no + 1,
                            error = %e,
                            "skipping corrupted row"
                        );
                    }
                }
            }
        }
        Ok((
            Self {
                path,
                rows: Mutex::new(rows),
                key,
            },
            skipped,
        ))
    }

    fn upsert(&self, row: &V) -> Result<(), FabricError> {
        let line = serde_json::to_string(row).map_err(storage_err)?;
        let mut rows = self.rows.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(storage_err)?;
        writeln!(file, "{line}").map_err(storage_err)?;
        rows.insert((self.key)(row), row.clone());
        Ok(())
    }

    fn get(&self, key: &K) -> Option<V> {
        self.rows.lock().get(key).cloned()
    }

    fn filter(&self, pred: impl Fn(&V) -> bool) -> Vec<V> {
        self.rows.lock().values().filter(|v| pred(v)).cloned().collect()
    }

    fn compact(&self) -> Result<(), FabricError> {
        let rows = self.rows.lock();
        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)
                .map_err(storage_err)?;
            for row in rows.values() {
                let line = serde_json::to_string(row).map_err(storage_err)?;
                writeln!(file, "{line}").map_err(storage_err)?;
            }
            file.sync_all().map_err(storage_err)?;
        }
        fs::rename(&tmp, &self.path).map_err(storage_err)
    }
}

/// Durable store writing `tasks.jsonl`, `containers.jsonl`, `queues.jsonl`
/// and `training_jobs.jsonl` under one directory.
pub struct JsonFileStore {
    dir: PathBuf,
    tasks: Collection<TaskId, BackgroundTask>,
    containers: Collection<Uuid, ResourceContainer>,
    queues: Collection<Uuid, ResourceQueue>,
    jobs: Collection<Uuid, TrainingJob>,
    skipped_rows: usize,
}

impl JsonFileStore {
    /// Open (or create) a store directory and replay its logs.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::Storage`] if the directory or a log cannot be read.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, FabricError> {
        let dir = dir.as_ref().to_path_buf();
        create_dir_all(&dir).map_err(storage_err)?;
        let (tasks, s1) = Collection::open(dir.join("tasks.jsonl"), |t: &BackgroundTask| t.id)?;
        let (containers, s2) =
            Collection::open(dir.join("containers.jsonl"), |c: &ResourceContainer| c.id)?;
        let (queues, s3) = Collection::open(dir.join("queues.jsonl"), |q: &ResourceQueue| q.id)?;
        let (jobs, s4) =
            Collection::open(dir.join("training_jobs.jsonl"), |j: &TrainingJob| j.id)?;
        let skipped_rows = s1 + s2 + s3 + s4;
        tracing::info!(dir = %dir.display(), skipped_rows, "opened file store");
        Ok(Self {
            dir,
            tasks,
            containers,
            queues,
            jobs,
            skipped_rows,
        })
    }

    /// Store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rows skipped as corrupted while opening.
    #[must_use]
    pub const fn skipped_rows(&self) -> usize {
        self.skipped_rows
    }

    /// Rewrite every log with only its live rows.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::Storage`] on I/O failure.
    pub fn compact(&self) -> Result<(), FabricError> {
        self.tasks.compact()?;
        self.containers.compact()?;
        self.queues.compact()?;
        self.jobs.compact()
    }
}

impl TaskStore for JsonFileStore {
    fn upsert_task(&self, task: &BackgroundTask) -> Result<(), FabricError> {
        self.tasks.upsert(task)
    }

    fn get_task(&self, id: TaskId) -> Result<Option<BackgroundTask>, FabricError> {
        Ok(self.tasks.get(&id))
    }

    fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<BackgroundTask>, FabricError> {
        let mut rows = self.tasks.filter(|t| status.is_none_or(|s| t.status == s));
        sort_tasks(&mut rows);
        Ok(rows)
    }

    fn list_tasks_for_entity(&self, entity_id: &str) -> Result<Vec<BackgroundTask>, FabricError> {
        let mut rows = self
            .tasks
            .filter(|t| t.related_entity_id.as_deref() == Some(entity_id));
        sort_tasks(&mut rows);
        Ok(rows)
    }
}

impl ResourceStore for JsonFileStore {
    fn upsert_container(&self, container: &ResourceContainer) -> Result<(), FabricError> {
        self.containers.upsert(container)
    }

    fn list_containers(&self) -> Result<Vec<ResourceContainer>, FabricError> {
        let mut rows = self.containers.filter(|_| true);
        rows.sort_by_key(|c| c.created_at_ms);
        Ok(rows)
    }

    fn upsert_queue(&self, queue: &ResourceQueue) -> Result<(), FabricError> {
        self.queues.upsert(queue)
    }

    fn list_queues(&self) -> Result<Vec<ResourceQueue>, FabricError> {
        let mut rows = self.queues.filter(|_| true);
        rows.sort_by_key(|q| q.created_at_ms);
        Ok(rows)
    }
}

impl TrainingJobStore for JsonFileStore {
    fn upsert_training_job(&self, job: &TrainingJob) -> Result<(), FabricError> {
        self.jobs.upsert(job)
    }

    fn get_training_job(&self, id: Uuid) -> Result<Option<TrainingJob>, FabricError> {
        Ok(self.jobs.get(&id))
    }

    fn list_training_jobs(
        &self,
        status: Option<JobStatus>,
    ) -> Result<Vec<TrainingJob>, FabricError> {
        let mut rows = self.jobs.filter(|j| status.is_none_or(|s| j.status == s));
        rows.sort_by_key(|j| j.created_at_ms);
        Ok(rows)
    }
}

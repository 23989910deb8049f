//! File-per-job store
//!
//! Each job lives in `.jobs/<uuid>.json`, published with a write-then-rename
//! so readers see either the old or the new snapshot. An in-memory map
//! mirrors the directory and serves reads of finished jobs.
//!
//! The store that records a job holds an advisory lease on `.jobs/<uuid>.lock`
//! until the job is terminal. Another process opening the store can take
//! that lease only if the owner has exited, which is how orphaned RUNNING
//! jobs are told apart from jobs still in progress elsewhere.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};

use super::JobStore;
use crate::error::{BackupError, BackupResult};
use crate::lock::{FileLock, LockGuard, OperationLock};
use crate::models::{BackupJob, JobId};
use crate::storage::file_io::{read_json_required, write_json_atomic, TEMP_SUFFIX};

/// Error recorded on jobs whose owning process exited while they ran
pub const INTERRUPTED_MESSAGE: &str = "interrupted by process restart";

pub struct FileJobStore {
    dir: PathBuf,
    cache: RwLock<HashMap<JobId, BackupJob>>,
    leases: FileLock,
    held: Mutex<HashMap<JobId, LockGuard>>,
}

impl FileJobStore {
    /// Open the store, loading every record and failing orphaned jobs
    ///
    /// A RUNNING job is failed only when its lease can be taken, meaning the
    /// process that ran it is gone. Jobs another live process is running
    /// are left alone.
    pub fn open(dir: impl Into<PathBuf>) -> BackupResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| BackupError::io_at(&dir, e))?;

        let store = Self {
            leases: FileLock::new(&dir),
            dir,
            cache: RwLock::new(HashMap::new()),
            held: Mutex::new(HashMap::new()),
        };

        for entry in std::fs::read_dir(&store.dir).map_err(|e| BackupError::io_at(&store.dir, e))? {
            let path = entry?.path();
            if !is_record(&path) {
                continue;
            }
            match read_json_required::<BackupJob, _>(&path) {
                Ok(job) if job.is_terminal() => {
                    store.cache.write().insert(job.id, job);
                }
                Ok(job) => {
                    let job = store.recover(job)?;
                    store.cache.write().insert(job.id, job);
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable job record"),
            }
        }
        Ok(store)
    }

    /// Fail a RUNNING job if its owner is gone; otherwise return it as is
    fn recover(&self, job: BackupJob) -> BackupResult<BackupJob> {
        let lease = match self.leases.try_acquire(&job.id.to_string()) {
            Ok(lease) => lease,
            Err(e) if e.is_lock_contention() => {
                tracing::debug!(job = %job.id, "job is running in another process");
                return Ok(job);
            }
            Err(e) => return Err(e),
        };

        // The owner may have finished between our read and the lease
        let mut current = self.read_record(job.id)?.unwrap_or(job);
        if !current.is_terminal() {
            tracing::warn!(job = %current.id, operation = %current.operation, "failing job orphaned by restart");
            current.fail(INTERRUPTED_MESSAGE)?;
            self.persist(&current)?;
        }
        drop(lease);
        self.remove_lease_file(current.id);
        Ok(current)
    }

    fn path_for(&self, id: JobId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn persist(&self, job: &BackupJob) -> BackupResult<()> {
        write_json_atomic(self.path_for(job.id), job)
    }

    fn read_record(&self, id: JobId) -> BackupResult<Option<BackupJob>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        read_json_required(&path).map(Some)
    }

    /// Latest snapshot: the cache for finished jobs, the file otherwise
    fn current(&self, id: JobId) -> BackupResult<Option<BackupJob>> {
        if let Some(job) = self.cache.read().get(&id).filter(|j| j.is_terminal()) {
            return Ok(Some(job.clone()));
        }
        let fresh = self.read_record(id)?;
        let mut cache = self.cache.write();
        match &fresh {
            Some(job) => {
                cache.insert(id, job.clone());
            }
            None => {
                cache.remove(&id);
            }
        }
        Ok(fresh)
    }

    fn release(&self, id: JobId) {
        if self.held.lock().remove(&id).is_some() {
            self.remove_lease_file(id);
        }
    }

    fn remove_lease_file(&self, id: JobId) {
        let _ = std::fs::remove_file(self.leases.path_for(&id.to_string()));
    }
}

fn is_record(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    name.ends_with(".json") && !name.ends_with(TEMP_SUFFIX)
}

impl JobStore for FileJobStore {
    fn insert(&self, job: &BackupJob) -> BackupResult<()> {
        let mut cache = self.cache.write();
        if cache.contains_key(&job.id) || self.path_for(job.id).exists() {
            return Err(BackupError::InvalidState(format!("job {} already exists", job.id)));
        }
        if !job.is_terminal() {
            let lease = self.leases.try_acquire(&job.id.to_string())?;
            self.held.lock().insert(job.id, lease);
        }
        if let Err(e) = self.persist(job) {
            drop(cache);
            self.release(job.id);
            return Err(e);
        }
        cache.insert(job.id, job.clone());
        Ok(())
    }

    fn save(&self, job: &BackupJob) -> BackupResult<()> {
        let stored = self.current(job.id)?;
        let mut cache = self.cache.write();
        if let Some(stored) = stored {
            if stored.is_terminal() && stored.status != job.status {
                return Err(BackupError::InvalidState(format!(
                    "job {} is already {}",
                    job.id, stored.status
                )));
            }
        }
        self.persist(job)?;
        cache.insert(job.id, job.clone());
        drop(cache);
        if job.is_terminal() {
            self.release(job.id);
        }
        Ok(())
    }

    fn get(&self, id: JobId) -> BackupResult<Option<BackupJob>> {
        self.current(id)
    }

    fn list(&self) -> BackupResult<Vec<BackupJob>> {
        let unfinished: Vec<JobId> = self
            .cache
            .read()
            .values()
            .filter(|j| !j.is_terminal())
            .map(|j| j.id)
            .collect();
        for id in unfinished {
            self.current(id)?;
        }
        let mut jobs: Vec<BackupJob> = self.cache.read().values().cloned().collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(jobs)
    }

    fn remove(&self, id: JobId) -> BackupResult<bool> {
        let mut cache = self.cache.write();
        let existed = cache.remove(&id).is_some();
        let path = self.path_for(id);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| BackupError::io_at(&path, e))?;
        }
        drop(cache);
        self.release(id);
        Ok(existed)
    }

    fn update(&self, id: JobId, f: &mut dyn FnMut(&mut BackupJob)) -> BackupResult<BackupJob> {
        let mut job = self
            .current(id)?
            .ok_or_else(|| BackupError::job_not_found(id.to_string()))?;
        let mut cache = self.cache.write();
        let status = job.status;
        f(&mut job);
        if job.status != status {
            return Err(BackupError::InvalidState(format!(
                "update may not change the status of job {}",
                id
            )));
        }
        self.persist(&job)?;
        cache.insert(id, job.clone());
        Ok(job)
    }
}

//! Engine context and orchestration facade
//!
//! [`Engine`] bundles what every pipeline needs: settings, the on-disk
//! layout, the job store, the tool runner and the operation lock. The
//! [`BackupOrchestrator`] accepts requests and runs pipelines against it on
//! a bounded worker pool.

mod orchestrator;

pub use orchestrator::BackupOrchestrator;

use std::path::PathBuf;
use std::sync::Arc;

use crate::audit::OperationLog;
use crate::config::{BackupPaths, Settings};
use crate::error::BackupResult;
use crate::jobs::{FileJobStore, JobStore};
use crate::lock::{FileLock, OperationLock, OPERATION_LOCK};
use crate::models::BackupJob;
use crate::tools::{CommandRunner, SystemRunner};

/// Shared state for all pipelines
pub struct Engine {
    pub settings: Settings,
    pub paths: BackupPaths,
    pub store: Arc<dyn JobStore>,
    pub runner: Arc<dyn CommandRunner>,
    pub lock: Arc<dyn OperationLock>,
}

impl Engine {
    /// Open an engine that runs real tools
    pub fn open(settings: Settings) -> BackupResult<Self> {
        Self::with_runner(settings, Arc::new(SystemRunner::new()))
    }

    /// Open an engine with a custom tool runner
    pub fn with_runner(settings: Settings, runner: Arc<dyn CommandRunner>) -> BackupResult<Self> {
        let paths = BackupPaths::new(&settings.backup_root);
        paths.ensure_directories()?;
        let store = Arc::new(FileJobStore::open(paths.jobs_dir())?);
        let lock = Arc::new(FileLock::new(paths.lock_dir()));

        let engine = Self {
            settings,
            paths,
            store,
            runner,
            lock,
        };
        engine.clear_stale_freeze_marker();
        Ok(engine)
    }

    /// Remove a freeze marker left behind by a crashed restore
    ///
    /// A live restore holds the operation lock for as long as its marker
    /// exists, so a marker we can take the lock over is stale.
    fn clear_stale_freeze_marker(&self) {
        let marker = self.paths.freeze_marker();
        if !marker.exists() {
            return;
        }
        if let Ok(_guard) = self.lock.try_acquire(OPERATION_LOCK) {
            tracing::warn!(marker = %marker.display(), "removing stale restore marker");
            let _ = std::fs::remove_file(&marker);
        }
    }

    /// Log file for a job that has no backup directory of its own
    pub fn job_log_path(&self, job: &BackupJob) -> PathBuf {
        self.paths
            .logs_dir()
            .join(format!("{}-{}.log", job.operation.slug(), job.id))
    }

    /// Open the `.logs/` operation log for a job and record it on the job
    pub fn open_job_log(&self, job: &mut BackupJob) -> BackupResult<OperationLog> {
        let path = self.job_log_path(job);
        let log = OperationLog::open(&path)?;
        job.logs_path = Some(path);
        Ok(log)
    }
}

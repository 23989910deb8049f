//! Request facade
//!
//! Every submit call records a RUNNING job and returns its id at once; the
//! pipeline runs later on a worker gated by a semaphore with `workers`
//! permits. Requests that can be refused without touching anything (an
//! existing backup for today, a wrong confirmation phrase, a delete the
//! policy forbids, an archive that fails verification) are refused
//! synchronously and never create a job.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

use super::Engine;
use crate::backup::{
    check_confirmation, deletable_job, list_backups, run_backup, run_delete, run_restore,
    valid_backup_on, BackupRequest, RestoreRequest,
};
use crate::cloud::{run_test_cloud, run_upload};
use crate::error::{BackupError, BackupResult};
use crate::export::{export_backup, run_import, stage_import};
use crate::models::{BackupJob, BackupSummary, JobId, Operation, Trigger};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Entry point for callers: CLI, HTTP handlers, schedulers
#[derive(Clone)]
pub struct BackupOrchestrator {
    engine: Arc<Engine>,
    permits: Arc<Semaphore>,
    handle: Handle,
}

impl BackupOrchestrator {
    /// Wrap an engine; must be called from within a tokio runtime
    pub fn new(engine: Engine) -> BackupResult<Self> {
        let handle = Handle::try_current()
            .map_err(|e| BackupError::Config(format!("no async runtime available: {}", e)))?;
        let permits = Arc::new(Semaphore::new(engine.settings.workers.max(1)));
        Ok(Self {
            engine: Arc::new(engine),
            permits,
            handle,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn submit_backup(&self, request: BackupRequest) -> BackupResult<JobId> {
        self.refuse_during_restore("backup")?;
        if !request.force {
            if let Some(existing) = valid_backup_on(&self.engine.paths, Utc::now().date_naive()) {
                return Err(BackupError::AlreadyExists(existing));
            }
        }
        let job = BackupJob::new(Operation::Backup, request.trigger, request.deletable);
        self.launch(job, move |engine, job| run_backup(engine, job, &request))
    }

    pub fn submit_restore(&self, request: RestoreRequest) -> BackupResult<JobId> {
        check_confirmation(&request.confirmation)?;
        let job = BackupJob::new(Operation::Restore, request.trigger, false);
        self.launch(job, move |engine, job| run_restore(engine, job, &request))
    }

    pub fn submit_upload(&self, backup: &str, trigger: Trigger) -> BackupResult<JobId> {
        let backup = backup.to_string();
        let job = BackupJob::new(Operation::Upload, trigger, false);
        self.launch(job, move |engine, job| run_upload(engine, job, &backup))
    }

    /// Validate an archive now, copy it into the root in the background
    pub fn submit_import(&self, archive: &[u8], trigger: Trigger, deletable: bool) -> BackupResult<JobId> {
        let staged = stage_import(&self.engine.paths, archive)?;
        let job = BackupJob::new(Operation::Import, trigger, deletable);
        self.launch(job, move |engine, job| run_import(engine, job, staged))
    }

    /// Delete the backup produced by `target`
    pub fn submit_delete(&self, target: JobId, trigger: Trigger) -> BackupResult<JobId> {
        deletable_job(&self.engine, target)?;
        let job = BackupJob::new(Operation::Delete, trigger, false);
        self.launch(job, move |engine, job| run_delete(engine, job, target))
    }

    pub fn submit_test_cloud(&self, trigger: Trigger) -> BackupResult<JobId> {
        let job = BackupJob::new(Operation::TestCloud, trigger, false);
        self.launch(job, run_test_cloud)
    }

    pub fn list_backups(&self) -> BackupResult<Vec<BackupSummary>> {
        list_backups(&self.engine.paths, self.engine.store.as_ref())
    }

    /// Most recent jobs, newest first
    pub fn list_jobs(&self, limit: usize) -> BackupResult<Vec<BackupJob>> {
        let mut jobs = self.engine.store.list()?;
        jobs.truncate(limit);
        Ok(jobs)
    }

    pub fn get_job(&self, id: JobId) -> BackupResult<BackupJob> {
        self.engine
            .store
            .get(id)?
            .ok_or_else(|| BackupError::job_not_found(id.to_string()))
    }

    /// Portable archive of one backup directory
    pub fn export_archive(&self, backup: &str) -> BackupResult<Vec<u8>> {
        export_backup(&self.engine.paths, backup)
    }

    /// Poll the store until the job reaches a terminal status
    pub async fn wait_for(&self, id: JobId) -> BackupResult<BackupJob> {
        loop {
            let job = self.get_job(id)?;
            if job.is_terminal() {
                return Ok(job);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn refuse_during_restore(&self, what: &str) -> BackupResult<()> {
        if self.engine.paths.restore_in_progress() {
            return Err(BackupError::PolicyViolation(format!(
                "cannot start a {} while a restore is in progress",
                what
            )));
        }
        Ok(())
    }

    fn launch<F>(&self, job: BackupJob, body: F) -> BackupResult<JobId>
    where
        F: FnOnce(&Engine, &mut BackupJob) -> BackupResult<()> + Send + 'static,
    {
        self.engine.store.insert(&job)?;
        let id = job.id;
        tracing::info!(job = %id, operation = %job.operation, trigger = %job.trigger, "job submitted");

        let engine = Arc::clone(&self.engine);
        let permits = Arc::clone(&self.permits);
        self.handle.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    fail_recorded(&engine, id, format!("worker pool closed: {}", e));
                    return;
                }
            };
            let worker = Arc::clone(&engine);
            let joined = tokio::task::spawn_blocking(move || run_job(&worker, job, body)).await;
            if let Err(e) = joined {
                tracing::error!(job = %id, error = %e, "job worker panicked");
                fail_recorded(&engine, id, format!("worker panicked: {}", e));
            }
        });
        Ok(id)
    }
}

/// Run a pipeline body and publish the terminal snapshot
fn run_job<F>(engine: &Engine, mut job: BackupJob, body: F)
where
    F: FnOnce(&Engine, &mut BackupJob) -> BackupResult<()>,
{
    let result = body(engine, &mut job);
    let finished = match &result {
        Ok(()) => job.succeed(),
        Err(e) => job.fail(e.to_string()),
    };
    if let Err(e) = finished.and_then(|()| engine.store.save(&job)) {
        tracing::error!(job = %job.id, error = %e, "failed to record job outcome");
        return;
    }
    match result {
        Ok(()) => tracing::info!(job = %job.id, operation = %job.operation, "job succeeded"),
        Err(e) => tracing::warn!(job = %job.id, operation = %job.operation, error = %e, "job failed"),
    }
}

/// Fail the last stored snapshot of a job whose worker never finished it
fn fail_recorded(engine: &Engine, id: JobId, message: String) {
    let Ok(Some(mut job)) = engine.store.get(id) else {
        return;
    };
    if job.is_terminal() {
        return;
    }
    if let Err(e) = job.fail(message).and_then(|()| engine.store.save(&job)) {
        tracing::error!(job = %id, error = %e, "failed to record job failure");
    }
}

//! Operator-initiated backup deletion
//!
//! A backup can be deleted through the job that produced it, and only when
//! that job is finished, flagged deletable (never true for cron backups) and
//! no restore is running.

use crate::engine::Engine;
use crate::error::{BackupError, BackupResult};
use crate::models::{BackupJob, JobId, Operation};

/// Check whether the backup produced by `target` may be deleted
pub fn check_delete_policy(engine: &Engine, target: &BackupJob) -> BackupResult<()> {
    if !matches!(target.operation, Operation::Backup | Operation::Import) {
        return Err(BackupError::PolicyViolation(format!(
            "job {} is a {} job and owns no backup",
            target.id, target.operation
        )));
    }
    if !target.is_terminal() {
        return Err(BackupError::PolicyViolation(format!(
            "job {} is still running",
            target.id
        )));
    }
    if !target.is_deletable() {
        return Err(BackupError::PolicyViolation(format!(
            "backup of job {} is not deletable",
            target.id
        )));
    }
    if engine.paths.restore_in_progress() {
        return Err(BackupError::PolicyViolation(
            "a restore is in progress".into(),
        ));
    }
    Ok(())
}

/// Look up a job and check its backup may be deleted
pub fn deletable_job(engine: &Engine, target_id: JobId) -> BackupResult<BackupJob> {
    let target = engine
        .store
        .get(target_id)?
        .ok_or_else(|| BackupError::job_not_found(target_id.to_string()))?;
    check_delete_policy(engine, &target)?;
    Ok(target)
}

/// Delete pipeline: remove the directory and the producing job's record
#[tracing::instrument(skip_all, fields(job = %job.id, target = %target_id))]
pub fn run_delete(engine: &Engine, job: &mut BackupJob, target_id: JobId) -> BackupResult<()> {
    let log = engine.open_job_log(job)?;
    let target = match deletable_job(engine, target_id) {
        Ok(target) => target,
        Err(e) => {
            log.error(format!("delete refused: {}", e));
            return Err(e);
        }
    };

    if let Some(dir) = target.backup_path() {
        job.set_backup_path(dir)?;
        if dir.exists() {
            std::fs::remove_dir_all(dir).map_err(|e| BackupError::io_at(dir, e))?;
            log.info(format!("removed {}", dir.display()));
        } else {
            log.warn(format!("{} was already gone", dir.display()));
        }
    }
    engine.store.remove(target_id)?;
    log.info(format!("removed job record {}", target_id));
    job.set_extra("deleted_job", target_id);
    job.set_extra("deleted_backup", target.backup_name());
    Ok(())
}

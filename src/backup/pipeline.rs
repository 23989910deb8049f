//! Backup pipeline
//!
//! Runs under the exclusive operation lock and moves through
//! `INIT → DB_DUMPED → MEDIA_ARCHIVED → INFRA_ARCHIVED → MANIFEST_WRITTEN →
//! CHECKSUMMED → RETAINED → DONE`, or `FAILED` from any stage. The job
//! record is republished after every stage so pollers can follow along.
//!
//! A database failure aborts the run. Media and infra failures are
//! recorded in the manifest's `errors` and the run continues.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use super::integrity::write_checksums;
use super::producers::{archive_infra, archive_media, current_revision, dump_database, encrypt_artifact};
use super::retention::{cron_candidates, enforce_retention, RetentionCandidate};
use super::{valid_backup_on, BackupRequest, BackupStage};
use crate::audit::OperationLog;
use crate::config::paths::{BACKUP_LOG, MANIFEST_FILE};
use crate::crypto::SecureString;
use crate::engine::Engine;
use crate::error::{BackupError, BackupResult};
use crate::lock::{with_exclusive_lock, OPERATION_LOCK};
use crate::models::{BackupJob, Manifest, Trigger};
use crate::storage::file_io::file_size;

/// Run a backup for `job`
#[tracing::instrument(skip_all, fields(job = %job.id, trigger = %job.trigger))]
pub fn run_backup(engine: &Engine, job: &mut BackupJob, request: &BackupRequest) -> BackupResult<()> {
    with_exclusive_lock(engine.lock.as_ref(), OPERATION_LOCK, || {
        backup_locked(engine, job, request)
    })
}

fn backup_locked(engine: &Engine, job: &mut BackupJob, request: &BackupRequest) -> BackupResult<()> {
    let today = Utc::now().date_naive();
    if !request.force {
        if let Some(existing) = valid_backup_on(&engine.paths, today) {
            return Err(BackupError::AlreadyExists(existing));
        }
    }

    let name = engine.paths.unique_backup_name(today);
    let dir = engine.paths.backup_dir(&name);
    fs::create_dir_all(&dir).map_err(|e| BackupError::io_at(&dir, e))?;
    job.set_backup_path(&dir)?;

    let log = OperationLog::open(dir.join(BACKUP_LOG))?;
    job.logs_path = Some(log.path().to_path_buf());
    log.info(format!(
        "backup {} started (job {}, trigger {}, force {})",
        name, job.id, job.trigger, request.force
    ));

    let manifest = Manifest::new(engine.settings.creator(), job.trigger);
    let mut run = BackupRun {
        engine,
        job,
        log: &log,
        dir,
        manifest,
    };
    let result = run.execute();
    if let Err(e) = &result {
        log.error(format!("backup failed: {}", e));
        run.mark(BackupStage::Failed);
    }
    result
}

struct BackupRun<'a> {
    engine: &'a Engine,
    job: &'a mut BackupJob,
    log: &'a OperationLog,
    dir: PathBuf,
    manifest: Manifest,
}

impl BackupRun<'_> {
    fn execute(&mut self) -> BackupResult<()> {
        self.advance(BackupStage::Init)?;
        self.manifest.job_id = Some(self.job.id);

        match current_revision(self.engine, self.log) {
            Ok(revision) => self.manifest.git_commit = revision,
            Err(e) => self.soft_error(format!("revision snapshot unavailable: {}", e)),
        }

        let key = self.engine.settings.encryption_key();
        self.manifest.encryption_enabled = key.is_some();

        let db = dump_database(self.engine, &self.dir, self.log)?;
        let db = self.seal(db, key.as_ref())?;
        self.manifest.success.db = true;
        self.manifest.sizes.db = file_size(&db);
        self.manifest.files.db = file_name(&db);
        self.job.db_path = Some(db);
        self.advance(BackupStage::DbDumped)?;

        let media = archive_media(self.engine, &self.dir, self.log).and_then(|produced| match produced {
            Some(path) => self.seal(path, key.as_ref()).map(Some),
            None => Ok(None),
        });
        match media {
            Ok(Some(path)) => {
                self.manifest.success.media = true;
                self.manifest.sizes.media = file_size(&path);
                self.manifest.files.media = file_name(&path);
                self.job.media_path = Some(path);
            }
            Ok(None) => self.soft_error(format!(
                "media root {} not found; media skipped",
                self.engine.settings.media_root.display()
            )),
            Err(e) => self.soft_error(e.to_string()),
        }
        self.advance(BackupStage::MediaArchived)?;

        let infra = archive_infra(self.engine, &self.dir, self.log)
            .and_then(|path| self.seal(path, key.as_ref()));
        match infra {
            Ok(path) => {
                self.manifest.success.infra = true;
                self.manifest.sizes.infra = file_size(&path);
                self.manifest.files.infra = file_name(&path);
                self.job.infra_path = Some(path);
            }
            Err(e) => self.soft_error(e.to_string()),
        }
        self.advance(BackupStage::InfraArchived)?;

        self.manifest.save(&self.dir)?;
        self.job.meta_path = Some(self.dir.join(MANIFEST_FILE));
        self.advance(BackupStage::ManifestWritten)?;

        let mut checksummed: Vec<String> = [
            &self.manifest.files.db,
            &self.manifest.files.media,
            &self.manifest.files.infra,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect();
        checksummed.push(MANIFEST_FILE.to_string());
        write_checksums(&self.dir, &checksummed)?;
        self.advance(BackupStage::Checksummed)?;

        if self.job.trigger == Trigger::Cron {
            self.retain();
        }
        self.advance(BackupStage::Retained)?;

        self.job.set_extra("errors", &self.manifest.errors);
        self.log.info(format!(
            "backup complete: {} bytes, {} soft errors",
            self.manifest.sizes.total(),
            self.manifest.errors.len()
        ));
        self.advance(BackupStage::Done)
    }

    fn seal(&self, path: PathBuf, key: Option<&SecureString>) -> BackupResult<PathBuf> {
        match key {
            Some(key) => {
                let sealed = encrypt_artifact(self.engine, key, &path)?;
                self.log.info(format!("encrypted {}", sealed.display()));
                Ok(sealed)
            }
            None => Ok(path),
        }
    }

    fn retain(&mut self) {
        let keep = self.engine.settings.retention.keep;
        let mut candidates = match self.engine.store.list() {
            Ok(jobs) => cron_candidates(&jobs),
            Err(e) => {
                self.log.error(format!("retention skipped, job store unreadable: {}", e));
                return;
            }
        };
        candidates.extend(RetentionCandidate::from_job(self.job));

        match enforce_retention(candidates, keep, self.log) {
            Ok(deleted) => {
                self.log.info(format!("retention kept {}, removed {}", keep, deleted.len()));
                self.job.set_extra("retention_deleted", deleted);
            }
            Err(e) => {
                // The new backup is complete; a failed cleanup does not undo it.
                self.log.error(format!("retention failed: {}", e));
                self.job.set_extra("retention_error", e.to_string());
            }
        }
    }

    fn soft_error(&mut self, message: String) {
        self.log.warn(&message);
        self.manifest.errors.push(message);
    }

    fn advance(&mut self, stage: BackupStage) -> BackupResult<()> {
        self.log.info(format!("stage {}", stage));
        self.job.set_extra("stage", stage);
        self.engine.store.save(self.job)
    }

    fn mark(&mut self, stage: BackupStage) {
        self.log.info(format!("stage {}", stage));
        self.job.set_extra("stage", stage);
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::integrity::verify_checksums;
    use crate::config::paths::{encrypted_name, DB_ARTIFACT, MEDIA_ARTIFACT};
    use crate::engine::test_support::*;
    use crate::jobs::JobStore;
    use crate::models::{JobStatus, Operation};
    use crate::tools::fake::ScriptedRunner;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn backup(engine: &Engine, trigger: Trigger, force: bool) -> (BackupJob, BackupResult<()>) {
        let request = BackupRequest {
            force,
            deletable: true,
            trigger,
        };
        let mut job = BackupJob::new(Operation::Backup, trigger, true);
        engine.store.insert(&job).unwrap();
        let result = run_backup(engine, &mut job, &request);
        match &result {
            Ok(()) => job.succeed().unwrap(),
            Err(e) => job.fail(e.to_string()).unwrap(),
        }
        engine.store.save(&job).unwrap();
        (job, result)
    }

    #[test]
    fn test_full_backup() {
        let temp_dir = TempDir::new().unwrap();
        seed_live_files(temp_dir.path());
        let engine = test_engine(test_settings(temp_dir.path()), Arc::new(default_runner()));

        let (job, result) = backup(&engine, Trigger::Manual, false);
        result.unwrap();

        let dir = job.backup_path().unwrap().to_path_buf();
        let manifest = Manifest::load(&dir).unwrap();
        assert!(manifest.success.db && manifest.success.media && manifest.success.infra);
        assert_eq!(manifest.git_commit, "0123abcd");
        assert_eq!(manifest.created_by, "tests");
        assert!(manifest.errors.is_empty());
        assert!(!manifest.encryption_enabled);
        assert_eq!(manifest.job_id, Some(job.id));

        // Three artifacts plus the manifest
        assert_eq!(verify_checksums(&dir).unwrap(), 4);
        assert_eq!(job.extra["stage"], "DONE");

        let logged = std::fs::read_to_string(dir.join(BACKUP_LOG)).unwrap();
        for stage in ["INIT", "DB_DUMPED", "MEDIA_ARCHIVED", "INFRA_ARCHIVED", "MANIFEST_WRITTEN", "CHECKSUMMED", "RETAINED", "DONE"] {
            assert!(logged.contains(&format!("stage {}", stage)), "missing {}", stage);
        }
    }

    #[test]
    fn test_manifest_trigger_follows_job() {
        let temp_dir = TempDir::new().unwrap();
        seed_live_files(temp_dir.path());
        let engine = test_engine(test_settings(temp_dir.path()), Arc::new(default_runner()));

        let mut job = BackupJob::new(Operation::Backup, Trigger::Cron, true);
        engine.store.insert(&job).unwrap();
        let request = BackupRequest {
            force: false,
            deletable: true,
            trigger: Trigger::Manual,
        };
        run_backup(&engine, &mut job, &request).unwrap();

        let manifest = Manifest::load(job.backup_path().unwrap()).unwrap();
        assert_eq!(manifest.trigger, Trigger::Cron);
    }

    #[test]
    fn test_media_absence_is_soft() {
        let temp_dir = TempDir::new().unwrap();
        seed_live_files(temp_dir.path());
        std::fs::remove_dir_all(temp_dir.path().join("media")).unwrap();
        let engine = test_engine(test_settings(temp_dir.path()), Arc::new(default_runner()));

        let (job, result) = backup(&engine, Trigger::Api, false);
        result.unwrap();
        assert_eq!(job.status, JobStatus::Success);

        let manifest = Manifest::load(job.backup_path().unwrap()).unwrap();
        assert!(!manifest.success.media);
        assert!(manifest.success.db);
        assert_eq!(manifest.errors.len(), 1);
        assert!(manifest.errors[0].contains("media"));
        assert!(!job.backup_path().unwrap().join(MEDIA_ARTIFACT).exists());
    }

    #[test]
    fn test_db_failure_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        seed_live_files(temp_dir.path());
        let runner = default_runner().fail("gzip", 1, "gzip: stdout: No space left on device; pg host=db.internal");
        let engine = test_engine(test_settings(temp_dir.path()), Arc::new(runner));

        let (job, result) = backup(&engine, Trigger::Manual, false);
        assert!(result.is_err());
        assert_eq!(job.status, JobStatus::Failed);

        let dir = job.backup_path().unwrap();
        let message = job.error_message.as_deref().unwrap();
        assert!(message.contains("'gzip' exited with code 1"));
        assert!(message.contains(&dir.join(BACKUP_LOG).display().to_string()));
        assert!(!message.contains("No space left"));
        assert!(!message.contains("db.internal"));

        // Raw tool output is kept for the operator
        let logged = std::fs::read_to_string(dir.join(BACKUP_LOG)).unwrap();
        assert!(logged.contains("No space left on device; pg host=db.internal"));

        assert!(!dir.join(DB_ARTIFACT).exists());
        assert!(!dir.join(MANIFEST_FILE).exists());
        assert_eq!(job.extra["stage"], "FAILED");
    }

    #[test]
    fn test_already_exists_without_force() {
        let temp_dir = TempDir::new().unwrap();
        seed_live_files(temp_dir.path());
        let engine = test_engine(test_settings(temp_dir.path()), Arc::new(default_runner()));

        backup(&engine, Trigger::Manual, false).1.unwrap();
        let (second, result) = backup(&engine, Trigger::Manual, false);
        assert!(matches!(result, Err(BackupError::AlreadyExists(_))));
        assert!(second.backup_path().is_none());

        let (forced, result) = backup(&engine, Trigger::Manual, true);
        result.unwrap();
        assert!(forced.backup_name().unwrap().ends_with("_2"));
    }

    #[test]
    fn test_encrypted_backup() {
        let temp_dir = TempDir::new().unwrap();
        seed_live_files(temp_dir.path());
        let mut settings = test_settings(temp_dir.path());
        settings.encryption.passphrase = Some("clinic-secret".into());
        let engine = test_engine(settings, Arc::new(default_runner()));

        let (job, result) = backup(&engine, Trigger::Manual, false);
        result.unwrap();
        let dir = job.backup_path().unwrap();
        let manifest = Manifest::load(dir).unwrap();

        assert!(manifest.encryption_enabled);
        assert_eq!(manifest.files.db.as_deref(), Some(encrypted_name(DB_ARTIFACT).as_str()));
        assert!(!dir.join(DB_ARTIFACT).exists());
        assert!(!dir.join(MEDIA_ARTIFACT).exists());
        assert!(dir.join(encrypted_name(MEDIA_ARTIFACT)).exists());
        assert_eq!(verify_checksums(dir).unwrap(), 4);
    }

    #[test]
    fn test_lock_held_means_no_work() {
        let temp_dir = TempDir::new().unwrap();
        seed_live_files(temp_dir.path());
        let runner = Arc::new(default_runner());
        let engine = test_engine(test_settings(temp_dir.path()), runner.clone());

        let _held = engine.lock.try_acquire(OPERATION_LOCK).unwrap();
        let (job, result) = backup(&engine, Trigger::Manual, true);
        assert!(result.unwrap_err().is_lock_contention());
        assert!(job.backup_path().is_none());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_cron_backup_applies_retention() {
        let temp_dir = TempDir::new().unwrap();
        seed_live_files(temp_dir.path());
        let mut settings = test_settings(temp_dir.path());
        settings.retention.keep = 2;
        let engine = test_engine(settings, Arc::new(ScriptedRunner::new()));

        let mut old_dirs = Vec::new();
        for day in 1..=3 {
            let mut job = BackupJob::new(Operation::Backup, Trigger::Cron, false);
            job.started_at = Utc::now() - chrono::Duration::days(10 - day);
            let dir = engine.paths.backup_dir(&format!("2020-01-{:02}", day));
            std::fs::create_dir_all(&dir).unwrap();
            job.set_backup_path(&dir).unwrap();
            job.succeed().unwrap();
            engine.store.insert(&job).unwrap();
            old_dirs.push(dir);
        }

        let (job, result) = backup(&engine, Trigger::Cron, false);
        result.unwrap();

        let deleted: Vec<String> = serde_json::from_value(job.extra["retention_deleted"].clone()).unwrap();
        assert_eq!(deleted.len(), 2);
        assert!(!old_dirs[0].exists());
        assert!(!old_dirs[1].exists());
        assert!(old_dirs[2].exists());
        assert!(job.backup_path().unwrap().exists());
        assert_eq!(engine.store.list().unwrap().len(), 4);
    }

    #[test]
    fn test_manual_backup_skips_retention() {
        let temp_dir = TempDir::new().unwrap();
        seed_live_files(temp_dir.path());
        let engine = test_engine(test_settings(temp_dir.path()), Arc::new(default_runner()));

        let (job, result) = backup(&engine, Trigger::Manual, false);
        result.unwrap();
        assert!(!job.extra.contains_key("retention_deleted"));
    }
}

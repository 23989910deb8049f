//! Backup and restore pipelines
//!
//! # Architecture
//!
//! - `database`: dump and SQL client commands
//! - `producers`: one function per artifact (database, media, infra) plus
//!   the encryption wrapper
//! - `integrity`: checksum list writing and verification
//! - `pipeline`: the backup state machine
//! - `delete`: policy-checked removal of operator backups
//! - `restore`: confirmation-gated restore with dry-run planning
//! - `retention`: pruning of old cron backups
//! - `smoke`: post-restore liveness checks
//!
//! # Backup Directory
//!
//! One directory per day under the backup root, named `YYYY-MM-DD` (or
//! `YYYY-MM-DD_<n>` for forced and imported siblings). A directory whose
//! `meta.json` records `success.db = true` is a valid, restorable backup.
//!
//! # Example
//!
//! ```rust,ignore
//! use clinic_backup::backup::{run_backup, BackupRequest};
//!
//! let request = BackupRequest { force: false, deletable: true, trigger: Trigger::Manual };
//! run_backup(&engine, &mut job, &request)?;
//! ```

pub mod database;
mod delete;
pub mod integrity;
mod pipeline;
pub mod producers;
mod restore;
pub mod retention;
pub mod smoke;

use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

pub use delete::{check_delete_policy, deletable_job, run_delete};
pub use pipeline::run_backup;
pub use restore::{
    check_confirmation, resolve_artifacts, run_restore, FreezeMarker, PlannedFile, ResolvedArtifacts,
    RestorePlan, RestoreRequest, CONFIRMATION_PHRASE,
};

use crate::config::paths::parse_backup_day;
use crate::config::BackupPaths;
use crate::error::BackupResult;
use crate::jobs::JobStore;
use crate::models::{BackupJob, BackupSummary, JobStatus, Manifest, Operation, Trigger};

/// Parameters of a backup request
#[derive(Debug, Clone, Copy, Default)]
pub struct BackupRequest {
    /// Create another backup even if today already has a valid one
    pub force: bool,
    /// Allow operators to delete this backup later (ignored for cron)
    pub deletable: bool,
    pub trigger: Trigger,
}

/// Stages of the backup pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupStage {
    Init,
    DbDumped,
    MediaArchived,
    InfraArchived,
    ManifestWritten,
    Checksummed,
    Retained,
    Done,
    Failed,
}

impl fmt::Display for BackupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::DbDumped => "DB_DUMPED",
            Self::MediaArchived => "MEDIA_ARCHIVED",
            Self::InfraArchived => "INFRA_ARCHIVED",
            Self::ManifestWritten => "MANIFEST_WRITTEN",
            Self::Checksummed => "CHECKSUMMED",
            Self::Retained => "RETAINED",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        write!(f, "{}", name)
    }
}

/// Names of all backup directories under the root, newest first
pub fn backup_names(paths: &BackupPaths) -> BackupResult<Vec<String>> {
    let root = paths.root();
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if parse_backup_day(&name).is_some() {
            names.push(name);
        }
    }
    names.sort_by(|a, b| sort_key(b).cmp(&sort_key(a)));
    Ok(names)
}

/// Orders `2026-10-19_10` after `2026-10-19_9`
fn sort_key(name: &str) -> (String, u32) {
    match name.split_once('_') {
        Some((day, n)) => (day.to_string(), n.parse().unwrap_or(0)),
        None => (name.to_string(), 1),
    }
}

/// Name of a valid backup taken on `day`, if any
pub fn valid_backup_on(paths: &BackupPaths, day: NaiveDate) -> Option<String> {
    backup_names(paths)
        .unwrap_or_default()
        .into_iter()
        .filter(|name| parse_backup_day(name) == Some(day))
        .find(|name| {
            Manifest::load_opt(&paths.backup_dir(name))
                .map(|m| m.is_valid())
                .unwrap_or(false)
        })
}

/// Job that produced a backup directory
pub fn owning_job(jobs: &[BackupJob], name: &str) -> Option<BackupJob> {
    jobs.iter()
        .filter(|j| matches!(j.operation, Operation::Backup | Operation::Import))
        .filter(|j| j.backup_name().as_deref() == Some(name))
        .min_by_key(|j| (j.status != JobStatus::Success, std::cmp::Reverse(j.started_at)))
        .cloned()
}

/// Summaries of every backup directory, newest first
pub fn list_backups(paths: &BackupPaths, store: &dyn JobStore) -> BackupResult<Vec<BackupSummary>> {
    let jobs = store.list()?;
    let mut summaries = Vec::new();
    for name in backup_names(paths)? {
        let manifest = Manifest::load_opt(&paths.backup_dir(&name));
        let owner = owning_job(&jobs, &name);
        summaries.push(BackupSummary {
            day: parse_backup_day(&name),
            valid: manifest.as_ref().map_or(false, |m| m.is_valid()),
            sizes: manifest.as_ref().map(|m| m.sizes).unwrap_or_default(),
            encrypted: manifest.as_ref().map_or(false, |m| m.encryption_enabled),
            errors: manifest.map(|m| m.errors).unwrap_or_default(),
            job_id: owner.as_ref().map(|j| j.id),
            trigger: owner.as_ref().map(|j| j.trigger),
            deletable: owner.as_ref().map_or(false, |j| j.is_deletable()),
            uploaded: owner.as_ref().map_or(false, |j| j.uploaded),
            name,
        });
    }
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::FileJobStore;
    use tempfile::TempDir;

    fn write_manifest(dir: &std::path::Path, db_ok: bool) {
        std::fs::create_dir_all(dir).unwrap();
        let mut manifest = Manifest::new("tests", Trigger::Manual);
        manifest.success.db = db_ok;
        manifest.save(dir).unwrap();
    }

    #[test]
    fn test_backup_names_sorted() {
        let temp_dir = TempDir::new().unwrap();
        let paths = BackupPaths::new(temp_dir.path());
        paths.ensure_directories().unwrap();
        for name in ["2026-10-18", "2026-10-19", "2026-10-19_2", "2026-10-19_10", "notes"] {
            std::fs::create_dir_all(paths.backup_dir(name)).unwrap();
        }

        assert_eq!(
            backup_names(&paths).unwrap(),
            vec!["2026-10-19_10", "2026-10-19_2", "2026-10-19", "2026-10-18"]
        );
    }

    #[test]
    fn test_valid_backup_on() {
        let temp_dir = TempDir::new().unwrap();
        let paths = BackupPaths::new(temp_dir.path());
        let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();

        write_manifest(&paths.backup_dir("2026-10-19"), false);
        assert_eq!(valid_backup_on(&paths, day), None);

        write_manifest(&paths.backup_dir("2026-10-19_2"), true);
        assert_eq!(valid_backup_on(&paths, day).as_deref(), Some("2026-10-19_2"));
    }

    #[test]
    fn test_list_backups_joins_jobs() {
        let temp_dir = TempDir::new().unwrap();
        let paths = BackupPaths::new(temp_dir.path());
        let store = FileJobStore::open(paths.jobs_dir()).unwrap();

        write_manifest(&paths.backup_dir("2026-10-19"), true);
        let mut job = BackupJob::new(Operation::Backup, Trigger::Api, true);
        job.set_backup_path(paths.backup_dir("2026-10-19")).unwrap();
        job.succeed().unwrap();
        store.insert(&job).unwrap();

        let listed = list_backups(&paths, &store).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].valid);
        assert_eq!(listed[0].job_id, Some(job.id));
        assert!(listed[0].deletable);
    }
}

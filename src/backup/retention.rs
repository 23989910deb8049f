//! Retention enforcer
//!
//! Only successful cron-triggered backups are subject to retention; manual
//! and API backups, and failed runs, are never removed by it. Job records
//! are kept even when their directory is deleted.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::audit::OperationLog;
use crate::error::{BackupError, BackupResult};
use crate::models::{BackupJob, JobStatus, Operation, Trigger};

/// A directory eligible for retention
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionCandidate {
    pub dir: PathBuf,
    pub started_at: DateTime<Utc>,
}

impl RetentionCandidate {
    pub fn from_job(job: &BackupJob) -> Option<Self> {
        job.backup_path().map(|dir| Self {
            dir: dir.to_path_buf(),
            started_at: job.started_at,
        })
    }

    fn name(&self) -> String {
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Successful cron backups, in any order
pub fn cron_candidates(jobs: &[BackupJob]) -> Vec<RetentionCandidate> {
    jobs.iter()
        .filter(|j| {
            j.operation == Operation::Backup
                && j.trigger == Trigger::Cron
                && j.status == JobStatus::Success
        })
        .filter_map(RetentionCandidate::from_job)
        .collect()
}

/// Candidates beyond the newest `keep`
pub fn select_expired(mut candidates: Vec<RetentionCandidate>, keep: usize) -> Vec<RetentionCandidate> {
    candidates.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    let mut seen = HashSet::new();
    candidates.retain(|c| seen.insert(c.dir.clone()));
    candidates.into_iter().skip(keep.max(1)).collect()
}

/// Delete expired directories, returning their names
pub fn enforce_retention(
    candidates: Vec<RetentionCandidate>,
    keep: usize,
    log: &OperationLog,
) -> BackupResult<Vec<String>> {
    let mut deleted = Vec::new();
    for candidate in select_expired(candidates, keep) {
        let name = candidate.name();
        if candidate.dir.exists() {
            std::fs::remove_dir_all(&candidate.dir).map_err(|e| {
                BackupError::Io(format!("Failed to delete old backup {}: {}", name, e))
            })?;
            log.info(format!("retention removed {}", name));
            deleted.push(name);
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{FileJobStore, JobStore};
    use chrono::Duration;
    use tempfile::TempDir;

    fn cron_job(root: &std::path::Path, day: u32) -> BackupJob {
        let mut job = BackupJob::new(Operation::Backup, Trigger::Cron, false);
        job.started_at = Utc::now() - Duration::days(30 - day as i64);
        let dir = root.join(format!("2026-10-{:02}", day));
        std::fs::create_dir_all(&dir).unwrap();
        job.set_backup_path(dir).unwrap();
        job.succeed().unwrap();
        job
    }

    #[test]
    fn test_keeps_newest_seven_of_ten() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileJobStore::open(temp_dir.path().join(".jobs")).unwrap();
        let log = OperationLog::open(temp_dir.path().join("r.log")).unwrap();

        for day in 1..=10 {
            store.insert(&cron_job(temp_dir.path(), day)).unwrap();
        }

        let jobs = store.list().unwrap();
        let deleted = enforce_retention(cron_candidates(&jobs), 7, &log).unwrap();

        let mut deleted_sorted = deleted.clone();
        deleted_sorted.sort();
        assert_eq!(deleted_sorted, vec!["2026-10-01", "2026-10-02", "2026-10-03"]);
        for day in 4..=10 {
            assert!(temp_dir.path().join(format!("2026-10-{:02}", day)).exists());
        }
        // Records stay
        assert_eq!(store.list().unwrap().len(), 10);
    }

    #[test]
    fn test_manual_and_failed_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let mut manual = BackupJob::new(Operation::Backup, Trigger::Manual, true);
        manual.set_backup_path(temp_dir.path().join("a")).unwrap();
        manual.succeed().unwrap();

        let mut failed = BackupJob::new(Operation::Backup, Trigger::Cron, false);
        failed.set_backup_path(temp_dir.path().join("b")).unwrap();
        failed.fail("dump failed").unwrap();

        assert!(cron_candidates(&[manual, failed]).is_empty());
    }

    #[test]
    fn test_keep_zero_still_keeps_newest() {
        let now = Utc::now();
        let candidates = vec![
            RetentionCandidate {
                dir: PathBuf::from("/b/new"),
                started_at: now,
            },
            RetentionCandidate {
                dir: PathBuf::from("/b/old"),
                started_at: now - Duration::days(1),
            },
        ];
        let expired = select_expired(candidates, 0);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].dir, PathBuf::from("/b/old"));
    }
}

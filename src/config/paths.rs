//! Path management for the backup engine
//!
//! Every on-disk location the engine touches is derived from the backup
//! root:
//!
//! ```text
//! <root>/
//! ├─ 2026-10-19/              # one directory per backup day
//! │  ├─ db.sql.gz[.enc]
//! │  ├─ media.tar.gz[.enc]
//! │  ├─ infra.tar.gz[.enc]
//! │  ├─ meta.json
//! │  ├─ checksums.sha256
//! │  ├─ backup.log
//! │  └─ restore-<job>.log / upload-<job>.log
//! ├─ .locks/                  # exclusive operation lock files
//! ├─ .jobs/                   # one JSON record per job
//! ├─ .logs/                   # logs for jobs without a backup directory
//! ├─ .tmp/                    # staging areas
//! └─ .restore_in_progress     # freeze marker, present only mid-restore
//! ```

use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::error::{BackupError, BackupResult};

/// Date format used for backup directory names
pub const DAY_FORMAT: &str = "%Y-%m-%d";

/// Database dump artifact
pub const DB_ARTIFACT: &str = "db.sql.gz";
/// Media archive artifact
pub const MEDIA_ARTIFACT: &str = "media.tar.gz";
/// Infrastructure/config archive artifact
pub const INFRA_ARTIFACT: &str = "infra.tar.gz";
/// Manifest file
pub const MANIFEST_FILE: &str = "meta.json";
/// Checksum list
pub const CHECKSUM_FILE: &str = "checksums.sha256";
/// Per-backup pipeline log
pub const BACKUP_LOG: &str = "backup.log";
/// Suffix appended to encrypted artifacts
pub const ENCRYPTED_SUFFIX: &str = ".enc";

const FREEZE_MARKER: &str = ".restore_in_progress";

/// Manages all paths used by the backup engine
#[derive(Debug, Clone)]
pub struct BackupPaths {
    /// Root directory holding every backup directory
    root: PathBuf,
}

impl BackupPaths {
    /// Create paths rooted at the given backup directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the backup root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding lock files
    pub fn lock_dir(&self) -> PathBuf {
        self.root.join(".locks")
    }

    /// Directory holding job records
    pub fn jobs_dir(&self) -> PathBuf {
        self.root.join(".jobs")
    }

    /// Directory for logs of jobs that have no backup directory
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(".logs")
    }

    /// Directory for temporary staging areas
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join(".tmp")
    }

    /// Freeze marker present while a restore is running
    pub fn freeze_marker(&self) -> PathBuf {
        self.root.join(FREEZE_MARKER)
    }

    /// Check whether a restore is currently in progress
    pub fn restore_in_progress(&self) -> bool {
        self.freeze_marker().exists()
    }

    /// Directory for a given backup name (e.g. "2026-10-19" or "2026-10-19_2")
    pub fn backup_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Pick a collision-free directory name for a backup day.
    ///
    /// Returns the bare date when unused, otherwise the first free
    /// `<date>_<n>` sibling.
    pub fn unique_backup_name(&self, day: NaiveDate) -> String {
        let base = day.format(DAY_FORMAT).to_string();
        if !self.backup_dir(&base).exists() {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}_{}", base, n);
            if !self.backup_dir(&candidate).exists() {
                return candidate;
            }
            n += 1;
        }
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> BackupResult<()> {
        for dir in [
            self.root.clone(),
            self.lock_dir(),
            self.jobs_dir(),
            self.logs_dir(),
            self.tmp_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                BackupError::Io(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }
}

/// Parse the day a backup directory name refers to.
///
/// Accepts `YYYY-MM-DD` and the collision suffix form `YYYY-MM-DD_<n>`.
pub fn parse_backup_day(name: &str) -> Option<NaiveDate> {
    let date_part = match name.split_once('_') {
        Some((date, suffix)) if suffix.parse::<u32>().is_ok() => date,
        Some(_) => return None,
        None => name,
    };
    if date_part.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(date_part, DAY_FORMAT).ok()
}

/// Name of the encrypted sibling of an artifact
pub fn encrypted_name(artifact: &str) -> String {
    format!("{}{}", artifact, ENCRYPTED_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout() {
        let temp_dir = TempDir::new().unwrap();
        let paths = BackupPaths::new(temp_dir.path());

        assert_eq!(paths.lock_dir(), temp_dir.path().join(".locks"));
        assert_eq!(paths.jobs_dir(), temp_dir.path().join(".jobs"));
        assert_eq!(
            paths.freeze_marker(),
            temp_dir.path().join(".restore_in_progress")
        );
        assert_eq!(
            paths.backup_dir("2026-10-19"),
            temp_dir.path().join("2026-10-19")
        );
    }

    #[test]
    fn test_ensure_directories() {
        let temp_dir = TempDir::new().unwrap();
        let paths = BackupPaths::new(temp_dir.path().join("root"));

        paths.ensure_directories().unwrap();

        assert!(paths.lock_dir().exists());
        assert!(paths.jobs_dir().exists());
        assert!(paths.logs_dir().exists());
        assert!(paths.tmp_dir().exists());
    }

    #[test]
    fn test_unique_backup_name() {
        let temp_dir = TempDir::new().unwrap();
        let paths = BackupPaths::new(temp_dir.path());
        let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();

        assert_eq!(paths.unique_backup_name(day), "2026-10-19");

        std::fs::create_dir_all(paths.backup_dir("2026-10-19")).unwrap();
        assert_eq!(paths.unique_backup_name(day), "2026-10-19_2");

        std::fs::create_dir_all(paths.backup_dir("2026-10-19_2")).unwrap();
        assert_eq!(paths.unique_backup_name(day), "2026-10-19_3");
    }

    #[test]
    fn test_parse_backup_day() {
        let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(parse_backup_day("2026-10-19"), Some(day));
        assert_eq!(parse_backup_day("2026-10-19_3"), Some(day));
        assert_eq!(parse_backup_day("2026-10-19_x"), None);
        assert_eq!(parse_backup_day(".jobs"), None);
        assert_eq!(parse_backup_day("2026-13-01"), None);
    }
}

//! Backup job model
//!
//! A job is the unit of orchestration: every requested operation gets one
//! record, created RUNNING by the facade and finished exactly once by the
//! worker that runs it.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::JobId;
use crate::error::{BackupError, BackupResult};

/// Kind of operation a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Backup,
    Restore,
    Upload,
    Import,
    Delete,
    TestCloud,
}

impl Operation {
    /// Lower-case name used in log file names
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::Restore => "restore",
            Self::Upload => "upload",
            Self::Import => "import",
            Self::Delete => "delete",
            Self::TestCloud => "test-cloud",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backup => write!(f, "BACKUP"),
            Self::Restore => write!(f, "RESTORE"),
            Self::Upload => write!(f, "UPLOAD"),
            Self::Import => write!(f, "IMPORT"),
            Self::Delete => write!(f, "DELETE"),
            Self::TestCloud => write!(f, "TEST_CLOUD"),
        }
    }
}

/// Provenance of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    #[default]
    Manual,
    Cron,
    Api,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Cron => write!(f, "cron"),
            Self::Api => write!(f, "api"),
        }
    }
}

impl std::str::FromStr for Trigger {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "cron" => Ok(Self::Cron),
            "api" => Ok(Self::Api),
            other => Err(BackupError::Config(format!("unknown trigger: {}", other))),
        }
    }
}

/// Status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    Running,
    Success,
    Failed,
}

impl JobStatus {
    /// Check if this status is final
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Only RUNNING may move, and only to a terminal status
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(self, Self::Running) && next.is_terminal()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// A requested backup-engine operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupJob {
    /// Unique identifier
    pub id: JobId,

    pub operation: Operation,

    #[serde(default)]
    pub trigger: Trigger,

    #[serde(default)]
    pub status: JobStatus,

    /// Backup directory this job produced or operates on
    #[serde(default)]
    backup_path: Option<PathBuf>,

    #[serde(default)]
    pub db_path: Option<PathBuf>,

    #[serde(default)]
    pub media_path: Option<PathBuf>,

    #[serde(default)]
    pub infra_path: Option<PathBuf>,

    /// Operator log for this job
    #[serde(default)]
    pub logs_path: Option<PathBuf>,

    #[serde(default)]
    pub meta_path: Option<PathBuf>,

    /// Human-readable failure, set only on FAILED
    #[serde(default)]
    pub error_message: Option<String>,

    pub started_at: DateTime<Utc>,

    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,

    /// Wall-clock run time in seconds, computed once at finalization
    #[serde(default)]
    pub duration_secs: Option<f64>,

    /// Whether an operator may delete this backup; never true for cron jobs
    #[serde(default)]
    is_deletable: bool,

    #[serde(default)]
    pub uploaded: bool,

    #[serde(default)]
    pub upload_remote: Option<String>,

    #[serde(default)]
    pub upload_log_path: Option<PathBuf>,

    /// Operation-specific side data
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl BackupJob {
    /// Create a new RUNNING job
    pub fn new(operation: Operation, trigger: Trigger, deletable: bool) -> Self {
        Self {
            id: JobId::new(),
            operation,
            trigger,
            status: JobStatus::Running,
            backup_path: None,
            db_path: None,
            media_path: None,
            infra_path: None,
            logs_path: None,
            meta_path: None,
            error_message: None,
            started_at: Utc::now(),
            finished_at: None,
            duration_secs: None,
            is_deletable: deletable && trigger != Trigger::Cron,
            uploaded: false,
            upload_remote: None,
            upload_log_path: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn backup_path(&self) -> Option<&Path> {
        self.backup_path.as_deref()
    }

    /// Directory name of the backup, e.g. `2026-10-19`
    pub fn backup_name(&self) -> Option<String> {
        self.backup_path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }

    /// Bind the job to its backup directory
    ///
    /// Setting the same path again is a no-op; pointing an already bound job
    /// at a different directory is refused.
    pub fn set_backup_path(&mut self, path: impl Into<PathBuf>) -> BackupResult<()> {
        let path = path.into();
        match &self.backup_path {
            Some(existing) if *existing != path => Err(BackupError::InvalidState(format!(
                "job {} is already bound to {}, refusing {}",
                self.id,
                existing.display(),
                path.display()
            ))),
            _ => {
                self.backup_path = Some(path);
                Ok(())
            }
        }
    }

    pub fn is_deletable(&self) -> bool {
        self.is_deletable && self.trigger != Trigger::Cron
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Mark the job SUCCESS
    pub fn succeed(&mut self) -> BackupResult<()> {
        self.finish(JobStatus::Success, None)
    }

    /// Mark the job FAILED with a message
    pub fn fail(&mut self, message: impl Into<String>) -> BackupResult<()> {
        self.finish(JobStatus::Failed, Some(message.into()))
    }

    fn finish(&mut self, status: JobStatus, error: Option<String>) -> BackupResult<()> {
        if !self.status.can_transition_to(status) {
            return Err(BackupError::InvalidState(format!(
                "job {} cannot move from {} to {}",
                self.id, self.status, status
            )));
        }
        let finished = Utc::now().max(self.started_at);
        self.status = status;
        self.error_message = error;
        self.finished_at = Some(finished);
        self.duration_secs =
            Some((finished - self.started_at).num_milliseconds() as f64 / 1000.0);
        Ok(())
    }

    /// Store a value in the `extra` bag
    pub fn set_extra(&mut self, key: &str, value: impl Serialize) {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.extra.insert(key.to_string(), value);
            }
            Err(e) => tracing::warn!(job = %self.id, key, error = %e, "dropping unserializable extra"),
        }
    }
}

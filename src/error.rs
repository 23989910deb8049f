//! Custom error types for the backup engine
//!
//! This module defines the error hierarchy for the engine using thiserror
//! for ergonomic error definitions. Callers only ever see the rendered
//! message on a failed job record; the variants exist so pipelines can tell
//! fatal conditions apart from soft ones.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for backup engine operations
#[derive(Error, Debug)]
pub enum BackupError {
    /// Another backup or restore holds the exclusive operation lock
    #[error("Another backup or restore is already running (lock '{0}' is held); retry later")]
    LockContention(String),

    /// A valid backup for the day already exists and `force` was not requested
    #[error("A valid backup for {0} already exists; use force to create another")]
    AlreadyExists(String),

    /// The restore confirmation phrase did not match
    #[error("Confirmation phrase mismatch: type exactly \"{expected}\" to restore")]
    ConfirmationMismatch { expected: &'static str },

    /// An artifact producer failed
    #[error("{artifact} artifact failed: {message}")]
    ArtifactProducer {
        artifact: &'static str,
        message: String,
    },

    /// A file did not match its recorded checksum
    #[error("Checksum mismatch for {file}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    /// A required external program is not installed
    #[error("Required tool '{program}' is not installed or not on PATH ({capability})")]
    ToolUnavailable {
        program: String,
        capability: &'static str,
    },

    /// An external program exited unsuccessfully
    ///
    /// The program's output is kept in the operation log only; the error
    /// points at that log instead of carrying it.
    #[error("'{program}' exited with {}{}", describe_exit(.exit_code), see_log(.log))]
    ToolFailed {
        program: String,
        exit_code: Option<i32>,
        log: Option<PathBuf>,
    },

    /// An external program exceeded its time bound
    #[error("'{program}' timed out after {seconds}s")]
    ToolTimeout { program: String, seconds: u64 },

    /// The cloud remote is missing or unreachable
    #[error("Cloud remote unreachable: {0}")]
    RemoteUnreachable(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// The requested operation is not allowed for this job/backup
    #[error("Operation not permitted: {0}")]
    PolicyViolation(String),

    /// A submitted job reached FAILED
    #[error("Job {id} failed: {message}")]
    JobFailed { id: String, message: String },

    /// An illegal state transition was attempted on a job
    #[error("Invalid job state: {0}")]
    InvalidState(String),

    /// An imported archive is malformed or incomplete
    #[error("Invalid backup archive: {0}")]
    InvalidArchive(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Encryption errors
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// HTTP smoke-check errors
    #[error("HTTP error: {0}")]
    Http(String),
}

impl BackupError {
    /// Create a "not found" error for jobs
    pub fn job_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Job",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for backups
    pub fn backup_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Backup",
            identifier: identifier.into(),
        }
    }

    /// Create an artifact producer error
    pub fn producer(artifact: &'static str, message: impl Into<String>) -> Self {
        Self::ArtifactProducer {
            artifact,
            message: message.into(),
        }
    }

    /// Wrap an I/O error with the path it happened on
    pub fn io_at(path: &std::path::Path, err: std::io::Error) -> Self {
        Self::Io(format!("{}: {}", path.display(), err))
    }

    /// Point a tool failure at the operation log holding its output
    pub fn with_log(self, path: &std::path::Path) -> Self {
        match self {
            Self::ToolFailed {
                program, exit_code, ..
            } => Self::ToolFailed {
                program,
                exit_code,
                log: Some(path.to_path_buf()),
            },
            other => other,
        }
    }

    /// Check if this is a lock contention error
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, Self::LockContention(_))
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is an integrity error
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::IntegrityMismatch { .. })
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "signal".to_string(),
    }
}

fn see_log(log: &Option<PathBuf>) -> String {
    match log {
        Some(path) => format!(" (see {})", path.display()),
        None => String::new(),
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for BackupError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<walkdir::Error> for BackupError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(PathBuf::from).unwrap_or_default();
        Self::Io(format!("{}: {}", path.display(), err))
    }
}

/// Result type alias for backup engine operations
pub type BackupResult<T> = Result<T, BackupError>;

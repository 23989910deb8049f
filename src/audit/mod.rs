//! Operator logging for backup operations
//!
//! Each pipeline run writes a plain-text, append-only log next to the
//! artifacts it touches. Restores additionally record a line diff for every
//! deployment file they overwrite.
//!
//! # Example
//!
//! ```rust,ignore
//! use clinic_backup::audit::{diff_text, OperationLog};
//!
//! let log = OperationLog::open(backup_dir.join("backup.log"))?;
//! log.info("database dump started");
//!
//! let diff = diff_text(&live_env, &restored_env);
//! log.info(format!(".env: {}", diff.summary()));
//! ```

mod diff;
mod logger;

pub use diff::{diff_text, TextDiff};
pub use logger::{read_log, Level, OperationLog};

//! Operator log for a single operation
//!
//! Every pipeline appends plain-text lines to its own log file
//! (`backup.log`, `restore-<job>.log`, ...). The file is opened in append
//! mode for the whole run and each line is flushed immediately, so the log
//! survives even when the pipeline dies half-way. Raw subprocess output is
//! written here and never surfaced on the job record.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;

use crate::error::{BackupError, BackupResult};
use crate::tools::ToolOutput;

/// Maximum captured bytes of a single tool stream written to the log
const MAX_STREAM_BYTES: usize = 64 * 1024;

/// Severity of an operation log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Info => write!(f, "INFO"),
            Level::Warn => write!(f, "WARN"),
            Level::Error => write!(f, "ERROR"),
        }
    }
}

/// Append-only log file for one operation
pub struct OperationLog {
    /// Path to the log file
    log_path: PathBuf,
    file: Mutex<File>,
}

impl OperationLog {
    /// Open (or create) a log file in append mode
    pub fn open(log_path: impl Into<PathBuf>) -> BackupResult<Self> {
        let log_path = log_path.into();
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BackupError::io_at(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| BackupError::Io(format!("Failed to open operation log: {}", e)))?;

        Ok(Self {
            log_path,
            file: Mutex::new(file),
        })
    }

    /// Append a line at the given level
    ///
    /// A failing log write never fails the operation itself; it is reported
    /// through tracing instead.
    pub fn write(&self, level: Level, message: &str) {
        let line = format!("{} [{}] {}", Utc::now().to_rfc3339(), level, message);
        let mut file = self.file.lock();
        if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
            tracing::warn!(log = %self.log_path.display(), error = %e, "failed to append to operation log");
        }
    }

    pub fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::info!(log = %self.log_path.display(), "{}", message);
        self.write(Level::Info, message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::warn!(log = %self.log_path.display(), "{}", message);
        self.write(Level::Warn, message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::error!(log = %self.log_path.display(), "{}", message);
        self.write(Level::Error, message);
    }

    /// Record the captured streams of a finished tool invocation
    pub fn tool_output(&self, label: &str, output: &ToolOutput) {
        let code = output
            .exit_code
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        self.write(Level::Info, &format!("{} exited with {}", label, code));
        for (stream, text) in [("stdout", &output.stdout), ("stderr", &output.stderr)] {
            let text = text.trim_end();
            if text.is_empty() {
                continue;
            }
            let shown = if text.len() > MAX_STREAM_BYTES {
                let mut cut = MAX_STREAM_BYTES;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                &text[..cut]
            } else {
                text
            };
            let mut file = self.file.lock();
            let _ = writeln!(file, "--- {} {} ---\n{}", label, stream, shown);
            let _ = file.flush();
        }
    }

    /// Read all lines written so far
    pub fn read_all(&self) -> BackupResult<Vec<String>> {
        read_log(&self.log_path)
    }

    /// Get the path to the log file
    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

/// Read a log file into lines; a missing file reads as empty
pub fn read_log(path: &Path) -> BackupResult<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path)
        .map_err(|e| BackupError::Io(format!("Failed to open operation log: {}", e)))?;
    BufReader::new(file)
        .lines()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| BackupError::Io(format!("Failed to read operation log: {}", e)))
}

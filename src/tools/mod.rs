//! External tool invocation
//!
//! Every external program the engine drives (dump, compress, SQL client,
//! sync, version control) is described by a [`ToolCommand`] and executed by
//! a [`CommandRunner`]. Two-stage streams such as `dump | compress` are a
//! [`ToolPipe`], whose [`PipeOutput`] says which stage failed.
//!
//! Runners return `Ok` for any process that ran to completion, whatever its
//! exit code; `check()` turns a non-zero exit into [`BackupError::ToolFailed`].
//! A missing program is [`BackupError::ToolUnavailable`] and a process that
//! outlives its bound is killed and reported as [`BackupError::ToolTimeout`].

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{BackupError, BackupResult};

#[cfg(test)]
pub mod fake;
pub mod system;

pub use system::SystemRunner;

/// Where a command's standard input comes from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StdinSource {
    #[default]
    Null,
    Bytes(Vec<u8>),
    File(PathBuf),
}

/// A single external program invocation
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: StdinSource,
    /// Redirect stdout into this file instead of capturing it
    pub stdout_to: Option<PathBuf>,
    pub timeout: Duration,
    /// What the program is needed for, named when it is missing
    pub capability: &'static str,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, capability: &'static str) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: StdinSource::Null,
            stdout_to: None,
            timeout: Duration::from_secs(120),
            capability,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, stdin: StdinSource) -> Self {
        self.stdin = stdin;
        self
    }

    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_to = Some(path.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pipe this command's stdout into `next`
    pub fn pipe(self, next: ToolCommand) -> ToolPipe {
        ToolPipe {
            first: self,
            second: next,
        }
    }
}

impl fmt::Display for ToolCommand {
    // Arguments are left out; they may carry connection strings.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} args)", self.program, self.args.len())
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a non-zero exit into `ToolFailed`
    pub fn check(self, program: &str) -> BackupResult<ToolOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(self.failure(program))
        }
    }

    fn failure(&self, program: &str) -> BackupError {
        BackupError::ToolFailed {
            program: program.to_string(),
            exit_code: self.exit_code,
            log: None,
        }
    }
}

/// Two commands connected stdout to stdin
#[derive(Debug, Clone)]
pub struct ToolPipe {
    pub first: ToolCommand,
    pub second: ToolCommand,
}

/// Outputs of both stages of a pipe
#[derive(Debug, Clone, Default)]
pub struct PipeOutput {
    pub first: ToolOutput,
    pub second: ToolOutput,
}

impl PipeOutput {
    /// Fail with the first stage that exited unsuccessfully
    pub fn check(self, pipe: &ToolPipe) -> BackupResult<PipeOutput> {
        if !self.first.success() {
            return Err(self.first.failure(&pipe.first.program));
        }
        if !self.second.success() {
            return Err(self.second.failure(&pipe.second.program));
        }
        Ok(self)
    }
}

/// Executes external programs
///
/// Implementations must be shareable across worker threads.
pub trait CommandRunner: Send + Sync {
    /// Run a single command to completion
    fn run(&self, command: &ToolCommand) -> BackupResult<ToolOutput>;

    /// Run two commands as `first | second`
    fn run_pipe(&self, pipe: &ToolPipe) -> BackupResult<PipeOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let cmd = ToolCommand::new("pg_dump", "database dump")
            .args(["--dbname", "postgres://secret@db/clinic"])
            .arg("--no-owner")
            .env("PGCONNECT_TIMEOUT", "10")
            .timeout(Duration::from_secs(5));

        assert_eq!(cmd.args.len(), 3);
        assert_eq!(cmd.timeout, Duration::from_secs(5));
        assert!(!cmd.to_string().contains("secret"));
    }

    #[test]
    fn test_check_failure_leaves_output_out_of_the_error() {
        let output = ToolOutput {
            exit_code: Some(2),
            stdout: String::new(),
            stderr: "FATAL: password authentication failed for user \"clinic_admin\"".into(),
        };
        let err = output.check("psql").unwrap_err();
        match &err {
            BackupError::ToolFailed {
                program,
                exit_code,
                log,
            } => {
                assert_eq!(program, "psql");
                assert_eq!(*exit_code, Some(2));
                assert!(log.is_none());
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(!err.to_string().contains("clinic_admin"));
    }

    #[test]
    fn test_pipe_attributes_failing_stage() {
        let pipe = ToolCommand::new("pg_dump", "database dump")
            .pipe(ToolCommand::new("gzip", "compression"));
        let output = PipeOutput {
            first: ToolOutput {
                exit_code: Some(0),
                ..Default::default()
            },
            second: ToolOutput {
                exit_code: Some(1),
                stderr: "disk full".into(),
                ..Default::default()
            },
        };
        let err = output.check(&pipe).unwrap_err();
        assert!(err.to_string().contains("'gzip'"));
    }
}

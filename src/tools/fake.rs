//! Scripted runner for tests
//!
//! Records every command and answers from a small rule table. Commands
//! whose stdout is redirected to a file get deterministic fake content
//! written there, so artifacts exist and can be hashed.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::{CommandRunner, PipeOutput, StdinSource, ToolCommand, ToolOutput, ToolPipe};
use crate::error::{BackupError, BackupResult};

#[derive(Debug, Clone)]
enum Reply {
    Output(ToolOutput),
    Unavailable,
    Timeout,
}

#[derive(Debug, Clone)]
struct Rule {
    program: String,
    arg_contains: Option<String>,
    reply: Reply,
}

/// A recorded invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: StdinSource,
    pub stdout_to: Option<PathBuf>,
}

impl Invocation {
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a.contains(needle))
    }
}

#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every command
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn stdout(self, program: &str, stdout: &str) -> Self {
        self.rule(
            program,
            None,
            Reply::Output(ToolOutput {
                exit_code: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
            }),
        )
    }

    pub fn fail(self, program: &str, exit_code: i32, stderr: &str) -> Self {
        self.fail_when(program, None, exit_code, stderr)
    }

    /// Fail only invocations that have an argument containing `arg`
    pub fn fail_when(self, program: &str, arg: Option<&str>, exit_code: i32, stderr: &str) -> Self {
        self.rule(
            program,
            arg,
            Reply::Output(ToolOutput {
                exit_code: Some(exit_code),
                stdout: String::new(),
                stderr: stderr.to_string(),
            }),
        )
    }

    pub fn unavailable(self, program: &str) -> Self {
        self.rule(program, None, Reply::Unavailable)
    }

    pub fn timeout(self, program: &str) -> Self {
        self.rule(program, None, Reply::Timeout)
    }

    fn rule(self, program: &str, arg: Option<&str>, reply: Reply) -> Self {
        self.rules.lock().push(Rule {
            program: program.to_string(),
            arg_contains: arg.map(str::to_string),
            reply,
        });
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, program: &str) -> Vec<Invocation> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == program)
            .collect()
    }

    /// Highest number of commands observed running at once
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn answer(&self, command: &ToolCommand) -> BackupResult<ToolOutput> {
        self.calls.lock().push(Invocation {
            program: command.program.clone(),
            args: command.args.clone(),
            env: command.env.clone(),
            stdin: command.stdin.clone(),
            stdout_to: command.stdout_to.clone(),
        });

        let reply = self
            .rules
            .lock()
            .iter()
            .rev()
            .find(|r| {
                r.program == command.program
                    && r.arg_contains
                        .as_deref()
                        .map_or(true, |needle| command.args.iter().any(|a| a.contains(needle)))
            })
            .map(|r| r.reply.clone());

        match reply {
            Some(Reply::Unavailable) => Err(BackupError::ToolUnavailable {
                program: command.program.clone(),
                capability: command.capability,
            }),
            Some(Reply::Timeout) => Err(BackupError::ToolTimeout {
                program: command.program.clone(),
                seconds: command.timeout.as_secs(),
            }),
            Some(Reply::Output(output)) => Ok(output),
            None => Ok(ToolOutput {
                exit_code: Some(0),
                ..Default::default()
            }),
        }
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn write_fake_stdout(path: &Path, programs: &str) -> BackupResult<()> {
    std::fs::write(path, format!("fake output of {}\n", programs))
        .map_err(|e| BackupError::io_at(path, e))
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command: &ToolCommand) -> BackupResult<ToolOutput> {
        self.enter();
        let result = self.answer(command);
        self.leave();
        if let (Ok(_), Some(path)) = (&result, &command.stdout_to) {
            write_fake_stdout(path, &command.program)?;
        }
        result
    }

    fn run_pipe(&self, pipe: &ToolPipe) -> BackupResult<PipeOutput> {
        self.enter();
        let first = self.answer(&pipe.first);
        let second = self.answer(&pipe.second);
        self.leave();
        let output = PipeOutput {
            first: first?,
            second: second?,
        };
        if let Some(path) = &pipe.second.stdout_to {
            write_fake_stdout(path, &format!("{} | {}", pipe.first.program, pipe.second.program))?;
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_and_recording() {
        let runner = ScriptedRunner::new()
            .stdout("git", "abc123\n")
            .fail_when("psql", Some("DROP SCHEMA"), 1, "permission denied");

        let out = runner.run(&ToolCommand::new("git", "revision")).unwrap();
        assert_eq!(out.stdout, "abc123\n");

        let ok = runner
            .run(&ToolCommand::new("psql", "sql").args(["-c", "SELECT 1"]))
            .unwrap();
        assert!(ok.success());

        let failed = runner
            .run(&ToolCommand::new("psql", "sql").args(["-c", "DROP SCHEMA public"]))
            .unwrap();
        assert_eq!(failed.exit_code, Some(1));

        assert_eq!(runner.calls_to("psql").len(), 2);
    }

    #[test]
    fn test_pipe_writes_fake_artifact() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let out = temp_dir.path().join("db.sql.gz");
        let runner = ScriptedRunner::new();
        let pipe = ToolCommand::new("pg_dump", "dump")
            .pipe(ToolCommand::new("gzip", "compress").stdout_to(&out));

        runner.run_pipe(&pipe).unwrap().check(&pipe).unwrap();
        assert!(std::fs::read_to_string(&out).unwrap().contains("pg_dump | gzip"));
    }
}

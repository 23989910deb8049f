//! Runner backed by real processes
//!
//! stdout and stderr are drained on helper threads so a chatty child can
//! never block on a full pipe while we poll it for exit.

use std::fs::File;
use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{CommandRunner, PipeOutput, StdinSource, ToolCommand, ToolOutput, ToolPipe};
use crate::error::{BackupError, BackupResult};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs tools with `std::process::Command`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, command: &ToolCommand) -> BackupResult<ToolOutput> {
        tracing::debug!(tool = %command, "spawning");
        let mut cmd = build(command)?;
        cmd.stdout(stdout_target(command)?);

        let mut child = spawn(&mut cmd, command)?;
        let feeder = feed_stdin(child.stdin.take(), &command.stdin);
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + command.timeout;
        let status = wait_until(&mut child, deadline, command);
        join_feeder(feeder);
        let output = collect(status?, stdout, stderr);
        tracing::debug!(tool = %command, exit = ?output.exit_code, "finished");
        Ok(output)
    }

    fn run_pipe(&self, pipe: &ToolPipe) -> BackupResult<PipeOutput> {
        let started = Instant::now();
        let mut first_cmd = build(&pipe.first)?;
        first_cmd.stdout(Stdio::piped());
        let mut first = spawn(&mut first_cmd, &pipe.first)?;
        let feeder = feed_stdin(first.stdin.take(), &pipe.first.stdin);
        let first_stderr = drain(first.stderr.take());

        let link = match first.stdout.take() {
            Some(out) => Stdio::from(out),
            None => {
                kill(&mut first);
                return Err(BackupError::Io(format!(
                    "{} did not expose stdout",
                    pipe.first.program
                )));
            }
        };

        let mut second_cmd = build(&pipe.second)?;
        second_cmd.stdin(link).stdout(stdout_target(&pipe.second)?);
        let mut second = match spawn(&mut second_cmd, &pipe.second) {
            Ok(child) => child,
            Err(e) => {
                kill(&mut first);
                return Err(e);
            }
        };
        // Release our handle on the link so an early exit of the second stage reaches the first.
        drop(second_cmd);
        let second_stdout = drain(second.stdout.take());
        let second_stderr = drain(second.stderr.take());

        let second_status = wait_until(&mut second, started + pipe.second.timeout, &pipe.second);
        let second_status = match second_status {
            Ok(status) => status,
            Err(e) => {
                kill(&mut first);
                return Err(e);
            }
        };
        let first_status = wait_until(&mut first, started + pipe.first.timeout, &pipe.first);
        join_feeder(feeder);

        Ok(PipeOutput {
            first: collect(first_status?, None, first_stderr),
            second: collect(second_status, second_stdout, second_stderr),
        })
    }
}

fn build(command: &ToolCommand) -> BackupResult<Command> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .envs(command.env.iter().map(|(k, v)| (k, v)))
        .stderr(Stdio::piped());
    match &command.stdin {
        StdinSource::Null => {
            cmd.stdin(Stdio::null());
        }
        StdinSource::Bytes(_) => {
            cmd.stdin(Stdio::piped());
        }
        StdinSource::File(path) => {
            let file = File::open(path).map_err(|e| BackupError::io_at(path, e))?;
            cmd.stdin(Stdio::from(file));
        }
    }
    Ok(cmd)
}

fn stdout_target(command: &ToolCommand) -> BackupResult<Stdio> {
    match &command.stdout_to {
        Some(path) => {
            let file = File::create(path).map_err(|e| BackupError::io_at(path, e))?;
            Ok(Stdio::from(file))
        }
        None => Ok(Stdio::piped()),
    }
}

fn spawn(cmd: &mut Command, command: &ToolCommand) -> BackupResult<Child> {
    cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            BackupError::ToolUnavailable {
                program: command.program.clone(),
                capability: command.capability,
            }
        } else {
            BackupError::Io(format!("Failed to start {}: {}", command.program, e))
        }
    })
}

fn feed_stdin(stdin: Option<ChildStdin>, source: &StdinSource) -> Option<JoinHandle<()>> {
    let (StdinSource::Bytes(bytes), Some(mut stdin)) = (source, stdin) else {
        return None;
    };
    let bytes = bytes.clone();
    Some(thread::spawn(move || {
        // A child that exits early closes the pipe; that is not our error to report.
        let _ = stdin.write_all(&bytes);
    }))
}

fn join_feeder(feeder: Option<JoinHandle<()>>) {
    if let Some(handle) = feeder {
        let _ = handle.join();
    }
}

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> Option<JoinHandle<String>> {
    stream.map(|mut stream| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stream.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn wait_until(child: &mut Child, deadline: Instant, command: &ToolCommand) -> BackupResult<ExitStatus> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if Instant::now() >= deadline => {
                tracing::warn!(tool = %command, "timed out, killing");
                kill(child);
                return Err(BackupError::ToolTimeout {
                    program: command.program.clone(),
                    seconds: command.timeout.as_secs(),
                });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                return Err(BackupError::Io(format!(
                    "Failed to wait for {}: {}",
                    command.program, e
                )))
            }
        }
    }
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn collect(
    status: ExitStatus,
    stdout: Option<JoinHandle<String>>,
    stderr: Option<JoinHandle<String>>,
) -> ToolOutput {
    let join = |handle: Option<JoinHandle<String>>| {
        handle
            .and_then(|h| h.join().ok())
            .unwrap_or_default()
    };
    ToolOutput {
        exit_code: status.code(),
        stdout: join(stdout),
        stderr: join(stderr),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_program_is_unavailable() {
        let err = SystemRunner
            .run(&ToolCommand::new("clinic-backup-no-such-tool", "testing"))
            .unwrap_err();
        assert!(matches!(
            err,
            BackupError::ToolUnavailable {
                capability: "testing",
                ..
            }
        ));
    }

    #[test]
    fn test_captures_output_and_exit_code() {
        let output = SystemRunner
            .run(&ToolCommand::new("sh", "shell").args(["-c", "echo out; echo err >&2; exit 3"]))
            .unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[test]
    fn test_timeout_kills_child() {
        let started = Instant::now();
        let err = SystemRunner
            .run(
                &ToolCommand::new("sleep", "sleep")
                    .arg("10")
                    .timeout(Duration::from_millis(200)),
            )
            .unwrap_err();
        assert!(matches!(err, BackupError::ToolTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_pipe_into_file() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("upper.txt");
        let pipe = ToolCommand::new("sh", "shell")
            .args(["-c", "echo hello"])
            .pipe(ToolCommand::new("tr", "translate").args(["a-z", "A-Z"]).stdout_to(&out));

        let output = SystemRunner.run_pipe(&pipe).unwrap().check(&pipe).unwrap();
        assert!(output.first.success());
        assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "HELLO");
    }

    #[test]
    fn test_stdin_bytes() {
        let output = SystemRunner
            .run(&ToolCommand::new("cat", "cat").stdin(StdinSource::Bytes(b"piped".to_vec())))
            .unwrap();
        assert_eq!(output.stdout, "piped");
    }
}

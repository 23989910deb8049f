//! Offsite sync adapter
//!
//! Drives an rclone-compatible sync tool. Every operation first checks the
//! configured remote with `listremotes`; a missing tool, a missing remote
//! and a failed transfer all surface as job failures with the raw tool
//! output kept in the operation log.

use std::path::Path;

use crate::audit::OperationLog;
use crate::backup::owning_job;
use crate::config::paths::parse_backup_day;
use crate::engine::Engine;
use crate::error::{BackupError, BackupResult};
use crate::models::BackupJob;
use crate::tools::{ToolCommand, ToolOutput};

const CAPABILITY: &str = "cloud sync";

/// `remote:path/host/<backup>` for a backup directory name
pub fn remote_target(engine: &Engine, remote: &str, backup_name: &str) -> String {
    format!(
        "{}:{}/{}/{}",
        remote,
        engine.settings.cloud.remote_path.trim_matches('/'),
        engine.settings.host_name(),
        backup_name
    )
}

/// Check the sync tool is installed and the configured remote exists
pub fn ensure_remote(engine: &Engine, log: &OperationLog) -> BackupResult<String> {
    let cloud = &engine.settings.cloud;
    let remote = cloud
        .remote
        .as_deref()
        .map(|r| r.trim_end_matches(':'))
        .filter(|r| !r.is_empty())
        .ok_or_else(|| BackupError::RemoteUnreachable("no cloud remote is configured".into()))?;

    let cmd = ToolCommand::new(&cloud.program, CAPABILITY)
        .arg("listremotes")
        .timeout(engine.settings.timeouts.default_timeout());
    let output = engine.runner.run(&cmd)?;
    log.tool_output("listremotes", &output);
    if !output.success() {
        return Err(unreachable(&cloud.program, "listremotes", &output, log));
    }

    let configured = output
        .stdout
        .lines()
        .any(|line| line.trim().trim_end_matches(':') == remote);
    if !configured {
        return Err(BackupError::RemoteUnreachable(format!(
            "remote '{}' is not configured for {}",
            remote, cloud.program
        )));
    }
    Ok(remote.to_string())
}

/// Mirror a backup directory to the remote, returning the target
pub fn upload(engine: &Engine, dir: &Path, log: &OperationLog) -> BackupResult<String> {
    let remote = ensure_remote(engine, log)?;
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let target = remote_target(engine, &remote, &name);
    log.info(format!("syncing {} to {}", dir.display(), target));

    let program = &engine.settings.cloud.program;
    let cmd = ToolCommand::new(program, CAPABILITY)
        .arg("sync")
        .arg(dir.to_string_lossy())
        .arg(&target)
        .timeout(engine.settings.timeouts.sync());
    let output = engine.runner.run(&cmd)?;
    log.tool_output("sync", &output);
    if !output.success() {
        return Err(unreachable(program, "sync", &output, log));
    }
    log.info(format!("sync to {} finished", target));
    Ok(target)
}

/// Check the remote without transferring data
pub fn test_connection(engine: &Engine, log: &OperationLog) -> BackupResult<String> {
    let remote = ensure_remote(engine, log)?;
    let target = format!(
        "{}:{}",
        remote,
        engine.settings.cloud.remote_path.trim_matches('/')
    );
    let program = &engine.settings.cloud.program;
    let cmd = ToolCommand::new(program, CAPABILITY)
        .arg("lsd")
        .arg(&target)
        .timeout(engine.settings.timeouts.default_timeout());
    let output = engine.runner.run(&cmd)?;
    log.tool_output("lsd", &output);
    if !output.success() {
        return Err(unreachable(program, "lsd", &output, log));
    }
    log.info(format!("{} is reachable", target));
    Ok(target)
}

fn unreachable(program: &str, step: &str, output: &ToolOutput, log: &OperationLog) -> BackupError {
    BackupError::RemoteUnreachable(format!(
        "{} {} exited with {} (see {})",
        program,
        step,
        output
            .exit_code
            .map_or_else(|| "a signal".to_string(), |c| format!("code {}", c)),
        log.path().display()
    ))
}

/// Upload pipeline: sync one backup and flag its owning job as uploaded
#[tracing::instrument(skip_all, fields(job = %job.id, backup = backup_name))]
pub fn run_upload(engine: &Engine, job: &mut BackupJob, backup_name: &str) -> BackupResult<()> {
    let dir = engine.paths.backup_dir(backup_name);
    if parse_backup_day(backup_name).is_none() || !dir.is_dir() {
        return Err(BackupError::backup_not_found(backup_name));
    }
    job.set_backup_path(&dir)?;

    let log = OperationLog::open(dir.join(format!("upload-{}.log", job.id)))?;
    let log_path = log.path().to_path_buf();
    job.logs_path = Some(log_path.clone());
    job.upload_log_path = Some(log_path.clone());

    let target = match upload(engine, &dir, &log) {
        Ok(target) => target,
        Err(e) => {
            log.error(format!("upload failed: {}", e));
            return Err(e);
        }
    };
    job.uploaded = true;
    job.upload_remote = Some(target.clone());

    let jobs = engine.store.list()?;
    if let Some(owner) = owning_job(&jobs, backup_name) {
        engine.store.update(owner.id, &mut |j| {
            j.uploaded = true;
            j.upload_remote = Some(target.clone());
            j.upload_log_path = Some(log_path.clone());
        })?;
        log.info(format!("marked job {} as uploaded", owner.id));
    }
    Ok(())
}

/// Connectivity check pipeline
#[tracing::instrument(skip_all, fields(job = %job.id))]
pub fn run_test_cloud(engine: &Engine, job: &mut BackupJob) -> BackupResult<()> {
    let log = engine.open_job_log(job)?;
    match test_connection(engine, &log) {
        Ok(target) => {
            job.set_extra("remote", target);
            Ok(())
        }
        Err(e) => {
            log.error(format!("cloud test failed: {}", e));
            Err(e)
        }
    }
}

//! Backup CLI commands
//!
//! Each command submits through the orchestrator and waits for the job to
//! reach a terminal status. A FAILED job makes the command fail.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use clap::Args;

use crate::backup::{BackupRequest, RestoreRequest, CONFIRMATION_PHRASE};
use crate::display::{format_backup_list, format_job_details, format_size};
use crate::engine::BackupOrchestrator;
use crate::error::{BackupError, BackupResult};
use crate::models::{BackupJob, JobId, JobStatus, Trigger};

/// Arguments of `backup`
#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Create another backup even if today already has one
    #[arg(short, long)]
    pub force: bool,

    /// Do not allow this backup to be deleted later
    #[arg(long)]
    pub protect: bool,

    /// Who asked for the backup (manual, cron, api)
    #[arg(long, default_value = "manual")]
    pub trigger: Trigger,
}

/// Arguments of `restore`
#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Backup directory name, e.g. 2026-10-19
    pub backup: String,

    /// Confirmation phrase; prompted for when omitted
    #[arg(long)]
    pub confirm: Option<String>,

    /// Plan and log the restore without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Also overwrite the system reverse-proxy config
    #[arg(long)]
    pub allow_system_caddy_overwrite: bool,
}

/// Arguments of `import`
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Archive produced by `export`
    pub archive: PathBuf,

    /// Do not allow the imported backup to be deleted later
    #[arg(long)]
    pub protect: bool,
}

/// Arguments of `export`
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Backup directory name
    pub backup: String,

    /// Output file (defaults to <backup>.tar.gz)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub async fn handle_backup(orchestrator: &BackupOrchestrator, args: BackupArgs) -> BackupResult<()> {
    let request = BackupRequest {
        force: args.force,
        deletable: !args.protect,
        trigger: args.trigger,
    };
    println!("Starting backup...");
    let id = orchestrator.submit_backup(request)?;
    let job = finish(orchestrator, id).await?;
    if let Some(name) = job.backup_name() {
        println!("Backup {} complete.", name);
    }
    Ok(())
}

pub async fn handle_restore(orchestrator: &BackupOrchestrator, args: RestoreArgs) -> BackupResult<()> {
    let confirmation = match args.confirm {
        Some(phrase) => phrase,
        None => prompt_confirmation(&args.backup)?,
    };
    let request = RestoreRequest {
        backup: args.backup,
        confirmation,
        dry_run: args.dry_run,
        allow_system_caddy_overwrite: args.allow_system_caddy_overwrite,
        trigger: Trigger::Manual,
    };
    let id = orchestrator.submit_restore(request)?;
    let job = finish(orchestrator, id).await?;
    if let Some(plan) = job.extra.get("plan") {
        println!("Plan:");
        println!("{}", serde_json::to_string_pretty(plan)?);
    }
    if job.extra.get("smoke_ok") == Some(&serde_json::Value::Bool(false)) {
        println!("WARNING: some smoke checks failed; see the restore log.");
    }
    Ok(())
}

fn prompt_confirmation(backup: &str) -> BackupResult<String> {
    println!("WARNING: this replaces the database, media and deployment files with {}.", backup);
    print!("Type {} to continue: ", CONFIRMATION_PHRASE);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

pub async fn handle_upload(orchestrator: &BackupOrchestrator, backup: String) -> BackupResult<()> {
    let id = orchestrator.submit_upload(&backup, Trigger::Manual)?;
    let job = finish(orchestrator, id).await?;
    if let Some(remote) = &job.upload_remote {
        println!("Uploaded to {}", remote);
    }
    Ok(())
}

pub async fn handle_import(orchestrator: &BackupOrchestrator, args: ImportArgs) -> BackupResult<()> {
    let bytes = std::fs::read(&args.archive).map_err(|e| BackupError::io_at(&args.archive, e))?;
    let id = orchestrator.submit_import(&bytes, Trigger::Manual, !args.protect)?;
    let job = finish(orchestrator, id).await?;
    if let Some(name) = job.backup_name() {
        println!("Imported as {}", name);
    }
    Ok(())
}

pub fn handle_export(orchestrator: &BackupOrchestrator, args: ExportArgs) -> BackupResult<()> {
    let bytes = orchestrator.export_archive(&args.backup)?;
    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(format!("{}.tar.gz", args.backup)));
    std::fs::write(&output, &bytes).map_err(|e| BackupError::io_at(&output, e))?;
    println!(
        "Exported {} to {} ({})",
        args.backup,
        output.display(),
        format_size(bytes.len() as u64)
    );
    Ok(())
}

pub async fn handle_test_cloud(orchestrator: &BackupOrchestrator) -> BackupResult<()> {
    let id = orchestrator.submit_test_cloud(Trigger::Manual)?;
    let job = finish(orchestrator, id).await?;
    if let Some(remote) = job.extra.get("remote").and_then(|v| v.as_str()) {
        println!("{} is reachable.", remote);
    }
    Ok(())
}

pub async fn handle_delete(orchestrator: &BackupOrchestrator, job: String) -> BackupResult<()> {
    let target: JobId = job
        .parse()
        .map_err(|_| BackupError::job_not_found(job.clone()))?;
    let id = orchestrator.submit_delete(target, Trigger::Manual)?;
    let job = finish(orchestrator, id).await?;
    if let Some(name) = job.backup_name() {
        println!("Deleted {}", name);
    }
    Ok(())
}

pub fn handle_list(orchestrator: &BackupOrchestrator) -> BackupResult<()> {
    let backups = orchestrator.list_backups()?;
    println!("{}", format_backup_list(&backups));
    Ok(())
}

/// Wait for a job, print it, and turn FAILED into an error
async fn finish(orchestrator: &BackupOrchestrator, id: JobId) -> BackupResult<BackupJob> {
    println!("Job {} submitted, waiting...", id);
    let job = orchestrator.wait_for(id).await?;
    print!("{}", format_job_details(&job));
    if job.status == JobStatus::Failed {
        return Err(BackupError::JobFailed {
            id: job.id.to_string(),
            message: job.error_message.clone().unwrap_or_default(),
        });
    }
    Ok(job)
}

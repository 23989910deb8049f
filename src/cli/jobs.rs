//! Job inspection commands

use crate::display::{format_job_details, format_job_list};
use crate::engine::BackupOrchestrator;
use crate::error::{BackupError, BackupResult};
use crate::models::JobId;

pub fn handle_jobs(orchestrator: &BackupOrchestrator, limit: usize) -> BackupResult<()> {
    let jobs = orchestrator.list_jobs(limit)?;
    println!("{}", format_job_list(&jobs));
    Ok(())
}

pub fn handle_job(orchestrator: &BackupOrchestrator, id: &str, json: bool) -> BackupResult<()> {
    let id: JobId = id
        .parse()
        .map_err(|_| BackupError::job_not_found(id.to_string()))?;
    let job = orchestrator.get_job(id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&job)?);
    } else {
        print!("{}", format_job_details(&job));
    }
    Ok(())
}

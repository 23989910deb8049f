//! Job formatting for terminal output

use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::models::BackupJob;

#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "Job")]
    id: String,
    #[tabled(rename = "Operation")]
    operation: String,
    #[tabled(rename = "Trigger")]
    trigger: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Started (UTC)")]
    started: String,
    #[tabled(rename = "Took")]
    took: String,
    #[tabled(rename = "Backup")]
    backup: String,
}

/// Format jobs as a table, newest first as given
pub fn format_job_list(jobs: &[BackupJob]) -> String {
    if jobs.is_empty() {
        return "No jobs recorded.".to_string();
    }

    let rows = jobs.iter().map(|job| JobRow {
        id: job.id.short(),
        operation: job.operation.to_string(),
        trigger: job.trigger.to_string(),
        status: job.status.to_string(),
        started: job.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        took: job
            .duration_secs
            .map(|s| format!("{:.1}s", s))
            .unwrap_or_else(|| "-".into()),
        backup: job.backup_name().unwrap_or_else(|| "-".into()),
    });

    let mut table = Table::new(rows);
    table.with(Style::psql());
    table.to_string()
}

/// Detailed view of a single job
pub fn format_job_details(job: &BackupJob) -> String {
    let mut output = String::new();
    output.push_str(&format!("Job:        {}\n", job.id));
    output.push_str(&format!("Operation:  {}\n", job.operation));
    output.push_str(&format!("Trigger:    {}\n", job.trigger));
    output.push_str(&format!("Status:     {}\n", job.status));
    output.push_str(&format!(
        "Started:    {}\n",
        job.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(finished) = job.finished_at {
        output.push_str(&format!(
            "Finished:   {}\n",
            finished.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    if let Some(secs) = job.duration_secs {
        output.push_str(&format!("Duration:   {:.1}s\n", secs));
    }
    if let Some(path) = job.backup_path() {
        output.push_str(&format!("Backup:     {}\n", path.display()));
    }
    if let Some(log) = &job.logs_path {
        output.push_str(&format!("Log:        {}\n", log.display()));
    }
    if job.uploaded {
        output.push_str(&format!(
            "Uploaded:   {}\n",
            job.upload_remote.as_deref().unwrap_or("yes")
        ));
    }
    if let Some(error) = &job.error_message {
        output.push_str(&format!("Error:      {}\n", error));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Operation, Trigger};

    #[test]
    fn test_job_list() {
        let mut job = BackupJob::new(Operation::Backup, Trigger::Cron, false);
        job.fail("pg_dump missing").unwrap();
        let output = format_job_list(&[job.clone()]);
        assert!(output.contains(&job.id.short()));
        assert!(output.contains("BACKUP"));
        assert!(output.contains("FAILED"));
    }

    #[test]
    fn test_details_show_error() {
        let mut job = BackupJob::new(Operation::Restore, Trigger::Manual, false);
        job.fail("Confirmation phrase mismatch").unwrap();
        let output = format_job_details(&job);
        assert!(output.contains("RESTORE"));
        assert!(output.contains("Error:      Confirmation phrase mismatch"));
    }
}

//! Backup listing formatting

use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::models::BackupSummary;

#[derive(Tabled)]
struct BackupRow {
    #[tabled(rename = "Backup")]
    name: String,
    #[tabled(rename = "Valid")]
    valid: &'static str,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Enc")]
    encrypted: &'static str,
    #[tabled(rename = "Trigger")]
    trigger: String,
    #[tabled(rename = "Job")]
    job: String,
    #[tabled(rename = "Flags")]
    flags: String,
}

/// Format backup summaries as a table
pub fn format_backup_list(backups: &[BackupSummary]) -> String {
    if backups.is_empty() {
        return "No backups found.".to_string();
    }

    let rows = backups.iter().map(|b| {
        let mut flags = Vec::new();
        if b.deletable {
            flags.push("deletable".to_string());
        }
        if b.uploaded {
            flags.push("uploaded".to_string());
        }
        if !b.errors.is_empty() {
            flags.push(format!("{} warning(s)", b.errors.len()));
        }
        BackupRow {
            name: b.name.clone(),
            valid: yes_no(b.valid),
            size: format_size(b.sizes.total()),
            encrypted: yes_no(b.encrypted),
            trigger: b.trigger.map(|t| t.to_string()).unwrap_or_else(|| "-".into()),
            job: b.job_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into()),
            flags: flags.join(", "),
        }
    });

    let mut table = Table::new(rows);
    table.with(Style::psql());
    format!("{}\n\nTotal: {} backup(s)", table, backups.len())
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Format a byte count in human-readable form
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

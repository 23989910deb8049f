//! CLI command handlers
//!
//! This module contains the implementation of CLI commands,
//! bridging the clap argument parsing with the orchestrator.

pub mod backup;
pub mod config;
pub mod jobs;

use std::path::Path;

use clap::Subcommand;

pub use backup::{BackupArgs, ExportArgs, ImportArgs, RestoreArgs};
pub use config::{handle_config_command, ConfigCommands};

use crate::engine::BackupOrchestrator;
use crate::error::BackupResult;

/// Commands that run against the backup engine
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Take a backup of the database, media and deployment files
    Backup(BackupArgs),

    /// Restore a backup (requires the confirmation phrase)
    Restore(RestoreArgs),

    /// Sync a backup to the offsite remote
    Upload {
        /// Backup directory name
        backup: String,
    },

    /// Import an exported backup archive
    Import(ImportArgs),

    /// Export a backup as a portable archive
    Export(ExportArgs),

    /// Check that the offsite remote is reachable
    TestCloud,

    /// Delete the backup produced by a job
    Delete {
        /// Id of the backup or import job
        job: String,
    },

    /// List backups in the backup root
    List,

    /// List recent jobs
    Jobs {
        /// Number of jobs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show one job
    Job {
        /// Job id
        id: String,

        /// Print the raw job record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Settings commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Dispatch a command against an open engine
pub async fn run_command(
    orchestrator: &BackupOrchestrator,
    config_file: &Path,
    command: Commands,
) -> BackupResult<()> {
    match command {
        Commands::Backup(args) => backup::handle_backup(orchestrator, args).await,
        Commands::Restore(args) => backup::handle_restore(orchestrator, args).await,
        Commands::Upload { backup } => backup::handle_upload(orchestrator, backup).await,
        Commands::Import(args) => backup::handle_import(orchestrator, args).await,
        Commands::Export(args) => backup::handle_export(orchestrator, args),
        Commands::TestCloud => backup::handle_test_cloud(orchestrator).await,
        Commands::Delete { job } => backup::handle_delete(orchestrator, job).await,
        Commands::List => backup::handle_list(orchestrator),
        Commands::Jobs { limit } => jobs::handle_jobs(orchestrator, limit),
        Commands::Job { id, json } => jobs::handle_job(orchestrator, &id, json),
        Commands::Config(cmd) => {
            handle_config_command(config_file, &orchestrator.engine().settings, cmd)
        }
    }
}

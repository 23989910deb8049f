use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use clinic_backup::cli::{handle_config_command, run_command, Commands};
use clinic_backup::config::Settings;
use clinic_backup::engine::{BackupOrchestrator, Engine};

#[derive(Parser)]
#[command(
    name = "clinic-backup",
    author = "Kaylee Beyene",
    version,
    about = "Backup and restore orchestration for the clinic backend",
    long_about = "clinic-backup takes consistent backups of the clinic database, \
                  media store and deployment files, restores them behind a \
                  confirmation phrase, prunes old scheduled backups and syncs \
                  backups to an offsite remote."
)]
struct Cli {
    /// Settings file (defaults to $CLINIC_BACKUP_CONFIG or the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_file = match cli.config {
        Some(path) => path,
        None => Settings::default_config_file()?,
    };
    let settings = Settings::load_or_create(&config_file)
        .with_context(|| format!("failed to load settings from {}", config_file.display()))?;

    match cli.command {
        // Config commands must work even when the backup root is unusable
        Commands::Config(cmd) => handle_config_command(&config_file, &settings, cmd)?,
        command => {
            let engine = Engine::open(settings).context("failed to open the backup root")?;
            let orchestrator = BackupOrchestrator::new(engine)?;
            run_command(&orchestrator, &config_file, command).await?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("clinic_backup=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

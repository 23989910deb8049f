//! Configuration commands

use std::path::Path;

use clap::Subcommand;

use crate::config::{BackupPaths, Settings};
use crate::error::BackupResult;

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show effective settings and derived paths
    Show,

    /// Print the settings file location
    Path,

    /// Write the effective settings, minus the passphrase, to the settings file
    Init,
}

/// Handle a config command
///
/// Runs without opening the engine so a broken backup root can still be
/// inspected and fixed.
pub fn handle_config_command(config_file: &Path, settings: &Settings, cmd: ConfigCommands) -> BackupResult<()> {
    match cmd {
        ConfigCommands::Show => {
            let paths = BackupPaths::new(&settings.backup_root);
            println!("Clinic Backup Configuration");
            println!("===========================");
            println!("Settings file:  {}", config_file.display());
            println!("Backup root:    {}", paths.root().display());
            println!("Job records:    {}", paths.jobs_dir().display());
            println!("Lock directory: {}", paths.lock_dir().display());
            println!(
                "Encryption:     {}",
                if settings.encryption_key().is_some() {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            println!();
            println!("{}", serde_json::to_string_pretty(&redacted(settings))?);
        }
        ConfigCommands::Path => println!("{}", config_file.display()),
        ConfigCommands::Init => {
            redacted(settings).save(config_file)?;
            println!("Settings written to {}", config_file.display());
        }
    }
    Ok(())
}

/// Settings with the passphrase removed
fn redacted(settings: &Settings) -> Settings {
    let mut copy = settings.clone();
    copy.encryption.passphrase = None;
    copy
}

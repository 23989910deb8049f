//! Engine settings
//!
//! Manages everything the engine needs to know about the host it runs on:
//! where backups live, how to reach the database, which files make up the
//! deployment, retention, encryption, the offsite remote and tool time
//! bounds. Settings are persisted as pretty JSON and every field has a
//! serde default so older files keep loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::key_derivation::KeyDerivationParams;
use crate::crypto::SecureString;
use crate::error::BackupError;
use crate::storage::file_io::write_json_atomic;

/// Environment variable pointing at the settings file
pub const CONFIG_ENV: &str = "CLINIC_BACKUP_CONFIG";
/// Environment variable overriding the backup root
pub const ROOT_ENV: &str = "CLINIC_BACKUP_ROOT";
/// Environment variable carrying the encryption passphrase
pub const ENCRYPTION_KEY_ENV: &str = "CLINIC_BACKUP_ENCRYPTION_KEY";

/// Database connection and client programs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Connection URL passed to the dump and SQL clients
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Primary schema dropped and recreated on restore
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Logical dump program
    #[serde(default = "default_dump_program")]
    pub dump_program: String,
    /// SQL client program
    #[serde(default = "default_sql_program")]
    pub sql_program: String,
    /// Stream compression program (must accept `-c` and `-dc`)
    #[serde(default = "default_compress_program")]
    pub compress_program: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            schema: default_schema(),
            dump_program: default_dump_program(),
            sql_program: default_sql_program(),
            compress_program: default_compress_program(),
        }
    }
}

/// Deployment/configuration files captured in the infra artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraSettings {
    /// Directory the allow-list is relative to
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,
    /// Allow-listed files relative to `project_root`
    #[serde(default = "default_infra_files")]
    pub files: Vec<String>,
    /// System-level reverse-proxy config, archived as `system/Caddyfile`
    #[serde(default = "default_system_proxy_config")]
    pub system_proxy_config: Option<PathBuf>,
}

impl Default for InfraSettings {
    fn default() -> Self {
        Self {
            project_root: default_project_root(),
            files: default_infra_files(),
            system_proxy_config: default_system_proxy_config(),
        }
    }
}

/// Backup retention settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionSettings {
    /// Number of cron-triggered backups to keep
    pub keep: usize,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self { keep: 7 }
    }
}

/// Encryption settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EncryptionSettings {
    /// Passphrase; when absent artifacts stay plaintext
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,

    /// Key derivation cost parameters used for new artifacts
    #[serde(default)]
    pub kdf: KeyDerivationParams,
}

/// Offsite sync settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSettings {
    /// Sync program
    #[serde(default = "default_cloud_program")]
    pub program: String,
    /// Configured remote name (without the trailing colon)
    #[serde(default)]
    pub remote: Option<String>,
    /// Path on the remote under which hosts are stored
    #[serde(default = "default_remote_path")]
    pub remote_path: String,
    /// Host name used in the remote path; defaults to the machine name
    #[serde(default)]
    pub hostname: Option<String>,
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            program: default_cloud_program(),
            remote: None,
            remote_path: default_remote_path(),
            hostname: None,
        }
    }
}

/// Post-restore smoke checks
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SmokeSettings {
    /// HTTP health endpoint checked after restore
    #[serde(default)]
    pub health_url: Option<String>,
    /// Files that must exist after restore
    #[serde(default)]
    pub key_files: Vec<PathBuf>,
}

/// Time bounds for external tools, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolTimeouts {
    pub default_secs: u64,
    pub dump_secs: u64,
    pub restore_secs: u64,
    pub sync_secs: u64,
}

impl Default for ToolTimeouts {
    fn default() -> Self {
        Self {
            default_secs: 120,
            dump_secs: 3600,
            restore_secs: 3600,
            sync_secs: 4 * 3600,
        }
    }
}

impl ToolTimeouts {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_secs)
    }

    pub fn dump(&self) -> Duration {
        Duration::from_secs(self.dump_secs)
    }

    pub fn restore(&self) -> Duration {
        Duration::from_secs(self.restore_secs)
    }

    pub fn sync(&self) -> Duration {
        Duration::from_secs(self.sync_secs)
    }
}

/// Settings for the backup engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Root directory holding backup directories
    #[serde(default = "default_backup_root")]
    pub backup_root: PathBuf,

    /// Live media/blob storage tree
    #[serde(default = "default_media_root")]
    pub media_root: PathBuf,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub infra: InfraSettings,

    #[serde(default)]
    pub retention: RetentionSettings,

    #[serde(default)]
    pub encryption: EncryptionSettings,

    #[serde(default)]
    pub cloud: CloudSettings,

    #[serde(default)]
    pub smoke: SmokeSettings,

    #[serde(default)]
    pub timeouts: ToolTimeouts,

    /// Number of concurrent job workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Recorded as `created_by` in manifests; defaults to the host name
    #[serde(default)]
    pub created_by: Option<String>,
}

fn default_schema_version() -> u32 {
    1
}

fn default_backup_root() -> PathBuf {
    PathBuf::from("/var/backups/clinic")
}

fn default_media_root() -> PathBuf {
    PathBuf::from("/srv/clinic/media")
}

fn default_database_url() -> String {
    "postgres://clinic@localhost:5432/clinic".to_string()
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_dump_program() -> String {
    "pg_dump".to_string()
}

fn default_sql_program() -> String {
    "psql".to_string()
}

fn default_compress_program() -> String {
    "gzip".to_string()
}

fn default_project_root() -> PathBuf {
    PathBuf::from("/srv/clinic")
}

fn default_infra_files() -> Vec<String> {
    [
        "docker-compose.yml",
        "docker-compose.prod.yml",
        ".env",
        "Caddyfile",
        "scripts/backup.sh",
        "scripts/restore.sh",
        "scripts/deploy.sh",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_system_proxy_config() -> Option<PathBuf> {
    Some(PathBuf::from("/etc/caddy/Caddyfile"))
}

fn default_cloud_program() -> String {
    "rclone".to_string()
}

fn default_remote_path() -> String {
    "clinic-backups".to_string()
}

fn default_workers() -> usize {
    2
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            backup_root: default_backup_root(),
            media_root: default_media_root(),
            database: DatabaseSettings::default(),
            infra: InfraSettings::default(),
            retention: RetentionSettings::default(),
            encryption: EncryptionSettings::default(),
            cloud: CloudSettings::default(),
            smoke: SmokeSettings::default(),
            timeouts: ToolTimeouts::default(),
            workers: default_workers(),
            created_by: None,
        }
    }
}

impl Settings {
    /// Resolve the settings file location
    ///
    /// 1. `CLINIC_BACKUP_CONFIG` env var (explicit override)
    /// 2. Platform config directory (`~/.config/clinic-backup/config.json`)
    pub fn default_config_file() -> Result<PathBuf, BackupError> {
        if let Ok(custom) = std::env::var(CONFIG_ENV) {
            return Ok(PathBuf::from(custom));
        }
        directories::ProjectDirs::from("", "", "clinic-backup")
            .map(|dirs| dirs.config_dir().join("config.json"))
            .ok_or_else(|| BackupError::Config("Could not determine config directory".into()))
    }

    /// Load settings from disk, or fall back to defaults if the file doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self, BackupError> {
        let mut settings = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| BackupError::Io(format!("Failed to read settings file: {}", e)))?;

            serde_json::from_str::<Settings>(&contents).map_err(|e| {
                BackupError::Config(format!("Failed to parse settings file: {}", e))
            })?
        } else {
            // Don't save yet - let caller decide when to persist
            Settings::default()
        };

        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to disk
    pub fn save(&self, path: &Path) -> Result<(), BackupError> {
        write_json_atomic(path, self)
    }

    /// Apply environment overrides for the root and the passphrase
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var(ROOT_ENV) {
            self.backup_root = PathBuf::from(root);
        }
        if let Ok(key) = std::env::var(ENCRYPTION_KEY_ENV) {
            if !key.is_empty() {
                self.encryption.passphrase = Some(key);
            }
        }
    }

    /// Reject settings the pipelines cannot work with
    pub fn validate(&self) -> Result<(), BackupError> {
        if self.workers == 0 {
            return Err(BackupError::Config("workers must be at least 1".into()));
        }
        let schema_ok = !self.database.schema.is_empty()
            && self
                .database
                .schema
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !schema_ok {
            return Err(BackupError::Config(format!(
                "invalid database schema name: {:?}",
                self.database.schema
            )));
        }
        self.encryption
            .kdf
            .check_bounds()
            .map_err(|e| BackupError::Config(e.to_string()))?;
        Ok(())
    }

    /// The encryption passphrase, if one is configured
    pub fn encryption_key(&self) -> Option<SecureString> {
        self.encryption
            .passphrase
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(SecureString::from)
    }

    /// Host name used for remote paths
    pub fn host_name(&self) -> String {
        self.cloud.hostname.clone().unwrap_or_else(machine_name)
    }

    /// Value recorded as `created_by` in manifests
    pub fn creator(&self) -> String {
        self.created_by.clone().unwrap_or_else(machine_name)
    }
}

fn machine_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}

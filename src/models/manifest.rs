//! Backup manifest (`meta.json`) and directory summaries

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::ids::JobId;
use super::job::Trigger;
use crate::config::paths::MANIFEST_FILE;
use crate::error::{BackupError, BackupResult};
use crate::storage::file_io::{read_json_required, write_json_atomic};

/// Keys an imported manifest must carry
pub const REQUIRED_KEYS: [&str; 3] = ["created_at", "success", "encryption_enabled"];

/// Byte size of each artifact as stored on disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSizes {
    #[serde(default)]
    pub db: u64,
    #[serde(default)]
    pub media: u64,
    #[serde(default)]
    pub infra: u64,
}

impl ArtifactSizes {
    pub fn total(&self) -> u64 {
        self.db + self.media + self.infra
    }
}

/// Per-artifact success flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSuccess {
    #[serde(default)]
    pub db: bool,
    #[serde(default)]
    pub media: bool,
    #[serde(default)]
    pub infra: bool,
}

/// File names of the artifacts actually present, after encryption
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFiles {
    #[serde(default)]
    pub db: Option<String>,
    #[serde(default)]
    pub media: Option<String>,
    #[serde(default)]
    pub infra: Option<String>,
}

/// Description of one backup directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub created_by: String,

    #[serde(default)]
    pub trigger: Trigger,

    /// Deployed revision, or "unknown"
    #[serde(default = "unknown_commit")]
    pub git_commit: String,

    #[serde(default)]
    pub sizes: ArtifactSizes,

    pub success: ArtifactSuccess,

    /// Soft failures accumulated during the backup
    #[serde(default)]
    pub errors: Vec<String>,

    pub encryption_enabled: bool,

    #[serde(default)]
    pub files: ArtifactFiles,

    /// Job that produced the directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
}

fn unknown_commit() -> String {
    "unknown".to_string()
}

impl ArtifactFiles {
    /// Artifact file names the manifest claims
    pub fn names(&self) -> impl Iterator<Item = &str> {
        [&self.db, &self.media, &self.infra]
            .into_iter()
            .filter_map(|name| name.as_deref())
    }
}

impl Manifest {
    pub fn new(created_by: impl Into<String>, trigger: Trigger) -> Self {
        Self {
            created_at: Utc::now(),
            created_by: created_by.into(),
            trigger,
            git_commit: unknown_commit(),
            sizes: ArtifactSizes::default(),
            success: ArtifactSuccess::default(),
            errors: Vec::new(),
            encryption_enabled: false,
            files: ArtifactFiles::default(),
            job_id: None,
        }
    }

    /// A manifest with a successful database dump marks a restorable backup
    pub fn is_valid(&self) -> bool {
        self.success.db
    }

    /// Calendar day the backup was taken
    pub fn day(&self) -> NaiveDate {
        self.created_at.date_naive()
    }

    /// Load `meta.json` from a backup directory
    pub fn load(dir: &Path) -> BackupResult<Self> {
        read_json_required(dir.join(MANIFEST_FILE))
    }

    /// Load `meta.json` if present and parseable
    pub fn load_opt(dir: &Path) -> Option<Self> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return None;
        }
        match Self::load(dir) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable manifest");
                None
            }
        }
    }

    /// Write `meta.json` into a backup directory
    pub fn save(&self, dir: &Path) -> BackupResult<()> {
        write_json_atomic(dir.join(MANIFEST_FILE), self)
    }

    /// Parse a manifest from untrusted bytes, requiring the import keys
    pub fn parse_untrusted(bytes: &[u8]) -> BackupResult<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| BackupError::InvalidArchive(format!("manifest is not JSON: {}", e)))?;
        let object = value
            .as_object()
            .ok_or_else(|| BackupError::InvalidArchive("manifest is not an object".into()))?;
        let missing: Vec<&str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| !object.contains_key(*key))
            .collect();
        if !missing.is_empty() {
            return Err(BackupError::InvalidArchive(format!(
                "manifest is missing required keys: {}",
                missing.join(", ")
            )));
        }
        serde_json::from_value(value)
            .map_err(|e| BackupError::InvalidArchive(format!("malformed manifest: {}", e)))
    }
}

/// One row of the backup listing
#[derive(Debug, Clone, Serialize)]
pub struct BackupSummary {
    /// Directory name
    pub name: String,
    pub day: Option<NaiveDate>,
    /// Manifest present with a successful database dump
    pub valid: bool,
    pub sizes: ArtifactSizes,
    pub encrypted: bool,
    pub errors: Vec<String>,
    pub job_id: Option<JobId>,
    pub trigger: Option<Trigger>,
    pub deletable: bool,
    pub uploaded: bool,
}

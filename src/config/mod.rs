//! Configuration module for the backup engine
//!
//! This module provides configuration management including:
//! - Backup-root path layout
//! - Engine settings persistence

pub mod paths;
pub mod settings;

pub use paths::BackupPaths;
pub use settings::Settings;

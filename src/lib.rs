//! clinic-backup - Backup and restore orchestration for the clinic backend
//!
//! This library takes consistent, verifiable backups of a PostgreSQL
//! database, a media/blob tree and the deployment configuration, restores
//! them behind an explicit confirmation phrase, prunes old scheduled backups
//! and syncs backups to an offsite remote.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Settings and backup-root path layout
//! - `error`: Custom error types
//! - `models`: Jobs, manifests and backup summaries
//! - `storage`: Atomic JSON files and tarballs
//! - `crypto`: Passphrase-based artifact encryption
//! - `audit`: Per-operation log files and config diffs
//! - `tools`: Typed external command invocation
//! - `lock`: Exclusive operation lock
//! - `jobs`: Durable job registry
//! - `backup`: Backup, restore, retention and delete pipelines
//! - `cloud`: Offsite sync adapter
//! - `export`: Portable archive import/export
//! - `engine`: Shared engine context and the request facade
//! - `cli`, `display`: Command-line front end
//!
//! # Example
//!
//! ```rust,ignore
//! use clinic_backup::backup::BackupRequest;
//! use clinic_backup::config::Settings;
//! use clinic_backup::engine::{BackupOrchestrator, Engine};
//!
//! let settings = Settings::load_or_create(&Settings::default_config_file()?)?;
//! let orchestrator = BackupOrchestrator::new(Engine::open(settings)?)?;
//! let job = orchestrator.submit_backup(BackupRequest::default())?;
//! let finished = orchestrator.wait_for(job).await?;
//! ```

pub mod audit;
pub mod backup;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod crypto;
pub mod display;
pub mod engine;
pub mod error;
pub mod export;
pub mod jobs;
pub mod lock;
pub mod models;
pub mod storage;
pub mod tools;

pub use error::{BackupError, BackupResult};

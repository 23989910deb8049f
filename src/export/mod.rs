//! Import and export of whole backups
//!
//! Exports are produced on demand and never persisted. Imports are staged,
//! verified and then moved into the backup root in one rename.

mod archive;

pub use archive::{commit_import, export_backup, run_import, stage_import, StagedImport};

//! Core data models for the backup engine
//!
//! Jobs describe requested operations; manifests describe what a backup
//! directory contains.

pub mod ids;
pub mod job;
pub mod manifest;

pub use ids::JobId;
pub use job::{BackupJob, JobStatus, Operation, Trigger};
pub use manifest::{ArtifactFiles, ArtifactSizes, ArtifactSuccess, BackupSummary, Manifest};

//! Job registry
//!
//! Every requested operation is recorded here. Pipelines write their own
//! job's snapshot; pollers read through the same store, never through
//! shared globals, so a restarted process still sees every job.

mod store;

pub use store::{FileJobStore, INTERRUPTED_MESSAGE};

use crate::error::BackupResult;
use crate::models::{BackupJob, JobId};

/// Durable storage for job records
///
/// Writes publish a complete snapshot; readers never observe a partially
/// updated record.
pub trait JobStore: Send + Sync {
    /// Record a new job; fails if the id is already present
    fn insert(&self, job: &BackupJob) -> BackupResult<()>;

    /// Replace the stored snapshot of a job
    ///
    /// Refuses to move a terminal job to a different status.
    fn save(&self, job: &BackupJob) -> BackupResult<()>;

    fn get(&self, id: JobId) -> BackupResult<Option<BackupJob>>;

    /// All jobs, newest first
    fn list(&self) -> BackupResult<Vec<BackupJob>>;

    /// Delete a job record; returns whether it existed
    fn remove(&self, id: JobId) -> BackupResult<bool>;

    /// Read-modify-write a job under the store's write lock
    ///
    /// Used for field groups owned by another pipeline, such as the upload
    /// outcome on a backup job.
    fn update(&self, id: JobId, f: &mut dyn FnMut(&mut BackupJob)) -> BackupResult<BackupJob>;
}

//! Exclusive operation lock
//!
//! Backups and restores must never produce or replace artifacts at the same
//! time. They serialise on a named advisory lock file under `.locks/`.
//! Acquisition never waits: a held lock is reported as
//! [`BackupError::LockContention`] and the caller retries later.
//!
//! The OS drops advisory locks when the holding process dies, so a crash
//! never leaves the engine wedged. Within a process the lock is released
//! when the [`LockGuard`] drops, which also happens while unwinding a panic.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use fs2::FileExt;

use crate::error::{BackupError, BackupResult};

/// Lock shared by the backup and restore pipelines
pub const OPERATION_LOCK: &str = "backup_restore";

/// A named, non-blocking mutual-exclusion primitive
///
/// The file-backed implementation covers every process on one host; a
/// multi-host deployment can plug in a distributed implementation here.
pub trait OperationLock: Send + Sync {
    /// Acquire `name` or fail immediately with `LockContention`
    fn try_acquire(&self, name: &str) -> BackupResult<LockGuard>;
}

/// Proof that a lock is held; releases on drop
pub struct LockGuard {
    name: String,
    _held: Box<dyn Send>,
}

impl LockGuard {
    pub fn new(name: impl Into<String>, held: impl Send + 'static) -> Self {
        Self {
            name: name.into(),
            _held: Box::new(held),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("name", &self.name).finish()
    }
}

/// Run `f` while holding `name`
///
/// Fails with `LockContention` without running `f` when the lock is held.
pub fn with_exclusive_lock<T, F>(lock: &dyn OperationLock, name: &str, f: F) -> BackupResult<T>
where
    F: FnOnce() -> BackupResult<T>,
{
    let guard = lock.try_acquire(name)?;
    tracing::debug!(lock = guard.name(), "acquired");
    let result = f();
    drop(guard);
    tracing::debug!(lock = name, "released");
    result
}

/// Advisory lock files in a directory
#[derive(Debug, Clone)]
pub struct FileLock {
    dir: PathBuf,
}

impl FileLock {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File backing the lock called `name`
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", name))
    }
}

struct HeldFile(File);

impl Drop for HeldFile {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

impl OperationLock for FileLock {
    fn try_acquire(&self, name: &str) -> BackupResult<LockGuard> {
        std::fs::create_dir_all(&self.dir).map_err(|e| BackupError::io_at(&self.dir, e))?;
        let path = self.path_for(name);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| BackupError::io_at(&path, e))?;

        if file.try_lock_exclusive().is_err() {
            return Err(BackupError::LockContention(name.to_string()));
        }

        // Holder pid, for operators inspecting a stuck lock
        let _ = file.set_len(0);
        let _ = writeln!(file, "{}", std::process::id());

        Ok(LockGuard::new(name, HeldFile(file)))
    }
}

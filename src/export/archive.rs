//! Portable backup archives
//!
//! An exported backup is a `.tar.gz` holding the backup directory under its
//! own name. Imports are unpacked and verified inside `.tmp/` and only a
//! fully verified tree is moved into the backup root, so a bad archive
//! never leaves a partial directory behind.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::audit::OperationLog;
use crate::backup::integrity::verify_covering;
use crate::config::paths::{
    encrypted_name, parse_backup_day, DB_ARTIFACT, INFRA_ARTIFACT, MANIFEST_FILE, MEDIA_ARTIFACT,
};
use crate::config::BackupPaths;
use crate::engine::Engine;
use crate::error::{BackupError, BackupResult};
use crate::models::{BackupJob, Manifest};
use crate::storage::tarball::{unpack, write_tar_gz};

/// Package a backup directory into an in-memory archive
pub fn export_backup(paths: &BackupPaths, name: &str) -> BackupResult<Vec<u8>> {
    let dir = paths.backup_dir(name);
    if parse_backup_day(name).is_none() || !dir.is_dir() {
        return Err(BackupError::backup_not_found(name));
    }
    write_tar_gz(&dir, name, Vec::new())
}

/// An unpacked, verified archive waiting to be moved into the root
#[derive(Debug)]
pub struct StagedImport {
    _staging: TempDir,
    root: PathBuf,
    pub manifest: Manifest,
    pub verified_files: usize,
}

impl StagedImport {
    /// Directory holding the verified tree
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Unpack and verify an archive inside the staging area
///
/// The manifest must carry the required keys and every file in the
/// checksum list must match. Nothing outside `.tmp/` is touched.
pub fn stage_import(paths: &BackupPaths, bytes: &[u8]) -> BackupResult<StagedImport> {
    fs::create_dir_all(paths.tmp_dir()).map_err(|e| BackupError::io_at(&paths.tmp_dir(), e))?;
    let staging = tempfile::Builder::new()
        .prefix("import-")
        .tempdir_in(paths.tmp_dir())
        .map_err(|e| BackupError::Io(format!("Failed to create staging area: {}", e)))?;

    unpack(bytes, staging.path())?;
    let root = locate_backup_root(staging.path())?;

    let raw = fs::read(root.join(MANIFEST_FILE)).map_err(|e| BackupError::io_at(&root, e))?;
    let manifest = Manifest::parse_untrusted(&raw)?;
    let verified_files = verify_covering(&root, &covered_names(&root, &manifest))?;

    Ok(StagedImport {
        _staging: staging,
        root,
        manifest,
        verified_files,
    })
}

/// Files the checksum list must vouch for: the manifest, every artifact it
/// names, and any artifact a restore would pick up by its well-known name
fn covered_names(root: &Path, manifest: &Manifest) -> Vec<String> {
    let mut names = vec![MANIFEST_FILE.to_string()];
    names.extend(manifest.files.names().map(str::to_string));
    for artifact in [DB_ARTIFACT, MEDIA_ARTIFACT, INFRA_ARTIFACT] {
        for name in [artifact.to_string(), encrypted_name(artifact)] {
            if root.join(&name).exists() && !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

/// Find the directory holding `meta.json`: the archive top level or its
/// single top-level directory
fn locate_backup_root(extracted: &Path) -> BackupResult<PathBuf> {
    if extracted.join(MANIFEST_FILE).is_file() {
        return Ok(extracted.to_path_buf());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(extracted)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    match dirs.as_slice() {
        [only] if only.join(MANIFEST_FILE).is_file() => Ok(only.clone()),
        _ => Err(BackupError::InvalidArchive(format!(
            "archive has no {}",
            MANIFEST_FILE
        ))),
    }
}

/// Move a verified tree into the backup root under a free name for its day
pub fn commit_import(paths: &BackupPaths, staged: StagedImport) -> BackupResult<String> {
    let day = staged.manifest.day();
    // A concurrent import may claim the same name between pick and rename
    for _ in 0..8 {
        let name = paths.unique_backup_name(day);
        let target = paths.backup_dir(&name);
        match fs::rename(&staged.root, &target) {
            Ok(()) => return Ok(name),
            Err(_) if target.exists() => continue,
            Err(e) => return Err(BackupError::io_at(&target, e)),
        }
    }
    Err(BackupError::Io(format!(
        "could not find a free directory name for {}",
        day
    )))
}

/// Import pipeline: move a staged archive into the root and bind the job
#[tracing::instrument(skip_all, fields(job = %job.id))]
pub fn run_import(engine: &Engine, job: &mut BackupJob, staged: StagedImport) -> BackupResult<()> {
    let log = engine.open_job_log(job)?;
    log.info(format!(
        "importing backup created {} by {} ({} files verified)",
        staged.manifest.created_at, staged.manifest.created_by, staged.verified_files
    ));
    let manifest = staged.manifest.clone();

    let name = match commit_import(&engine.paths, staged) {
        Ok(name) => name,
        Err(e) => {
            log.error(format!("import failed: {}", e));
            return Err(e);
        }
    };
    let dir = engine.paths.backup_dir(&name);
    job.set_backup_path(&dir)?;
    bind_artifacts(job, &dir, &manifest);
    job.set_extra("source_created_at", manifest.created_at);
    job.set_extra("source_job_id", manifest.job_id);
    log.info(format!("imported as {}", name));
    Ok(())
}

fn bind_artifacts(job: &mut BackupJob, dir: &Path, manifest: &Manifest) {
    let at = |file: &Option<String>| file.as_ref().map(|f| dir.join(f));
    job.db_path = at(&manifest.files.db);
    job.media_path = at(&manifest.files.media);
    job.infra_path = at(&manifest.files.infra);
    job.meta_path = Some(dir.join(MANIFEST_FILE));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::integrity::verify_checksums;
    use crate::backup::{backup_names, run_backup, BackupRequest};
    use crate::config::paths::CHECKSUM_FILE;
    use crate::engine::test_support::*;
    use crate::jobs::JobStore;
    use crate::models::{Operation, Trigger};
    use std::sync::Arc;

    fn engine_in(base: &Path) -> Engine {
        seed_live_files(base);
        test_engine(test_settings(base), Arc::new(default_runner()))
    }

    fn backed_up() -> (TempDir, Engine, String) {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine_in(temp_dir.path());
        let mut job = BackupJob::new(Operation::Backup, Trigger::Manual, true);
        engine.store.insert(&job).unwrap();
        run_backup(&engine, &mut job, &BackupRequest::default()).unwrap();
        let name = job.backup_name().unwrap();
        (temp_dir, engine, name)
    }

    /// Rebuild an exported archive after editing its unpacked tree
    fn repack(bytes: &[u8], name: &str, edit: impl FnOnce(&Path)) -> Vec<u8> {
        let work = TempDir::new().unwrap();
        unpack(bytes, work.path()).unwrap();
        let dir = work.path().join(name);
        edit(&dir);
        write_tar_gz(&dir, name, Vec::new()).unwrap()
    }

    #[test]
    fn test_round_trip_into_empty_root() {
        let (_source_dir, source, name) = backed_up();
        let bytes = export_backup(&source.paths, &name).unwrap();

        let target_dir = TempDir::new().unwrap();
        let target = engine_in(target_dir.path());
        let staged = stage_import(&target.paths, &bytes).unwrap();
        assert!(staged.verified_files >= 2);
        let imported = commit_import(&target.paths, staged).unwrap();
        assert_eq!(imported, name);

        for file in [MANIFEST_FILE, CHECKSUM_FILE] {
            assert_eq!(
                fs::read(source.paths.backup_dir(&name).join(file)).unwrap(),
                fs::read(target.paths.backup_dir(&imported).join(file)).unwrap()
            );
        }
        verify_checksums(&target.paths.backup_dir(&imported)).unwrap();
    }

    #[test]
    fn test_reimport_gets_new_name() {
        let (_temp_dir, engine, name) = backed_up();
        let bytes = export_backup(&engine.paths, &name).unwrap();

        let staged = stage_import(&engine.paths, &bytes).unwrap();
        let imported = commit_import(&engine.paths, staged).unwrap();
        assert_eq!(imported, format!("{}_2", name));
        assert!(engine.paths.backup_dir(&name).join(MANIFEST_FILE).exists());
    }

    #[test]
    fn test_corrupted_artifact_rejected() {
        let (_temp_dir, engine, name) = backed_up();
        let bytes = export_backup(&engine.paths, &name).unwrap();
        let corrupted = repack(&bytes, &name, |dir| {
            let path = dir.join(DB_ARTIFACT);
            let mut data = fs::read(&path).unwrap();
            data[0] ^= 0xff;
            fs::write(&path, data).unwrap();
        });

        let before = backup_names(&engine.paths).unwrap();
        let err = stage_import(&engine.paths, &corrupted).unwrap_err();
        assert!(err.is_integrity());
        assert_eq!(backup_names(&engine.paths).unwrap(), before);
        assert_eq!(fs::read_dir(engine.paths.tmp_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_unlisted_artifact_rejected() {
        let (_temp_dir, engine, name) = backed_up();
        let bytes = export_backup(&engine.paths, &name).unwrap();
        let tampered = repack(&bytes, &name, |dir| {
            let list = dir.join(CHECKSUM_FILE);
            let text = fs::read_to_string(&list).unwrap();
            let kept: String = text
                .lines()
                .filter(|line| !line.ends_with(DB_ARTIFACT))
                .map(|line| format!("{}\n", line))
                .collect();
            fs::write(&list, kept).unwrap();
            fs::write(dir.join(DB_ARTIFACT), b"trunc").unwrap();
        });

        let before = backup_names(&engine.paths).unwrap();
        let err = stage_import(&engine.paths, &tampered).unwrap_err();
        assert!(matches!(err, BackupError::InvalidArchive(msg) if msg.contains(DB_ARTIFACT)));
        assert_eq!(backup_names(&engine.paths).unwrap(), before);
        assert_eq!(fs::read_dir(engine.paths.tmp_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_manifest_keys() {
        let (_temp_dir, engine, name) = backed_up();
        let bytes = export_backup(&engine.paths, &name).unwrap();
        let stripped = repack(&bytes, &name, |dir| {
            fs::write(dir.join(MANIFEST_FILE), r#"{"created_by": "elsewhere"}"#).unwrap();
        });

        let err = stage_import(&engine.paths, &stripped).unwrap_err();
        assert!(matches!(err, BackupError::InvalidArchive(msg) if msg.contains("encryption_enabled")));
    }

    #[test]
    fn test_garbage_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let paths = BackupPaths::new(temp_dir.path());
        let err = stage_import(&paths, b"definitely not a tarball").unwrap_err();
        assert!(matches!(err, BackupError::InvalidArchive(_)));
    }

    #[test]
    fn test_run_import_binds_job() {
        let (_source_dir, source, name) = backed_up();
        let bytes = export_backup(&source.paths, &name).unwrap();

        let target_dir = TempDir::new().unwrap();
        let target = engine_in(target_dir.path());
        let staged = stage_import(&target.paths, &bytes).unwrap();
        let mut job = BackupJob::new(Operation::Import, Trigger::Api, true);
        run_import(&target, &mut job, staged).unwrap();

        assert_eq!(job.backup_name().as_deref(), Some(name.as_str()));
        assert!(job.db_path.unwrap().exists());
        assert!(job.logs_path.unwrap().starts_with(target.paths.logs_dir()));
    }

    #[test]
    fn test_export_unknown_backup() {
        let temp_dir = TempDir::new().unwrap();
        let paths = BackupPaths::new(temp_dir.path());
        assert!(export_backup(&paths, "2026-01-01").unwrap_err().is_not_found());
        assert!(export_backup(&paths, "../etc").unwrap_err().is_not_found());
    }
}

//! Artifact producers
//!
//! Each producer writes exactly one artifact into the backup directory.
//! The database dump is streamed through the external dump and compression
//! tools; media and infra archives are built in-process.

use std::fs;
use std::path::{Component, Path, PathBuf};

use super::database::client_command;
use crate::audit::OperationLog;
use crate::config::paths::{encrypted_name, DB_ARTIFACT, INFRA_ARTIFACT, MEDIA_ARTIFACT};
use crate::crypto::{encrypt_file, SecureString};
use crate::engine::Engine;
use crate::error::{BackupError, BackupResult};
use crate::storage::file_io::file_size;
use crate::storage::tarball::create_tar_gz;
use crate::tools::ToolCommand;

/// Top-level directory inside the media archive
pub const MEDIA_PREFIX: &str = "media";
/// Top-level directory inside the infra archive
pub const INFRA_PREFIX: &str = "infra";
/// Allow-listed project files live under this directory of the infra archive
pub const INFRA_PROJECT_DIR: &str = "project";
/// Path of the system reverse-proxy config inside the infra archive
pub const INFRA_SYSTEM_PROXY: &str = "system/Caddyfile";

const VCS_PROGRAM: &str = "git";

/// Stream `dump | compress` into `db.sql.gz`
///
/// Any failure removes the partial file; a half-written dump is never left
/// behind.
pub fn dump_database(engine: &Engine, out_dir: &Path, log: &OperationLog) -> BackupResult<PathBuf> {
    let db = &engine.settings.database;
    let timeout = engine.settings.timeouts.dump();
    let target = out_dir.join(DB_ARTIFACT);

    let pipe = client_command(db, &db.dump_program, "logical database dump")?
        .args(["--no-owner", "--no-privileges"])
        .timeout(timeout)
        .pipe(
            ToolCommand::new(&db.compress_program, "stream compression")
                .arg("-c")
                .stdout_to(&target)
                .timeout(timeout),
        );

    log.info(format!("dumping database with {} | {}", db.dump_program, db.compress_program));
    let result = engine.runner.run_pipe(&pipe).and_then(|output| {
        log.tool_output(&db.dump_program, &output.first);
        log.tool_output(&db.compress_program, &output.second);
        output.check(&pipe).map_err(|e| e.with_log(log.path()))
    });

    match result {
        Ok(_) if file_size(&target) > 0 => {
            log.info(format!("database dump written ({} bytes)", file_size(&target)));
            Ok(target)
        }
        Ok(_) => {
            let _ = fs::remove_file(&target);
            Err(BackupError::producer("database", "dump produced an empty file"))
        }
        Err(e) => {
            let _ = fs::remove_file(&target);
            Err(BackupError::producer("database", e.to_string()))
        }
    }
}

/// Archive the media tree into `media.tar.gz`
///
/// Returns `None` when the media root does not exist; that is a skip, not
/// a failure.
pub fn archive_media(engine: &Engine, out_dir: &Path, log: &OperationLog) -> BackupResult<Option<PathBuf>> {
    let root = &engine.settings.media_root;
    if !root.is_dir() {
        log.warn(format!("media root {} does not exist, skipping media", root.display()));
        return Ok(None);
    }

    let target = out_dir.join(MEDIA_ARTIFACT);
    create_tar_gz(root, MEDIA_PREFIX, &target)
        .map_err(|e| BackupError::producer("media", e.to_string()))?;
    log.info(format!("media archived ({} bytes)", file_size(&target)));
    Ok(Some(target))
}

/// Stage the allow-listed deployment files and archive them into `infra.tar.gz`
///
/// Missing files are skipped; the archive is produced even if empty.
pub fn archive_infra(engine: &Engine, out_dir: &Path, log: &OperationLog) -> BackupResult<PathBuf> {
    let infra = &engine.settings.infra;
    let staging = tempfile::Builder::new()
        .prefix("infra-")
        .tempdir_in(engine.paths.tmp_dir())
        .map_err(|e| BackupError::producer("infra", format!("staging area: {}", e)))?;
    let project_dir = staging.path().join(INFRA_PROJECT_DIR);
    fs::create_dir_all(&project_dir).map_err(|e| BackupError::producer("infra", e.to_string()))?;

    let mut captured = 0;
    for rel in &infra.files {
        let Some(rel_path) = safe_relative(rel) else {
            log.warn(format!("ignoring unsafe infra entry {:?}", rel));
            continue;
        };
        let src = infra.project_root.join(&rel_path);
        if !src.is_file() {
            tracing::debug!(file = %src.display(), "infra file absent");
            continue;
        }
        copy_into(&src, &project_dir.join(&rel_path))?;
        captured += 1;
    }

    if let Some(system) = infra.system_proxy_config.as_ref().filter(|p| p.is_file()) {
        copy_into(system, &staging.path().join(INFRA_SYSTEM_PROXY))?;
        captured += 1;
    }

    let target = out_dir.join(INFRA_ARTIFACT);
    create_tar_gz(staging.path(), INFRA_PREFIX, &target)
        .map_err(|e| BackupError::producer("infra", e.to_string()))?;
    log.info(format!("infra archived ({} files)", captured));
    Ok(target)
}

/// Replace `path` with its encrypted `.enc` sibling
pub fn encrypt_artifact(engine: &Engine, key: &SecureString, path: &Path) -> BackupResult<PathBuf> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| BackupError::Encryption(format!("no file name: {}", path.display())))?;
    let target = path.with_file_name(encrypted_name(&name));
    let result = encrypt_file(key, path, &target, &engine.settings.encryption.kdf);
    // No plaintext copy survives when a key is configured, even on failure.
    let _ = fs::remove_file(path);
    result.map(|_| target)
}

/// Current deployed revision, best-effort
pub fn current_revision(engine: &Engine, log: &OperationLog) -> Result<String, String> {
    let root = engine.settings.infra.project_root.to_string_lossy().into_owned();
    let cmd = ToolCommand::new(VCS_PROGRAM, "revision snapshot")
        .args(["-C", root.as_str(), "rev-parse", "HEAD"])
        .timeout(engine.settings.timeouts.default_timeout());
    let output = engine.runner.run(&cmd).map_err(|e| e.to_string())?;
    log.tool_output(VCS_PROGRAM, &output);
    let output = output
        .check(VCS_PROGRAM)
        .map_err(|e| e.with_log(log.path()).to_string())?;
    let revision = output.stdout.trim().to_string();
    if revision.is_empty() {
        return Err("revision lookup returned nothing".into());
    }
    log.info(format!("deployed revision {}", revision));
    Ok(revision)
}

/// Normalise an allow-list entry, refusing absolute paths and `..`
pub(crate) fn safe_relative(rel: &str) -> Option<PathBuf> {
    let path = Path::new(rel);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!out.as_os_str().is_empty()).then_some(out)
}

fn copy_into(src: &Path, dest: &Path) -> BackupResult<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| BackupError::io_at(parent, e))?;
    }
    fs::copy(src, dest)
        .map(|_| ())
        .map_err(|e| BackupError::producer("infra", format!("{}: {}", src.display(), e)))
}

//! Restore pipeline
//!
//! Gated by an exact confirmation phrase that is checked before anything
//! else happens. Under the operation lock the pipeline writes a freeze
//! marker, decrypts artifacts into a staging area, then restores in order:
//! deployment files (diffed into the log first), media, database. Smoke
//! checks run last.
//!
//! A dry run performs the same planning and smoke checks but changes none
//! of the live files and never touches the database.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::database::client_command;
use super::producers::{safe_relative, INFRA_PREFIX, INFRA_PROJECT_DIR, INFRA_SYSTEM_PROXY, MEDIA_PREFIX};
use super::smoke::run_smoke_checks;
use crate::audit::{diff_text, OperationLog};
use crate::config::paths::{parse_backup_day, DB_ARTIFACT, ENCRYPTED_SUFFIX, INFRA_ARTIFACT, MEDIA_ARTIFACT};
use crate::crypto::{decrypt_file, SecureString};
use crate::engine::Engine;
use crate::error::{BackupError, BackupResult};
use crate::lock::{with_exclusive_lock, OPERATION_LOCK};
use crate::models::{BackupJob, JobId, Trigger};
use crate::storage::file_io::copy_tree;
use crate::storage::tarball::{count_files, extract_tar_gz};
use crate::tools::{StdinSource, ToolCommand};

/// Phrase an operator must type to restore
pub const CONFIRMATION_PHRASE: &str = "RESTORE NOW";

/// Diff lines written to the log per file
const MAX_LOGGED_DIFF_LINES: usize = 200;

const TERMINATE_SESSIONS_SQL: &str = "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
     WHERE datname = current_database() AND pid <> pg_backend_pid();";

/// Parameters of a restore request
#[derive(Debug, Clone, Default)]
pub struct RestoreRequest {
    /// Backup directory name
    pub backup: String,
    pub confirmation: String,
    pub dry_run: bool,
    /// Also overwrite the system-level reverse-proxy config
    pub allow_system_caddy_overwrite: bool,
    pub trigger: Trigger,
}

/// Reject anything but the exact confirmation phrase
pub fn check_confirmation(phrase: &str) -> BackupResult<()> {
    if phrase == CONFIRMATION_PHRASE {
        Ok(())
    } else {
        Err(BackupError::ConfirmationMismatch {
            expected: CONFIRMATION_PHRASE,
        })
    }
}

/// Artifacts found in a backup directory
#[derive(Debug, Clone)]
pub struct ResolvedArtifacts {
    pub db: PathBuf,
    pub media: Option<PathBuf>,
    pub infra: Option<PathBuf>,
}

/// Locate the artifacts of a backup, preferring encrypted copies
///
/// A backup without a database artifact cannot be restored.
pub fn resolve_artifacts(dir: &Path) -> BackupResult<ResolvedArtifacts> {
    let find = |base: &str| {
        let encrypted = dir.join(format!("{}{}", base, ENCRYPTED_SUFFIX));
        let plain = dir.join(base);
        if encrypted.is_file() {
            Some(encrypted)
        } else if plain.is_file() {
            Some(plain)
        } else {
            None
        }
    };
    let db = find(DB_ARTIFACT).ok_or_else(|| BackupError::NotFound {
        entity_type: "Database artifact",
        identifier: dir.display().to_string(),
    })?;
    Ok(ResolvedArtifacts {
        db,
        media: find(MEDIA_ARTIFACT),
        infra: find(INFRA_ARTIFACT),
    })
}

/// Marker file present while a restore runs; removed on drop
#[derive(Debug)]
pub struct FreezeMarker {
    path: PathBuf,
}

impl FreezeMarker {
    pub fn create(path: impl Into<PathBuf>, job: JobId) -> BackupResult<Self> {
        let path = path.into();
        fs::write(&path, format!("{}\n", job)).map_err(|e| BackupError::io_at(&path, e))?;
        Ok(Self { path })
    }
}

impl Drop for FreezeMarker {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(marker = %self.path.display(), error = %e, "failed to remove restore marker");
        }
    }
}

/// One deployment file a restore would change
#[derive(Debug, Clone, Serialize)]
pub struct PlannedFile {
    pub path: String,
    /// `new file`, `unchanged` or a `+added -removed` summary
    pub change: String,
    /// Whether the live file was actually written
    pub applied: bool,
}

/// What a restore does (or, in a dry run, would do)
#[derive(Debug, Clone, Serialize, Default)]
pub struct RestorePlan {
    pub dry_run: bool,
    pub config_files: Vec<PlannedFile>,
    pub system_proxy: Option<PlannedFile>,
    pub media_files: usize,
    pub database_replace: bool,
}

/// Restore the backup named in `request`
#[tracing::instrument(skip_all, fields(job = %job.id, backup = %request.backup, dry_run = request.dry_run))]
pub fn run_restore(engine: &Engine, job: &mut BackupJob, request: &RestoreRequest) -> BackupResult<()> {
    check_confirmation(&request.confirmation)?;

    let dir = engine.paths.backup_dir(&request.backup);
    if parse_backup_day(&request.backup).is_none() || !dir.is_dir() {
        return Err(BackupError::backup_not_found(&request.backup));
    }
    let artifacts = resolve_artifacts(&dir)?;
    job.set_backup_path(&dir)?;

    with_exclusive_lock(engine.lock.as_ref(), OPERATION_LOCK, || {
        restore_logged(engine, job, request, &artifacts, &dir)
    })
}

/// Open the restore log, raise the freeze marker and run the restore
///
/// Only called with the operation lock held, so a refused restore leaves
/// no log behind.
fn restore_logged(
    engine: &Engine,
    job: &mut BackupJob,
    request: &RestoreRequest,
    artifacts: &ResolvedArtifacts,
    dir: &Path,
) -> BackupResult<()> {
    let log = OperationLog::open(dir.join(format!("restore-{}.log", job.id)))?;
    job.logs_path = Some(log.path().to_path_buf());
    log.info(format!(
        "restore of {} requested (job {}, dry run {}, system proxy overwrite {})",
        request.backup, job.id, request.dry_run, request.allow_system_caddy_overwrite
    ));

    let result = FreezeMarker::create(engine.paths.freeze_marker(), job.id)
        .and_then(|_freeze| restore_locked(engine, job, request, artifacts, &log));
    match &result {
        Ok(()) => log.info("restore finished"),
        Err(e) => log.error(format!("restore failed: {}", e)),
    }
    result
}

fn restore_locked(
    engine: &Engine,
    job: &mut BackupJob,
    request: &RestoreRequest,
    artifacts: &ResolvedArtifacts,
    log: &OperationLog,
) -> BackupResult<()> {
    let staging = tempfile::Builder::new()
        .prefix("restore-")
        .tempdir_in(engine.paths.tmp_dir())
        .map_err(|e| BackupError::Io(format!("Failed to create staging area: {}", e)))?;
    let key = engine.settings.encryption_key();

    let db = plaintext(&artifacts.db, staging.path(), key.as_ref(), log)?;
    let media = artifacts
        .media
        .as_ref()
        .map(|p| plaintext(p, staging.path(), key.as_ref(), log))
        .transpose()?;
    let infra = artifacts
        .infra
        .as_ref()
        .map(|p| plaintext(p, staging.path(), key.as_ref(), log))
        .transpose()?;

    let mut plan = RestorePlan {
        dry_run: request.dry_run,
        database_replace: true,
        ..Default::default()
    };

    if let Some(infra) = &infra {
        restore_infra(engine, request, infra, staging.path(), &mut plan, log)?;
    } else {
        log.warn("backup has no infra artifact, deployment files left as they are");
    }

    if let Some(media) = &media {
        restore_media(engine, request, media, staging.path(), &mut plan, log)?;
    } else {
        log.warn("backup has no media artifact, media left as it is");
    }

    job.set_extra("plan", &plan);
    job.set_extra("dry_run", request.dry_run);
    engine.store.save(job)?;

    if request.dry_run {
        log.info("dry run: database left untouched");
    } else {
        replace_database(engine, &db, log)?;
    }

    let report = run_smoke_checks(engine, log);
    job.set_extra("smoke", &report);
    job.set_extra("smoke_ok", report.all_ok());
    Ok(())
}

/// Path of a usable plaintext copy of an artifact
fn plaintext(
    artifact: &Path,
    staging: &Path,
    key: Option<&SecureString>,
    log: &OperationLog,
) -> BackupResult<PathBuf> {
    let name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let Some(plain_name) = name.strip_suffix(ENCRYPTED_SUFFIX) else {
        return Ok(artifact.to_path_buf());
    };
    let key = key.ok_or_else(|| {
        BackupError::Encryption(format!(
            "{} is encrypted but no encryption key is configured",
            name
        ))
    })?;
    let out = staging.join(plain_name);
    decrypt_file(key, artifact, &out)?;
    log.info(format!("decrypted {}", name));
    Ok(out)
}

fn restore_infra(
    engine: &Engine,
    request: &RestoreRequest,
    archive: &Path,
    staging: &Path,
    plan: &mut RestorePlan,
    log: &OperationLog,
) -> BackupResult<()> {
    let infra = &engine.settings.infra;
    let extracted = staging.join("infra-extract");
    extract_tar_gz(archive, &extracted)?;
    let root = extracted.join(INFRA_PREFIX);

    for rel in &infra.files {
        let Some(rel_path) = safe_relative(rel) else {
            continue;
        };
        let restored = root.join(INFRA_PROJECT_DIR).join(&rel_path);
        if !restored.is_file() {
            continue;
        }
        let live = infra.project_root.join(&rel_path);
        plan.config_files
            .push(apply_file(&restored, &live, !request.dry_run, log)?);
    }

    let restored_proxy = root.join(INFRA_SYSTEM_PROXY);
    if let (true, Some(live)) = (restored_proxy.is_file(), infra.system_proxy_config.as_ref()) {
        let allowed = request.allow_system_caddy_overwrite;
        if !allowed {
            log.info(format!(
                "{} not overwritten: system proxy overwrite was not allowed",
                live.display()
            ));
        }
        plan.system_proxy = Some(apply_file(&restored_proxy, live, allowed && !request.dry_run, log)?);
    }
    Ok(())
}

/// Diff a restored file against the live one and optionally write it
fn apply_file(restored: &Path, live: &Path, write: bool, log: &OperationLog) -> BackupResult<PlannedFile> {
    let new = fs::read(restored).map_err(|e| BackupError::io_at(restored, e))?;
    let old = fs::read(live).ok();

    let (change, differs) = match &old {
        None => ("new file".to_string(), true),
        Some(old) if *old == new => ("unchanged".to_string(), false),
        Some(old) => {
            let diff = diff_text(&String::from_utf8_lossy(old), &String::from_utf8_lossy(&new));
            log.info(format!("diff {} ({})", live.display(), diff.summary()));
            for line in diff.lines.iter().take(MAX_LOGGED_DIFF_LINES) {
                log.info(format!("    {}", line));
            }
            (diff.summary(), true)
        }
    };

    let applied = write && differs;
    if applied {
        if let Some(parent) = live.parent() {
            fs::create_dir_all(parent).map_err(|e| BackupError::io_at(parent, e))?;
        }
        fs::write(live, &new).map_err(|e| BackupError::io_at(live, e))?;
        log.info(format!("restored {}", live.display()));
    }

    Ok(PlannedFile {
        path: live.display().to_string(),
        change,
        applied,
    })
}

fn restore_media(
    engine: &Engine,
    request: &RestoreRequest,
    archive: &Path,
    staging: &Path,
    plan: &mut RestorePlan,
    log: &OperationLog,
) -> BackupResult<()> {
    plan.media_files = count_files(archive)?;
    if request.dry_run {
        log.info(format!("dry run: would restore {} media files", plan.media_files));
        return Ok(());
    }

    let extracted = staging.join("media-extract");
    extract_tar_gz(archive, &extracted)?;
    let tree = extracted.join(MEDIA_PREFIX);
    if !tree.is_dir() {
        return Err(BackupError::InvalidArchive(format!(
            "{} has no {}/ directory",
            archive.display(),
            MEDIA_PREFIX
        )));
    }
    let copied = copy_tree(&tree, &engine.settings.media_root)?;
    log.info(format!(
        "restored {} media files into {}",
        copied,
        engine.settings.media_root.display()
    ));
    Ok(())
}

/// Terminate sessions, recreate the schema and replay the dump
fn replace_database(engine: &Engine, dump: &Path, log: &OperationLog) -> BackupResult<()> {
    let db = &engine.settings.database;
    let client = client_command(db, &db.sql_program, "SQL client")?.args(["-v", "ON_ERROR_STOP=1"]);
    let sql = |statement: &str| {
        client
            .clone()
            .args(["-c", statement])
            .timeout(engine.settings.timeouts.default_timeout())
    };

    let terminate = engine.runner.run(&sql(TERMINATE_SESSIONS_SQL))?;
    log.tool_output("terminate sessions", &terminate);
    if !terminate.success() {
        log.warn("could not terminate other sessions, continuing");
    }

    let reset = format!(
        "DROP SCHEMA IF EXISTS \"{0}\" CASCADE; CREATE SCHEMA \"{0}\";",
        db.schema
    );
    let output = engine.runner.run(&sql(&reset))?;
    log.tool_output("reset schema", &output);
    output
        .check(&db.sql_program)
        .map_err(|e| e.with_log(log.path()))?;
    log.info(format!("schema {} recreated", db.schema));

    let timeout = engine.settings.timeouts.restore();
    let replay = ToolCommand::new(&db.compress_program, "stream decompression")
        .arg("-dc")
        .stdin(StdinSource::File(dump.to_path_buf()))
        .timeout(timeout)
        .pipe(client.clone().arg("-q").timeout(timeout));
    let output = engine.runner.run_pipe(&replay)?;
    log.tool_output(&db.compress_program, &output.first);
    log.tool_output(&db.sql_program, &output.second);
    output.check(&replay).map_err(|e| e.with_log(log.path()))?;
    log.info("database replayed");
    Ok(())
}

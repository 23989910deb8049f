//! Gzip-compressed tarballs
//!
//! Media and infra artifacts, and exported backups, are ordinary `.tar.gz`
//! files so operators can still open them with stock tools.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder};

use crate::error::{BackupError, BackupResult};

/// Archive the contents of `src_dir` under `prefix` into a new `.tar.gz` file
pub fn create_tar_gz(src_dir: &Path, prefix: &str, output: &Path) -> BackupResult<()> {
    let file = File::create(output).map_err(|e| BackupError::io_at(output, e))?;
    let result = write_tar_gz(src_dir, prefix, BufWriter::new(file)).map(|_| ());
    if result.is_err() {
        let _ = std::fs::remove_file(output);
    }
    result
}

/// Stream the contents of `src_dir` under `prefix` as a `.tar.gz` into `writer`
pub fn write_tar_gz<W: Write>(src_dir: &Path, prefix: &str, writer: W) -> BackupResult<W> {
    let encoder = GzEncoder::new(writer, Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);
    builder
        .append_dir_all(prefix, src_dir)
        .map_err(|e| BackupError::Io(format!("Failed to archive {}: {}", src_dir.display(), e)))?;
    let encoder = builder
        .into_inner()
        .map_err(|e| BackupError::Io(format!("Failed to finish archive: {}", e)))?;
    let mut writer = encoder
        .finish()
        .map_err(|e| BackupError::Io(format!("Failed to finish compression: {}", e)))?;
    writer.flush()?;
    Ok(writer)
}

/// Extract a `.tar.gz` file into `dest`, returning the number of files
pub fn extract_tar_gz(archive: &Path, dest: &Path) -> BackupResult<usize> {
    let file = File::open(archive).map_err(|e| BackupError::io_at(archive, e))?;
    unpack(BufReader::new(file), dest)
}

/// Extract a `.tar.gz` stream into `dest`, returning the number of files
///
/// Entries that would land outside `dest` (absolute paths, `..`) are
/// rejected rather than skipped.
pub fn unpack<R: Read>(reader: R, dest: &Path) -> BackupResult<usize> {
    std::fs::create_dir_all(dest).map_err(|e| BackupError::io_at(dest, e))?;
    let mut archive = Archive::new(GzDecoder::new(reader));
    let mut files = 0;
    let entries = archive
        .entries()
        .map_err(|e| BackupError::InvalidArchive(e.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| BackupError::InvalidArchive(e.to_string()))?;
        let is_file = entry.header().entry_type().is_file();
        let name = entry
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| BackupError::InvalidArchive(format!("{}: {}", name, e)))?;
        if !unpacked {
            return Err(BackupError::InvalidArchive(format!(
                "entry escapes the extraction directory: {}",
                name
            )));
        }
        if is_file {
            files += 1;
        }
    }
    Ok(files)
}

/// Count regular files in a `.tar.gz` without extracting it
pub fn count_files(archive: &Path) -> BackupResult<usize> {
    let file = File::open(archive).map_err(|e| BackupError::io_at(archive, e))?;
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    let mut files = 0;
    for entry in archive
        .entries()
        .map_err(|e| BackupError::InvalidArchive(e.to_string()))?
    {
        let entry = entry.map_err(|e| BackupError::InvalidArchive(e.to_string()))?;
        if entry.header().entry_type().is_file() {
            files += 1;
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_extract() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("media");
        std::fs::create_dir_all(src.join("scans/2026")).unwrap();
        std::fs::write(src.join("scans/2026/ct-1.dcm"), b"DICM").unwrap();
        std::fs::write(src.join("logo.png"), b"png").unwrap();

        let archive = temp_dir.path().join("media.tar.gz");
        create_tar_gz(&src, "media", &archive).unwrap();
        assert_eq!(count_files(&archive).unwrap(), 2);

        let out = temp_dir.path().join("out");
        assert_eq!(extract_tar_gz(&archive, &out).unwrap(), 2);
        assert_eq!(
            std::fs::read(out.join("media/scans/2026/ct-1.dcm")).unwrap(),
            b"DICM"
        );
    }

    #[test]
    fn test_garbage_is_invalid_archive() {
        let temp_dir = TempDir::new().unwrap();
        let err = unpack(&b"definitely not gzip"[..], temp_dir.path()).unwrap_err();
        assert!(matches!(err, BackupError::InvalidArchive(_)));
    }
}

//! Integrity recorder
//!
//! Writes `checksums.sha256` in the format `sha256sum -c` understands:
//! one `"<hex digest>  <file name>"` line per artifact plus the manifest.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::config::paths::CHECKSUM_FILE;
use crate::error::{BackupError, BackupResult};

/// Hex SHA-256 of a file's contents
pub fn sha256_file(path: &Path) -> BackupResult<String> {
    let file = File::open(path).map_err(|e| BackupError::io_at(path, e))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).map_err(|e| BackupError::io_at(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash `files` (names inside `dir`) and write the checksum list
pub fn write_checksums(dir: &Path, files: &[String]) -> BackupResult<PathBuf> {
    let mut body = String::new();
    for name in files {
        let digest = sha256_file(&dir.join(name))?;
        body.push_str(&format!("{}  {}\n", digest, name));
    }
    let path = dir.join(CHECKSUM_FILE);
    std::fs::write(&path, body).map_err(|e| BackupError::io_at(&path, e))?;
    Ok(path)
}

/// One line of a checksum list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumEntry {
    pub digest: String,
    pub file: String,
}

/// Parse checksum list text
///
/// File names must be plain names inside the backup directory.
pub fn parse_checksums(text: &str) -> BackupResult<Vec<ChecksumEntry>> {
    let mut entries = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let (digest, file) = line.split_once(char::is_whitespace).ok_or_else(|| {
            BackupError::InvalidArchive(format!("checksum line {} is malformed", n + 1))
        })?;
        // sha256sum marks binary mode with a leading '*'
        let file = file.trim_start().trim_start_matches('*');
        let plain = !file.is_empty()
            && !file.contains('/')
            && !file.contains('\\')
            && file != "."
            && file != "..";
        if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) || !plain {
            return Err(BackupError::InvalidArchive(format!(
                "checksum line {} is malformed",
                n + 1
            )));
        }
        entries.push(ChecksumEntry {
            digest: digest.to_ascii_lowercase(),
            file: file.to_string(),
        });
    }
    Ok(entries)
}

/// Verify every file listed in `dir/checksums.sha256`
///
/// Returns the number of verified files.
pub fn verify_checksums(dir: &Path) -> BackupResult<usize> {
    verify_covering(dir, &[])
}

/// Like [`verify_checksums`], but every name in `required` must be listed
pub fn verify_covering(dir: &Path, required: &[String]) -> BackupResult<usize> {
    let list = dir.join(CHECKSUM_FILE);
    let text = std::fs::read_to_string(&list)
        .map_err(|_| BackupError::InvalidArchive(format!("{} is missing", CHECKSUM_FILE)))?;
    let entries = parse_checksums(&text)?;
    if entries.is_empty() {
        return Err(BackupError::InvalidArchive(format!("{} is empty", CHECKSUM_FILE)));
    }
    if let Some(name) = required.iter().find(|name| !entries.iter().any(|e| &e.file == *name)) {
        return Err(BackupError::InvalidArchive(format!(
            "{} does not cover {}",
            CHECKSUM_FILE, name
        )));
    }
    for entry in &entries {
        let path = dir.join(&entry.file);
        if !path.is_file() {
            return Err(BackupError::IntegrityMismatch {
                file: entry.file.clone(),
                expected: entry.digest.clone(),
                actual: "missing".into(),
            });
        }
        let actual = sha256_file(&path)?;
        if actual != entry.digest {
            return Err(BackupError::IntegrityMismatch {
                file: entry.file.clone(),
                expected: entry.digest.clone(),
                actual,
            });
        }
    }
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_known_digest() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("x");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_write_then_verify() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("db.sql.gz"), b"dump").unwrap();
        std::fs::write(temp_dir.path().join("meta.json"), b"{}").unwrap();

        let list = write_checksums(
            temp_dir.path(),
            &["db.sql.gz".to_string(), "meta.json".to_string()],
        )
        .unwrap();
        let text = std::fs::read_to_string(list).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().all(|l| l.split("  ").count() == 2));

        assert_eq!(verify_checksums(temp_dir.path()).unwrap(), 2);
    }

    #[test]
    fn test_flipped_byte_detected() {
        let temp_dir = TempDir::new().unwrap();
        let artifact = temp_dir.path().join("db.sql.gz");
        std::fs::write(&artifact, b"dump").unwrap();
        write_checksums(temp_dir.path(), &["db.sql.gz".to_string()]).unwrap();

        std::fs::write(&artifact, b"dumq").unwrap();
        let err = verify_checksums(temp_dir.path()).unwrap_err();
        assert!(err.is_integrity());
    }

    #[test]
    fn test_unlisted_required_file_rejected() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("db.sql.gz"), b"dump").unwrap();
        std::fs::write(temp_dir.path().join("meta.json"), b"{}").unwrap();
        write_checksums(temp_dir.path(), &["meta.json".to_string()]).unwrap();

        let required = ["meta.json".to_string(), "db.sql.gz".to_string()];
        let err = verify_covering(temp_dir.path(), &required).unwrap_err();
        assert!(matches!(err, BackupError::InvalidArchive(msg) if msg.contains("db.sql.gz")));
        assert_eq!(verify_covering(temp_dir.path(), &required[..1]).unwrap(), 1);
    }

    #[test]
    fn test_rejects_path_traversal() {
        let line = format!("{}  ../etc/passwd\n", "a".repeat(64));
        assert!(parse_checksums(&line).is_err());
    }

    #[test]
    fn test_accepts_binary_marker() {
        let line = format!("{} *db.sql.gz\n", "A".repeat(64));
        let entries = parse_checksums(&line).unwrap();
        assert_eq!(entries[0].file, "db.sql.gz");
        assert_eq!(entries[0].digest, "a".repeat(64));
    }
}

//! AES-256-GCM artifact encryption
//!
//! Encrypts whole artifact files with a passphrase. The file is sealed in
//! fixed-size chunks so arbitrarily large dumps never have to fit in memory.
//!
//! ```text
//! magic "CLBKENC1" | memory_cost u32 | time_cost u32 | parallelism u32
//! | salt [16] | nonce_prefix [8]
//! then per chunk: last_flag u8 | len u32 | ciphertext+tag [len]
//! ```
//!
//! The nonce of chunk `i` is `nonce_prefix || i` (big endian) and the flag
//! byte is authenticated as associated data, so reordered, dropped or
//! truncated chunks fail to decrypt.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};

use crate::error::{BackupError, BackupResult};

use super::key_derivation::{derive_key, KeyDerivationParams, SALT_LEN};

const MAGIC: &[u8; 8] = b"CLBKENC1";
/// Plaintext bytes per sealed chunk
const CHUNK_SIZE: usize = 1024 * 1024;
const NONCE_PREFIX_LEN: usize = 8;
const TAG_LEN: usize = 16;
const FLAG_MORE: u8 = 0;
const FLAG_LAST: u8 = 1;

/// Encrypt `input` into `output` with a key derived from `passphrase`
pub fn encrypt_file(
    passphrase: &str,
    input: &Path,
    output: &Path,
    params: &KeyDerivationParams,
) -> BackupResult<()> {
    let result = seal(passphrase, input, output, params);
    if result.is_err() {
        let _ = fs::remove_file(output);
    }
    result
}

/// Decrypt `input` (written by [`encrypt_file`]) into `output`
pub fn decrypt_file(passphrase: &str, input: &Path, output: &Path) -> BackupResult<()> {
    let result = open(passphrase, input, output);
    if result.is_err() {
        let _ = fs::remove_file(output);
    }
    result
}

/// Check whether a file starts with the encrypted artifact header
pub fn is_encrypted_file(path: &Path) -> bool {
    let mut magic = [0u8; 8];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .map(|_| &magic == MAGIC)
        .unwrap_or(false)
}

fn seal(
    passphrase: &str,
    input: &Path,
    output: &Path,
    params: &KeyDerivationParams,
) -> BackupResult<()> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut prefix = [0u8; NONCE_PREFIX_LEN];
    OsRng.fill_bytes(&mut prefix);

    let key = derive_key(passphrase, &salt, params)?;
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| BackupError::Encryption(format!("Failed to create cipher: {}", e)))?;

    let mut reader = BufReader::new(File::open(input).map_err(|e| BackupError::io_at(input, e))?);
    let mut writer =
        BufWriter::new(File::create(output).map_err(|e| BackupError::io_at(output, e))?);

    writer.write_all(MAGIC)?;
    writer.write_all(&params.memory_cost.to_be_bytes())?;
    writer.write_all(&params.time_cost.to_be_bytes())?;
    writer.write_all(&params.parallelism.to_be_bytes())?;
    writer.write_all(&salt)?;
    writer.write_all(&prefix)?;

    let mut counter: u32 = 0;
    let mut current = read_chunk(&mut reader)?;
    loop {
        let next = if current.len() == CHUNK_SIZE {
            read_chunk(&mut reader)?
        } else {
            Vec::new()
        };
        let flag = if next.is_empty() { FLAG_LAST } else { FLAG_MORE };

        let nonce_bytes = chunk_nonce(&prefix, counter);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &current,
                    aad: &[flag],
                },
            )
            .map_err(|e| BackupError::Encryption(format!("Encryption failed: {}", e)))?;

        writer.write_all(&[flag])?;
        writer.write_all(&(ciphertext.len() as u32).to_be_bytes())?;
        writer.write_all(&ciphertext)?;

        if flag == FLAG_LAST {
            break;
        }
        current = next;
        counter = counter
            .checked_add(1)
            .ok_or_else(|| BackupError::Encryption("Artifact too large to encrypt".into()))?;
    }

    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

fn open(passphrase: &str, input: &Path, output: &Path) -> BackupResult<()> {
    let mut reader = BufReader::new(File::open(input).map_err(|e| BackupError::io_at(input, e))?);

    let mut magic = [0u8; 8];
    read_exact_or(&mut reader, &mut magic, "header")?;
    if &magic != MAGIC {
        return Err(BackupError::Encryption(format!(
            "{} is not an encrypted artifact",
            input.display()
        )));
    }
    let params = KeyDerivationParams::with_values(
        read_u32(&mut reader)?,
        read_u32(&mut reader)?,
        read_u32(&mut reader)?,
    );
    params.check_bounds()?;
    let mut salt = [0u8; SALT_LEN];
    read_exact_or(&mut reader, &mut salt, "salt")?;
    let mut prefix = [0u8; NONCE_PREFIX_LEN];
    read_exact_or(&mut reader, &mut prefix, "nonce")?;

    let key = derive_key(passphrase, &salt, &params)?;
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| BackupError::Encryption(format!("Failed to create cipher: {}", e)))?;

    let mut writer =
        BufWriter::new(File::create(output).map_err(|e| BackupError::io_at(output, e))?);

    let mut counter: u32 = 0;
    loop {
        let mut flag = [0u8; 1];
        read_exact_or(&mut reader, &mut flag, "chunk flag")?;
        let len = read_u32(&mut reader)? as usize;
        if len > CHUNK_SIZE + TAG_LEN {
            return Err(BackupError::Encryption(format!(
                "Corrupted chunk length {}",
                len
            )));
        }
        let mut ciphertext = vec![0u8; len];
        read_exact_or(&mut reader, &mut ciphertext, "chunk")?;

        let nonce_bytes = chunk_nonce(&prefix, counter);
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &ciphertext,
                    aad: &flag,
                },
            )
            .map_err(|_| {
                BackupError::Encryption(
                    "Decryption failed: invalid key or corrupted data".to_string(),
                )
            })?;
        writer.write_all(&plaintext)?;

        if flag[0] == FLAG_LAST {
            let mut trailing = [0u8; 1];
            if reader.read(&mut trailing)? != 0 {
                return Err(BackupError::Encryption(
                    "Trailing data after final chunk".to_string(),
                ));
            }
            break;
        }
        counter = counter
            .checked_add(1)
            .ok_or_else(|| BackupError::Encryption("Chunk counter overflow".into()))?;
    }

    writer.flush()?;
    Ok(())
}

fn chunk_nonce(prefix: &[u8; NONCE_PREFIX_LEN], counter: u32) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..NONCE_PREFIX_LEN].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_LEN..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

fn read_chunk<R: Read>(reader: &mut R) -> BackupResult<Vec<u8>> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut filled = 0;
    while filled < CHUNK_SIZE {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

fn read_u32<R: Read>(reader: &mut R) -> BackupResult<u32> {
    let mut bytes = [0u8; 4];
    read_exact_or(reader, &mut bytes, "header field")?;
    Ok(u32::from_be_bytes(bytes))
}

fn read_exact_or<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> BackupResult<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            BackupError::Encryption(format!("Encrypted artifact truncated ({})", what))
        } else {
            BackupError::from(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key_derivation::fast_params;
    use tempfile::TempDir;

    fn round_trip(data: &[u8]) -> Vec<u8> {
        let temp = TempDir::new().unwrap();
        let plain = temp.path().join("plain");
        let enc = temp.path().join("plain.enc");
        let out = temp.path().join("out");
        fs::write(&plain, data).unwrap();

        encrypt_file("secret", &plain, &enc, &fast_params()).unwrap();
        assert!(is_encrypted_file(&enc));
        decrypt_file("secret", &enc, &out).unwrap();
        fs::read(&out).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_small() {
        assert_eq!(round_trip(b"Hello, World!"), b"Hello, World!");
    }

    #[test]
    fn test_empty_file() {
        assert!(round_trip(b"").is_empty());
    }

    #[test]
    fn test_multi_chunk_file() {
        let data: Vec<u8> = (0..(CHUNK_SIZE * 2 + 17)).map(|i| (i % 251) as u8).collect();
        assert_eq!(round_trip(&data), data);
    }

    #[test]
    fn test_exact_chunk_boundary() {
        let data = vec![3u8; CHUNK_SIZE];
        assert_eq!(round_trip(&data), data);
    }

    #[test]
    fn test_wrong_key_fails() {
        let temp = TempDir::new().unwrap();
        let plain = temp.path().join("plain");
        let enc = temp.path().join("plain.enc");
        let out = temp.path().join("out");
        fs::write(&plain, b"patient data").unwrap();

        encrypt_file("right", &plain, &enc, &fast_params()).unwrap();
        assert!(decrypt_file("wrong", &enc, &out).is_err());
        assert!(!out.exists());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let temp = TempDir::new().unwrap();
        let plain = temp.path().join("plain");
        let enc = temp.path().join("plain.enc");
        let out = temp.path().join("out");
        fs::write(&plain, b"patient data").unwrap();
        encrypt_file("secret", &plain, &enc, &fast_params()).unwrap();

        let mut bytes = fs::read(&enc).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&enc, bytes).unwrap();

        assert!(decrypt_file("secret", &enc, &out).is_err());
    }

    #[test]
    fn test_truncated_file_fails() {
        let temp = TempDir::new().unwrap();
        let plain = temp.path().join("plain");
        let enc = temp.path().join("plain.enc");
        let out = temp.path().join("out");
        fs::write(&plain, vec![1u8; CHUNK_SIZE + 10]).unwrap();
        encrypt_file("secret", &plain, &enc, &fast_params()).unwrap();

        let bytes = fs::read(&enc).unwrap();
        fs::write(&enc, &bytes[..bytes.len() / 2]).unwrap();

        assert!(decrypt_file("secret", &enc, &out).is_err());
    }

    #[test]
    fn test_oversized_header_costs_rejected() {
        let temp = TempDir::new().unwrap();
        let enc = temp.path().join("db.sql.gz.enc");
        let out = temp.path().join("db.sql.gz");

        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&u32::MAX.to_be_bytes());
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(&[0u8; SALT_LEN]);
        bytes.extend_from_slice(&[0u8; NONCE_PREFIX_LEN]);
        fs::write(&enc, bytes).unwrap();

        let err = decrypt_file("secret", &enc, &out).unwrap_err();
        assert!(err.to_string().contains("out of range"));
        assert!(!out.exists());
    }

    #[test]
    fn test_plaintext_is_not_encrypted() {
        let temp = TempDir::new().unwrap();
        let plain = temp.path().join("plain");
        fs::write(&plain, b"just text").unwrap();
        assert!(!is_encrypted_file(&plain));
    }
}

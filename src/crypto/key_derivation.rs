//! Key derivation using Argon2id
//!
//! Derives artifact encryption keys from the configured passphrase using
//! Argon2id, a memory-hard key derivation function resistant to GPU/ASIC
//! attacks. Every encrypted artifact carries its own random salt and the
//! cost parameters it was sealed with.

use argon2::{Argon2, Params};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{BackupError, BackupResult};

/// Salt length stored in every encrypted artifact header
pub const SALT_LEN: usize = 16;

/// Highest accepted memory cost in KiB (1 GiB)
pub const MAX_MEMORY_COST: u32 = 1024 * 1024;
/// Highest accepted iteration count
pub const MAX_TIME_COST: u32 = 10;
/// Highest accepted parallelism degree
pub const MAX_PARALLELISM: u32 = 16;

/// Cost parameters for key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDerivationParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub memory_cost: u32,
    /// Time cost (iterations, default: 3)
    pub time_cost: u32,
    /// Parallelism degree (default: 4)
    pub parallelism: u32,
}

impl Default for KeyDerivationParams {
    fn default() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl KeyDerivationParams {
    /// Create params with specific values
    pub fn with_values(memory_cost: u32, time_cost: u32, parallelism: u32) -> Self {
        Self {
            memory_cost,
            time_cost,
            parallelism,
        }
    }

    /// Refuse costs above the fixed ceilings
    ///
    /// Encrypted artifacts may come from imported archives, so header
    /// values are untrusted input.
    pub fn check_bounds(&self) -> BackupResult<()> {
        if self.memory_cost > MAX_MEMORY_COST
            || self.time_cost > MAX_TIME_COST
            || self.parallelism > MAX_PARALLELISM
        {
            return Err(BackupError::Encryption(format!(
                "Argon2 parameters out of range (memory {} KiB, time {}, parallelism {})",
                self.memory_cost, self.time_cost, self.parallelism
            )));
        }
        Ok(())
    }
}

/// A derived encryption key, zeroed on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    /// The 32-byte key for AES-256
    key: [u8; 32],
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey").field("key", &"<redacted>").finish()
    }
}

impl DerivedKey {
    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

/// Derive an encryption key from a passphrase and salt
pub fn derive_key(
    passphrase: &str,
    salt: &[u8],
    params: &KeyDerivationParams,
) -> BackupResult<DerivedKey> {
    params.check_bounds()?;
    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(32), // Output length for AES-256
    )
    .map_err(|e| BackupError::Encryption(format!("Invalid Argon2 parameters: {}", e)))?;

    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2_params,
    );

    let mut key = [0u8; 32];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| BackupError::Encryption(format!("Key derivation failed: {}", e)))?;

    Ok(DerivedKey { key })
}

#[cfg(test)]
pub(crate) fn fast_params() -> KeyDerivationParams {
    KeyDerivationParams::with_values(1024, 1, 1)
}

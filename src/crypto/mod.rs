//! Cryptographic functions for the backup engine
//!
//! Provides AES-256-GCM artifact encryption with Argon2id key derivation
//! for optional at-rest encryption of backup artifacts.

pub mod encryption;
pub mod key_derivation;
pub mod secure_memory;

pub use encryption::{decrypt_file, encrypt_file, is_encrypted_file};
pub use key_derivation::{derive_key, DerivedKey, KeyDerivationParams};
pub use secure_memory::SecureString;

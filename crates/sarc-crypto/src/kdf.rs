//! Key derivation: Argon2id(master key, per-archive salt) → archive key

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::{KEY_SIZE, SALT_SIZE};

/// The 256-bit root secret all archive keys are derived from.
///
/// Zeroized on drop. Never logged; `Debug` is redacted.
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Build a master key from a slice that must be exactly 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::KeyDerivation(format!(
                "master key must be {KEY_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::from_bytes(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A per-archive 256-bit key. Exists only for the duration of one
/// encrypt or decrypt; zeroized on drop.
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Random, non-secret salt that makes each archive key independent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveSalt(Vec<u8>);

impl ArchiveSalt {
    /// Generate a fresh random salt. Called once per archive.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap a stored salt, rejecting anything shorter than 16 bytes.
    pub fn from_vec(bytes: Vec<u8>) -> CryptoResult<Self> {
        if bytes.len() < SALT_SIZE {
            return Err(CryptoError::KeyDerivation(format!(
                "salt must be at least {SALT_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Argon2id parameters for archive key derivation.
///
/// Stored with every archive so the exact work factor can be replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Cheapest parameters Argon2 accepts. Tests only.
    pub fn insecure_fast() -> Self {
        Self {
            mem_cost_kib: 8,
            time_cost: 1,
            parallelism: 1,
        }
    }

    fn to_argon2(self) -> CryptoResult<Params> {
        Params::new(
            self.mem_cost_kib,
            self.time_cost,
            self.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| CryptoError::KeyDerivation(format!("invalid Argon2id params: {e}")))
    }
}

/// Derive the archive key for `salt` from the master key using Argon2id.
///
/// Deterministic: the same master key, salt and params always produce the
/// same key, which is what makes later decryption possible. The master key is
/// treated as a high-entropy password.
pub fn derive_key(master: &MasterKey, salt: &[u8], params: &KdfParams) -> CryptoResult<DerivedKey> {
    if salt.len() < SALT_SIZE {
        return Err(CryptoError::KeyDerivation(format!(
            "salt must be at least {SALT_SIZE} bytes, got {}",
            salt.len()
        )));
    }

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);

    let mut key = zeroize::Zeroizing::new([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(master.as_bytes(), salt, &mut key[..])
        .map_err(|e| CryptoError::KeyDerivation(format!("Argon2id KDF failed: {e}")))?;

    Ok(DerivedKey::from_bytes(*key))
}

//! Plaintext checksums recorded at archive time and re-checked after decrypt

use sha2::{Digest, Sha256};

const PREFIX: &str = "sha256:";

/// SHA-256 of the plaintext, formatted as `sha256:<hex>`.
pub fn plaintext_checksum(data: &[u8]) -> String {
    format!("{PREFIX}{:x}", Sha256::digest(data))
}

/// Returns true if `data` hashes to `expected`.
///
/// Unknown checksum formats never verify.
pub fn verify_checksum(data: &[u8], expected: &str) -> bool {
    if !expected.starts_with(PREFIX) {
        return false;
    }
    plaintext_checksum(data) == expected
}

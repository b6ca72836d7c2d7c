use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Malformed KDF input (wrong-length master key, short salt, bad params)
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// AEAD tag verification failed: corruption, tampering, or wrong key
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// Envelope could not be parsed or names an unknown cipher suite
    #[error("envelope format error: {0}")]
    Format(String),

    #[error("encryption failed: {0}")]
    Encryption(String),
}

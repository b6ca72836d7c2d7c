//! sarc-crypto: encryption for closed-session archives
//!
//! Key hierarchy:
//! ```text
//! Master Key (256-bit, loaded once at startup, never persisted by sarc)
//!   └── Archive Key (per-archive, Argon2id(master, salt), never persisted)
//!       └── Envelope AEAD: AES-256-GCM (default) or XChaCha20-Poly1305,
//!           random nonce per encryption, AAD = envelope header
//! ```
//!
//! Salts and KDF parameters are stored in plaintext next to the archive
//! metadata; re-deriving the archive key requires the master key.

pub mod checksum;
pub mod codec;
pub mod envelope;
pub mod error;
pub mod kdf;

pub use checksum::{plaintext_checksum, verify_checksum};
pub use codec::{decrypt, encrypt, encrypt_with};
pub use envelope::{CipherSuite, EncryptedEnvelope};
pub use error::{CryptoError, CryptoResult};
pub use kdf::{derive_key, ArchiveSalt, DerivedKey, KdfParams, MasterKey};

/// Size of master and derived keys in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of a freshly generated archive salt
pub const SALT_SIZE: usize = 16;

/// Size of the AEAD authentication tag (both suites)
pub const TAG_SIZE: usize = 16;

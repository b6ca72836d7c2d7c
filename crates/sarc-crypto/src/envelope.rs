//! Self-describing encrypted envelope
//!
//! Binary layout:
//! ```text
//! [4 bytes: magic "SARC"][1 byte: format version][1 byte: cipher suite id]
//! [nonce: 12 bytes (AES-256-GCM) | 24 bytes (XChaCha20-Poly1305)]
//! [16 bytes: AEAD tag][N bytes: ciphertext]
//! AAD = the 6 header bytes
//! ```
//!
//! The header is authenticated, so rewriting the suite id or version on a
//! stored object is detected like any other tampering.

use crate::error::{CryptoError, CryptoResult};
use crate::TAG_SIZE;

pub const MAGIC: &[u8; 4] = b"SARC";
pub const FORMAT_VERSION: u8 = 1;
pub const HEADER_SIZE: usize = 6;

pub const AES_GCM_NONCE_SIZE: usize = 12;
pub const XCHACHA_NONCE_SIZE: usize = 24;

/// Cipher suites an envelope may be sealed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherSuite {
    Aes256Gcm,
    XChaCha20Poly1305,
}

impl CipherSuite {
    pub fn id(self) -> u8 {
        match self {
            CipherSuite::Aes256Gcm => 1,
            CipherSuite::XChaCha20Poly1305 => 2,
        }
    }

    pub fn from_id(id: u8) -> CryptoResult<Self> {
        match id {
            1 => Ok(CipherSuite::Aes256Gcm),
            2 => Ok(CipherSuite::XChaCha20Poly1305),
            other => Err(CryptoError::Format(format!(
                "unrecognized cipher suite id {other}"
            ))),
        }
    }

    pub fn nonce_size(self) -> usize {
        match self {
            CipherSuite::Aes256Gcm => AES_GCM_NONCE_SIZE,
            CipherSuite::XChaCha20Poly1305 => XCHACHA_NONCE_SIZE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CipherSuite::Aes256Gcm => "aes-256-gcm",
            CipherSuite::XChaCha20Poly1305 => "xchacha20-poly1305",
        }
    }

    /// Header bytes for this suite; also the AAD.
    pub fn header(self) -> [u8; HEADER_SIZE] {
        [MAGIC[0], MAGIC[1], MAGIC[2], MAGIC[3], FORMAT_VERSION, self.id()]
    }
}

/// One encrypted archive payload, keyed by cipher suite.
#[derive(Clone, PartialEq, Eq)]
pub enum EncryptedEnvelope {
    Aes256Gcm {
        nonce: [u8; AES_GCM_NONCE_SIZE],
        tag: [u8; TAG_SIZE],
        ciphertext: Vec<u8>,
    },
    XChaCha20Poly1305 {
        nonce: [u8; XCHACHA_NONCE_SIZE],
        tag: [u8; TAG_SIZE],
        ciphertext: Vec<u8>,
    },
}

impl EncryptedEnvelope {
    pub fn suite(&self) -> CipherSuite {
        match self {
            EncryptedEnvelope::Aes256Gcm { .. } => CipherSuite::Aes256Gcm,
            EncryptedEnvelope::XChaCha20Poly1305 { .. } => CipherSuite::XChaCha20Poly1305,
        }
    }

    pub fn nonce(&self) -> &[u8] {
        match self {
            EncryptedEnvelope::Aes256Gcm { nonce, .. } => nonce.as_slice(),
            EncryptedEnvelope::XChaCha20Poly1305 { nonce, .. } => nonce.as_slice(),
        }
    }

    pub fn tag(&self) -> &[u8; TAG_SIZE] {
        match self {
            EncryptedEnvelope::Aes256Gcm { tag, .. }
            | EncryptedEnvelope::XChaCha20Poly1305 { tag, .. } => tag,
        }
    }

    pub fn ciphertext(&self) -> &[u8] {
        match self {
            EncryptedEnvelope::Aes256Gcm { ciphertext, .. }
            | EncryptedEnvelope::XChaCha20Poly1305 { ciphertext, .. } => ciphertext,
        }
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.nonce().len() + TAG_SIZE + self.ciphertext().len()
    }

    /// Serialize to the binary storage format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.suite().header());
        out.extend_from_slice(self.nonce());
        out.extend_from_slice(self.tag());
        out.extend_from_slice(self.ciphertext());
        out
    }

    /// Parse the binary storage format.
    ///
    /// Only structure is checked here; authenticity is established by
    /// [`crate::decrypt`].
    pub fn from_bytes(data: &[u8]) -> CryptoResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(CryptoError::Format(format!(
                "envelope too short: {} bytes",
                data.len()
            )));
        }
        if &data[..4] != MAGIC {
            return Err(CryptoError::Format("bad envelope magic".into()));
        }
        if data[4] != FORMAT_VERSION {
            return Err(CryptoError::Format(format!(
                "unsupported envelope version {}",
                data[4]
            )));
        }
        let suite = CipherSuite::from_id(data[5])?;

        let body = &data[HEADER_SIZE..];
        let min = suite.nonce_size() + TAG_SIZE;
        if body.len() < min {
            return Err(CryptoError::Format(format!(
                "{} envelope truncated: {} body bytes (minimum {min})",
                suite.name(),
                body.len()
            )));
        }

        let (nonce_bytes, rest) = body.split_at(suite.nonce_size());
        let (tag_bytes, ciphertext) = rest.split_at(TAG_SIZE);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(tag_bytes);
        let ciphertext = ciphertext.to_vec();

        Ok(match suite {
            CipherSuite::Aes256Gcm => {
                let mut nonce = [0u8; AES_GCM_NONCE_SIZE];
                nonce.copy_from_slice(nonce_bytes);
                EncryptedEnvelope::Aes256Gcm {
                    nonce,
                    tag,
                    ciphertext,
                }
            }
            CipherSuite::XChaCha20Poly1305 => {
                let mut nonce = [0u8; XCHACHA_NONCE_SIZE];
                nonce.copy_from_slice(nonce_bytes);
                EncryptedEnvelope::XChaCha20Poly1305 {
                    nonce,
                    tag,
                    ciphertext,
                }
            }
        })
    }
}

impl std::fmt::Debug for EncryptedEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedEnvelope")
            .field("suite", &self.suite().name())
            .field("ciphertext_len", &self.ciphertext().len())
            .finish()
    }
}

//! AEAD encryption/decryption of archive payloads into envelopes
//!
//! Every call to [`encrypt`] draws a fresh random nonce. Decryption is
//! all-or-nothing: a failed tag check yields `CryptoError::Integrity` and no
//! plaintext at all.

use aes_gcm::Aes256Gcm;
use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::envelope::{CipherSuite, EncryptedEnvelope, AES_GCM_NONCE_SIZE, XCHACHA_NONCE_SIZE};
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::DerivedKey;
use crate::TAG_SIZE;

/// Encrypt with the default suite (AES-256-GCM).
pub fn encrypt(plaintext: &[u8], key: &DerivedKey) -> CryptoResult<EncryptedEnvelope> {
    encrypt_with(CipherSuite::Aes256Gcm, plaintext, key)
}

/// Encrypt `plaintext` under `key` with an explicit cipher suite.
pub fn encrypt_with(
    suite: CipherSuite,
    plaintext: &[u8],
    key: &DerivedKey,
) -> CryptoResult<EncryptedEnvelope> {
    let aad = suite.header();
    let mut buffer = plaintext.to_vec();

    match suite {
        CipherSuite::Aes256Gcm => {
            let cipher = Aes256Gcm::new(key.as_bytes().into());
            let mut nonce = [0u8; AES_GCM_NONCE_SIZE];
            rand::thread_rng().fill_bytes(&mut nonce);

            let tag = cipher
                .encrypt_in_place_detached(aes_gcm::Nonce::from_slice(&nonce), &aad, &mut buffer)
                .map_err(|e| CryptoError::Encryption(format!("aes-256-gcm: {e}")))?;

            Ok(EncryptedEnvelope::Aes256Gcm {
                nonce,
                tag: tag_array(&tag),
                ciphertext: buffer,
            })
        }
        CipherSuite::XChaCha20Poly1305 => {
            let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
            let mut nonce = [0u8; XCHACHA_NONCE_SIZE];
            rand::thread_rng().fill_bytes(&mut nonce);

            let tag = cipher
                .encrypt_in_place_detached(XNonce::from_slice(&nonce), &aad, &mut buffer)
                .map_err(|e| CryptoError::Encryption(format!("xchacha20-poly1305: {e}")))?;

            Ok(EncryptedEnvelope::XChaCha20Poly1305 {
                nonce,
                tag: tag_array(&tag),
                ciphertext: buffer,
            })
        }
    }
}

/// Decrypt and authenticate an envelope.
pub fn decrypt(envelope: &EncryptedEnvelope, key: &DerivedKey) -> CryptoResult<Vec<u8>> {
    let aad = envelope.suite().header();
    let mut buffer = envelope.ciphertext().to_vec();

    let verified = match envelope {
        EncryptedEnvelope::Aes256Gcm { nonce, tag, .. } => {
            let cipher = Aes256Gcm::new(key.as_bytes().into());
            cipher.decrypt_in_place_detached(
                aes_gcm::Nonce::from_slice(nonce),
                &aad,
                &mut buffer,
                aes_gcm::Tag::from_slice(tag),
            )
        }
        EncryptedEnvelope::XChaCha20Poly1305 { nonce, tag, .. } => {
            let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
            cipher.decrypt_in_place_detached(
                XNonce::from_slice(nonce),
                &aad,
                &mut buffer,
                chacha20poly1305::Tag::from_slice(tag),
            )
        }
    };

    verified.map_err(|_| {
        CryptoError::Integrity(format!(
            "{} tag verification failed: wrong key, corrupted or tampered data",
            envelope.suite().name()
        ))
    })?;

    Ok(buffer)
}

fn tag_array(tag: &[u8]) -> [u8; TAG_SIZE] {
    let mut out = [0u8; TAG_SIZE];
    out.copy_from_slice(tag);
    out
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::KEY_SIZE;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn roundtrip_any_payload(data in proptest::collection::vec(any::<u8>(), 0..4096), k in any::<[u8; KEY_SIZE]>()) {
            let key = DerivedKey::from_bytes(k);
            let envelope = encrypt(&data, &key).unwrap();
            let parsed = EncryptedEnvelope::from_bytes(&envelope.to_bytes()).unwrap();
            prop_assert_eq!(decrypt(&parsed, &key).unwrap(), data);
        }
    }
}

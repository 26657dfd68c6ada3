//! Authenticated Encryption with Associated Data
//!
//! Uses AES-256-GCM. Key size: 32 bytes. Nonce: 12 bytes (random, fresh per
//! call). Tag: 16 bytes.
//!
//! Ciphertext wire format:
//!   base64( nonce (12 bytes) | ciphertext + tag )

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::rngs::OsRng;
use rand_core::RngCore;

use crate::crypto::keys::SymmetricKey;
use crate::error::{ChannelError, Result};
use crate::utils::b64;

/// Protocol constant: nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Encrypt `plaintext` under `key`, returning the base64 blob.
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<String> {
    encrypt_with_aad(key, plaintext, b"")
}

/// Decrypt a base64 blob produced by [`encrypt`].
pub fn decrypt(key: &SymmetricKey, blob: &str) -> Result<Vec<u8>> {
    decrypt_with_aad(key, blob, b"")
}

/// Encrypt and bind `aad` (authenticated, not encrypted, not transmitted).
pub fn encrypt_with_aad(key: &SymmetricKey, plaintext: &[u8], aad: &[u8]) -> Result<String> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| ChannelError::EncryptionFailed)?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
        .map_err(|_| ChannelError::EncryptionFailed)?;

    // Prepend nonce
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(b64::encode(&out))
}

/// Decrypt a blob produced by [`encrypt_with_aad`] with the same `aad`.
///
/// Every failure (bad base64, short blob, tag mismatch) maps to the same
/// [`ChannelError::DecryptionFailed`].
pub fn decrypt_with_aad(key: &SymmetricKey, blob: &str, aad: &[u8]) -> Result<Vec<u8>> {
    let data = b64::decode(blob).map_err(|_| ChannelError::DecryptionFailed)?;
    if data.len() <= NONCE_LEN {
        return Err(ChannelError::DecryptionFailed);
    }
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| ChannelError::DecryptionFailed)?;

    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| ChannelError::DecryptionFailed)
}

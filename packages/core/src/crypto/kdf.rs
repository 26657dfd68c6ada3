//! HKDF-SHA256 key derivation
//!
//! `derive_handshake_key`: whitens the raw DH secret into the epoch-0 key.
//! `derive_rotation_key`: derives the successor of a session key.

use crate::crypto::keys::{SymmetricKey, KEY_LEN};
use crate::error::Result;
use hkdf::Hkdf;
use sha2::{Digest, Sha256};

/// HKDF info label for the initial session key. Part of the wire protocol.
pub const HANDSHAKE_INFO: &[u8] = b"handshake data";

/// HKDF info label for key rotation. Part of the wire protocol.
pub const ROTATION_INFO: &[u8] = b"key-rotation";

/// Expand `ikm` into a 32-byte key. `salt = None` is the empty salt.
pub fn hkdf_sha256(ikm: &[u8], salt: Option<&[u8]>, info: &[u8]) -> Result<SymmetricKey> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = [0u8; KEY_LEN];
    hk.expand(info, &mut okm)?;
    Ok(SymmetricKey::from_bytes(okm))
}

/// Epoch-0 key from the big-endian bytes of the raw DH secret.
pub fn derive_handshake_key(raw_secret: &[u8]) -> Result<SymmetricKey> {
    hkdf_sha256(raw_secret, None, HANDSHAKE_INFO)
}

/// Successor of `current` under the given salt.
pub fn derive_rotation_key(current: &SymmetricKey, salt: &[u8]) -> Result<SymmetricKey> {
    hkdf_sha256(current.as_bytes(), Some(salt), ROTATION_INFO)
}

/// Salt bound to a rotation epoch, reproducible by both peers.
pub fn epoch_salt(epoch: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(ROTATION_INFO);
    hasher.update(epoch.to_be_bytes());
    let mut salt = [0u8; 32];
    salt.copy_from_slice(&hasher.finalize());
    salt
}

//! DH shared secret -> session key
//!
//! ```text
//! z   = peer_public ^ my_private mod p
//! key = HKDF-SHA256(salt = empty, ikm = be_bytes(z), info = "handshake data")
//! ```
//!
//! The raw `z` is never used as a cipher key: its distribution is not uniform
//! and its byte length varies.

use crate::crypto::dh::KeyPair;
use crate::crypto::kdf::derive_handshake_key;
use crate::crypto::keys::SymmetricKey;
use crate::crypto::modular::mod_pow_ladder;
use crate::error::{ChannelError, Result};
use num_bigint::BigUint;
use num_traits::{One, Zero};
use zeroize::Zeroizing;

/// Derive the epoch-0 session key shared with the owner of `peer_public`.
///
/// Rejects peer values outside `[2, p - 2]` and degenerate secrets
/// (`0`, `1`, `p - 1`) that indicate a small-subgroup or confinement attack.
pub fn derive_shared_secret(local: &KeyPair, peer_public: &BigUint) -> Result<SymmetricKey> {
    use tracing::{debug, warn};

    let modulus = local.params().modulus();
    let p_minus_one = modulus - 1u32;

    if *peer_public < BigUint::from(2u32) || *peer_public >= p_minus_one {
        warn!(target: "crypto::dh", "Rejected peer public value outside [2, p-2]");
        return Err(ChannelError::KeyAgreementError(
            "peer public value out of range".to_string(),
        ));
    }

    let z = mod_pow_ladder(peer_public, local.private_exponent(), modulus)
        .ok_or_else(|| ChannelError::KeyAgreementError("modulus is zero".to_string()))?;

    if z.is_zero() || z.is_one() || z == p_minus_one {
        warn!(target: "crypto::dh", "Rejected degenerate DH output");
        return Err(ChannelError::KeyAgreementError(
            "degenerate shared secret".to_string(),
        ));
    }

    let raw = Zeroizing::new(z.to_bytes_be());
    let key = derive_handshake_key(&raw)?;

    debug!(target: "crypto::dh", secret_len = raw.len(), "Shared secret derived");
    Ok(key)
}

//! Diffie-Hellman domain parameters and key pairs.
//!
//! Parameters arrive from the parameter source as `{p_hex, g_hex}` and are
//! shared by every peer of one local user. A [`KeyPair`] is generated once per
//! local identity; only its public value ever leaves the process.

use crate::config::Config;
use crate::crypto::modular::mod_pow_ladder;
use crate::crypto::primality::is_safe_prime;
use crate::error::{ChannelError, Result};
use crate::protocol::wire::{
    decode_hex_uint, encode_hex_uint, pack_public_value, ParametersWire, PrivateValueWire,
};
use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::fmt;

/// Prime modulus and generator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhParameters {
    modulus: BigUint,
    generator: BigUint,
}

impl DhParameters {
    /// Build parameters, checking only the structural invariant `generator < modulus`.
    pub fn new(modulus: BigUint, generator: BigUint) -> Result<Self> {
        if generator >= modulus {
            return Err(ChannelError::InvalidParameters(
                "generator must be smaller than modulus".to_string(),
            ));
        }
        Ok(Self { modulus, generator })
    }

    pub fn from_wire(wire: &ParametersWire) -> Result<Self> {
        let modulus = decode_hex_uint(&wire.p_hex).ok_or_else(|| {
            ChannelError::InvalidParameters("p_hex is not valid hexadecimal".to_string())
        })?;
        let generator = decode_hex_uint(&wire.g_hex).ok_or_else(|| {
            ChannelError::InvalidParameters("g_hex is not valid hexadecimal".to_string())
        })?;
        Self::new(modulus, generator)
    }

    pub fn to_wire(&self) -> ParametersWire {
        ParametersWire {
            p_hex: encode_hex_uint(&self.modulus),
            g_hex: encode_hex_uint(&self.generator),
        }
    }

    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    pub fn generator(&self) -> &BigUint {
        &self.generator
    }

    /// Full validation of parameters received from an untrusted source.
    ///
    /// Checks: odd modulus of at least `min_modulus_bits`,
    /// `2 <= generator <= modulus - 2`, and (optionally) that the modulus is a
    /// safe prime.
    pub fn validate(&self, config: &Config) -> Result<()> {
        use tracing::debug;

        let bits = self.modulus.bits();
        if bits < config.min_modulus_bits {
            return Err(ChannelError::InvalidParameters(format!(
                "modulus is {} bits, at least {} required",
                bits, config.min_modulus_bits
            )));
        }
        if self.modulus < BigUint::from(5u32) || !self.modulus.bit(0) {
            return Err(ChannelError::InvalidParameters(
                "modulus must be an odd prime".to_string(),
            ));
        }
        let upper = &self.modulus - 2u32;
        if self.generator < BigUint::from(2u32) || self.generator > upper {
            return Err(ChannelError::InvalidParameters(
                "generator must lie in [2, modulus - 2]".to_string(),
            ));
        }
        if config.verify_safe_prime && !is_safe_prime(&self.modulus, config.primality_rounds) {
            return Err(ChannelError::InvalidParameters(
                "modulus is not a safe prime".to_string(),
            ));
        }

        debug!(target: "crypto::dh", modulus_bits = bits, "DH parameters validated");
        Ok(())
    }
}

/// Local DH key pair
#[derive(Clone)]
pub struct KeyPair {
    private_exponent: BigUint,
    public_value: BigUint,
    params: DhParameters,
}

impl KeyPair {
    /// Draw a private exponent uniformly from `[1, modulus - 2]`.
    pub fn generate(params: &DhParameters) -> Result<Self> {
        if params.modulus < BigUint::from(3u32) {
            return Err(ChannelError::InvalidParameters(
                "modulus must be at least 3".to_string(),
            ));
        }
        // gen_biguint_range has an exclusive upper bound
        let upper = &params.modulus - 1u32;
        let private_exponent = OsRng.gen_biguint_range(&BigUint::one(), &upper);
        Self::from_private(private_exponent, params.clone())
    }

    fn from_private(private_exponent: BigUint, params: DhParameters) -> Result<Self> {
        let public_value = mod_pow_ladder(&params.generator, &private_exponent, &params.modulus)
            .ok_or_else(|| ChannelError::InvalidParameters("modulus is zero".to_string()))?;
        Ok(Self {
            private_exponent,
            public_value,
            params,
        })
    }

    pub fn public_value(&self) -> &BigUint {
        &self.public_value
    }

    pub fn params(&self) -> &DhParameters {
        &self.params
    }

    pub(crate) fn private_exponent(&self) -> &BigUint {
        &self.private_exponent
    }

    /// `{"y_hex": ...}`: the only form in which the key pair leaves the process.
    pub fn serialize_public_value(&self) -> Result<String> {
        pack_public_value(&self.public_value)
    }

    /// Hex SHA-256 of the public value, for out-of-band comparison.
    pub fn fingerprint(&self) -> String {
        public_fingerprint(&self.public_value)
    }

    /// `{"x_hex": ...}` for local persistence. Never send this anywhere.
    pub fn export_private(&self) -> Result<String> {
        let wire = PrivateValueWire {
            x_hex: encode_hex_uint(&self.private_exponent),
        };
        serde_json::to_string(&wire).map_err(ChannelError::from)
    }

    /// Restore a key pair persisted with [`KeyPair::export_private`].
    pub fn import_private(serialized: &str, params: &DhParameters) -> Result<Self> {
        let wire: PrivateValueWire = serde_json::from_str(serialized)
            .map_err(|e| ChannelError::MalformedKey(format!("missing x_hex: {}", e)))?;
        let x = decode_hex_uint(&wire.x_hex).ok_or_else(|| {
            ChannelError::MalformedKey("x_hex is not valid hexadecimal".to_string())
        })?;
        if params.modulus < BigUint::from(3u32) {
            return Err(ChannelError::InvalidParameters(
                "modulus must be at least 3".to_string(),
            ));
        }
        let upper = &params.modulus - 2u32;
        if x < BigUint::one() || x > upper {
            return Err(ChannelError::MalformedKey(
                "private exponent outside [1, modulus - 2]".to_string(),
            ));
        }
        Self::from_private(x, params.clone())
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        // BigUint keeps its digits private: the exponent is reset, not wiped
        self.private_exponent.set_zero();
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_value", &encode_hex_uint(&self.public_value))
            .field("private_exponent", &"<redacted>")
            .finish()
    }
}

/// Parse a peer's `{"y_hex": ...}`. The parameters are not consulted here;
/// range checks happen at key agreement.
pub fn deserialize_public_value(serialized: &str, _params: &DhParameters) -> Result<BigUint> {
    crate::protocol::wire::parse_public_value(serialized)
}

/// Hex SHA-256 over the big-endian bytes of a public value.
pub fn public_fingerprint(public_value: &BigUint) -> String {
    let digest = Sha256::digest(public_value.to_bytes_be());
    hex::encode(digest)
}

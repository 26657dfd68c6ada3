//! Modular exponentiation over big unsigned integers.
//!
//! Two variants are provided:
//! - [`mod_pow`]: classic right-to-left square-and-multiply.
//! - [`mod_pow_ladder`]: Montgomery ladder. Performs one multiplication and one
//!   squaring for every exponent bit regardless of its value, so the sequence
//!   of operations does not depend on the secret exponent. `BigUint` arithmetic
//!   itself is not constant-time, so this narrows the timing side channel
//!   rather than closing it.
//!
//! DH code paths that touch a private exponent use the ladder.

use num_bigint::BigUint;
use num_traits::{One, Zero};

/// `base^exponent mod modulus` via square-and-multiply.
///
/// `exponent == 0` yields 1 (reduced, so 0 when `modulus == 1`);
/// `base >= modulus` is reduced first. Returns `None` for a zero modulus.
pub fn mod_pow(base: &BigUint, exponent: &BigUint, modulus: &BigUint) -> Option<BigUint> {
    if modulus.is_zero() {
        return None;
    }
    if modulus.is_one() {
        return Some(BigUint::zero());
    }

    let mut result = BigUint::one();
    let mut base = base % modulus;

    let bits = exponent.bits();
    for i in 0..bits {
        if exponent.bit(i) {
            result = (&result * &base) % modulus;
        }
        if i + 1 < bits {
            base = (&base * &base) % modulus;
        }
    }

    Some(result)
}

/// `base^exponent mod modulus` via the Montgomery ladder.
///
/// Same contract as [`mod_pow`].
pub fn mod_pow_ladder(base: &BigUint, exponent: &BigUint, modulus: &BigUint) -> Option<BigUint> {
    if modulus.is_zero() {
        return None;
    }
    if modulus.is_one() {
        return Some(BigUint::zero());
    }

    // Invariant: r1 == r0 * base (mod modulus)
    let mut r0 = BigUint::one();
    let mut r1 = base % modulus;

    for i in (0..exponent.bits()).rev() {
        if exponent.bit(i) {
            r0 = (&r0 * &r1) % modulus;
            r1 = (&r1 * &r1) % modulus;
        } else {
            r1 = (&r0 * &r1) % modulus;
            r0 = (&r0 * &r0) % modulus;
        }
    }

    Some(r0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big(hex: &str) -> BigUint {
        BigUint::parse_bytes(hex.as_bytes(), 16).unwrap()
    }

    const P256: &str = "c998ff967972196995c8de6284b5bf11a36ae4d26bd3767468e33bd0e61a5a7f";

    #[test]
    fn test_small_values() {
        let m = BigUint::from(497u32);
        let r = mod_pow(&BigUint::from(4u32), &BigUint::from(13u32), &m).unwrap();
        assert_eq!(r, BigUint::from(445u32));
        let r = mod_pow_ladder(&BigUint::from(4u32), &BigUint::from(13u32), &m).unwrap();
        assert_eq!(r, BigUint::from(445u32));
    }

    #[test]
    fn test_zero_exponent_returns_one() {
        let m = big(P256);
        assert_eq!(mod_pow(&BigUint::from(7u32), &BigUint::zero(), &m), Some(BigUint::one()));
        assert_eq!(
            mod_pow_ladder(&BigUint::from(7u32), &BigUint::zero(), &m),
            Some(BigUint::one())
        );
    }

    #[test]
    fn test_base_larger_than_modulus_is_reduced() {
        let m = big(P256);
        let base = &m + BigUint::from(5u32);
        assert_eq!(mod_pow(&base, &BigUint::from(3u32), &m), Some(BigUint::from(125u32)));
        assert_eq!(
            mod_pow_ladder(&base, &BigUint::from(3u32), &m),
            Some(BigUint::from(125u32))
        );
    }

    #[test]
    fn test_known_vectors_256_bit() {
        let m = big(P256);
        let expected = big("c63a8b0ff2105e8f9028a2f964716629a7ef6f4fbefc9e571d7566b770b7ed09");
        assert_eq!(mod_pow(&BigUint::from(2u32), &BigUint::from(12345u32), &m), Some(expected.clone()));
        assert_eq!(
            mod_pow_ladder(&BigUint::from(2u32), &BigUint::from(12345u32), &m),
            Some(expected)
        );

        let expected = big("82cbe4f1ac94c3674fa8703f4fa0c5a4fab4375103eda91c34212166fa112be9");
        let base = big("1234567890abcdef");
        let exp = big("fedcba987654321");
        assert_eq!(mod_pow_ladder(&base, &exp, &m), Some(expected));
    }

    #[test]
    fn test_degenerate_moduli() {
        let two = BigUint::from(2u32);
        assert_eq!(mod_pow(&two, &two, &BigUint::zero()), None);
        assert_eq!(mod_pow_ladder(&two, &two, &BigUint::zero()), None);
        assert_eq!(mod_pow(&two, &BigUint::zero(), &BigUint::one()), Some(BigUint::zero()));
    }
}

//! Probabilistic primality checks used to vet fetched DH parameters.

use crate::crypto::modular::mod_pow;
use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::rngs::OsRng;

const SMALL_PRIMES: [u32; 15] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47];

/// Miller-Rabin with `rounds` random bases.
pub fn is_probable_prime(n: &BigUint, rounds: usize) -> bool {
    let two = BigUint::from(2u32);
    if *n < two {
        return false;
    }
    for p in SMALL_PRIMES {
        let p = BigUint::from(p);
        if *n == p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }

    // n - 1 = d * 2^s
    let n_minus_one = n - 1u32;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    let mut rng = OsRng;
    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let Some(mut x) = mod_pow(&a, &d, n) else {
            return false;
        };
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = (&x * &x) % n;
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }

    true
}

/// `p` is a safe prime when both `p` and `(p - 1) / 2` are prime.
pub fn is_safe_prime(p: &BigUint, rounds: usize) -> bool {
    if *p < BigUint::from(5u32) {
        return false;
    }
    let q = (p - 1u32) >> 1;
    // Cheap test on the smaller number first
    is_probable_prime(&q, rounds) && is_probable_prime(p, rounds)
}

use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

use rand_core::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::FieldError;

/// The field modulus, the Mersenne prime 2^127 - 1.
pub const PRIME: u128 = (1u128 << 127) - 1;

const MASK127: u128 = PRIME;

/// An element of the prime field GF(2^127 - 1).
///
/// Value semantics: every operation returns a new, already-reduced
/// element. The internal representation is always in `[0, PRIME)`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldElement(u128);

impl FieldElement {
    pub fn zero() -> Self {
        FieldElement(0)
    }

    pub fn one() -> Self {
        FieldElement(1)
    }

    /// Embeds a signed integer into the field, wrapping negative values
    /// around the modulus the way the reference implementation's
    /// `FieldElement(-2)` constant does.
    pub fn from_i64(v: i64) -> Self {
        if v >= 0 {
            FieldElement(reduce_u128(v as u128))
        } else {
            let magnitude = reduce_u128((-v) as u128);
            FieldElement(PRIME - magnitude)
        }
    }

    pub fn from_u64(v: u64) -> Self {
        FieldElement(v as u128)
    }

    pub fn to_u128(self) -> u128 {
        self.0
    }

    /// Samples a uniform element, including zero.
    pub fn random<R: RngCore>(rng: &mut R) -> Self {
        loop {
            let hi = rng.next_u64() as u128;
            let lo = rng.next_u64() as u128;
            let candidate = (hi << 64) | lo;
            // Reject the tiny slice of 128-bit space above 2*PRIME to keep
            // the distribution uniform rather than biased low.
            if candidate < PRIME.wrapping_mul(2) {
                return FieldElement(candidate % PRIME);
            }
        }
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Multiplicative inverse via Fermat's little theorem: a^(p-2) mod p.
    pub fn inverse(self) -> Result<Self, FieldError> {
        if self.is_zero() {
            return Err(FieldError::NotInvertible);
        }
        Ok(self.pow(PRIME - 2))
    }

    fn pow(self, mut exponent: u128) -> Self {
        let mut base = self;
        let mut acc = FieldElement::one();
        while exponent > 0 {
            if exponent & 1 == 1 {
                acc = acc * base;
            }
            base = base * base;
            exponent >>= 1;
        }
        acc
    }
}

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldElement({})", self.0)
    }
}

impl Add for FieldElement {
    type Output = FieldElement;
    fn add(self, rhs: FieldElement) -> FieldElement {
        let sum = self.0 + rhs.0;
        FieldElement(if sum >= PRIME { sum - PRIME } else { sum })
    }
}

impl Sub for FieldElement {
    type Output = FieldElement;
    fn sub(self, rhs: FieldElement) -> FieldElement {
        if self.0 >= rhs.0 {
            FieldElement(self.0 - rhs.0)
        } else {
            FieldElement(PRIME - (rhs.0 - self.0))
        }
    }
}

impl Neg for FieldElement {
    type Output = FieldElement;
    fn neg(self) -> FieldElement {
        FieldElement::zero() - self
    }
}

impl Mul for FieldElement {
    type Output = FieldElement;
    fn mul(self, rhs: FieldElement) -> FieldElement {
        FieldElement(mulmod(self.0, rhs.0))
    }
}

/// Reduces an arbitrary `u128` into `[0, PRIME)`. Used for values that
/// may exceed the modulus but fit in 128 bits (e.g. small integer
/// literals never need this, but `from_i64`'s magnitude path does when
/// given values near `u128`'s range).
fn reduce_u128(v: u128) -> u128 {
    if v < PRIME {
        v
    } else {
        v % PRIME
    }
}

/// Multiplies two field elements (each `< PRIME < 2^127`) and reduces
/// the 254-bit product mod `PRIME` using the Mersenne identity
/// `2^127 ≡ 1 (mod PRIME)`, without a bignum dependency.
fn mulmod(a: u128, b: u128) -> u128 {
    let a_lo = a & u64::MAX as u128;
    let a_hi = a >> 64;
    let b_lo = b & u64::MAX as u128;
    let b_hi = b >> 64;

    let ll = a_lo * b_lo;
    let lh = a_lo * b_hi;
    let hl = a_hi * b_lo;
    let hh = a_hi * b_hi;

    let mid = lh + hl;
    let mid_low_part = (mid & u64::MAX as u128) << 64;
    let (lo, carry) = ll.overflowing_add(mid_low_part);
    let hi = hh + (mid >> 64) + carry as u128;

    // total = hi * 2^128 + lo; fold both 2^128 = 2 * 2^127 and the top
    // bit of `lo` (its own factor of 2^127) down using 2^127 ≡ 1.
    let lo_high = lo >> 127;
    let lo_low = lo & MASK127;
    let mut acc = (hi << 1) + lo_high + lo_low;

    if acc >> 127 != 0 {
        let carry = acc >> 127;
        acc = (acc & MASK127) + carry;
    }
    while acc >= PRIME {
        acc -= PRIME;
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn add_sub_roundtrip() {
        let a = FieldElement::from_u64(12345);
        let b = FieldElement::from_u64(9999);
        assert_eq!((a + b) - b, a);
    }

    #[test]
    fn negative_embedding() {
        let neg_two = FieldElement::from_i64(-2);
        assert_eq!(neg_two + FieldElement::from_u64(2), FieldElement::zero());
    }

    #[test]
    fn inverse_is_multiplicative_identity() {
        let a = FieldElement::from_u64(424242);
        let inv = a.inverse().unwrap();
        assert_eq!(a * inv, FieldElement::one());
    }

    #[test]
    fn zero_has_no_inverse() {
        assert!(FieldElement::zero().inverse().is_err());
    }

    #[test]
    fn mul_matches_naive_u128_mod_for_small_values() {
        let a = FieldElement::from_u64(7);
        let b = FieldElement::from_u64(6);
        assert_eq!(a * b, FieldElement::from_u64(42));
    }

    #[test]
    fn mul_near_modulus_boundary_is_consistent_with_inverse() {
        let a = FieldElement(PRIME - 1);
        let b = FieldElement(PRIME - 1);
        // (p-1)*(p-1) mod p == 1
        assert_eq!(a * b, FieldElement::one());
    }

    #[test]
    fn random_is_deterministic_under_fixed_seed() {
        let mut r1 = ChaCha20Rng::seed_from_u64(7);
        let mut r2 = ChaCha20Rng::seed_from_u64(7);
        assert_eq!(FieldElement::random(&mut r1), FieldElement::random(&mut r2));
    }
}

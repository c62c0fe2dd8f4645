use std::cmp::Ordering;
use std::fmt;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// A point on the identifier ring.
///
/// An `Id` is an unsigned integer in `[0, 2^m)` for some bit width `m`.
/// Values are reduced modulo `2^m` by the [`IdSpace`] that produced them;
/// the `Id` itself carries no width so that ids from the same space compare
/// cheaply.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Id(BigUint);

impl Id {
    /// Tests if self lies on the open arc `(a, b)`, walking clockwise.
    ///
    /// When `a == b` the arc covers the full ring except `a` itself.
    pub fn in_open(&self, a: &Id, b: &Id) -> bool {
        match a.cmp(b) {
            Ordering::Less => self > a && self < b,
            Ordering::Greater => self > a || self < b,
            Ordering::Equal => self != a,
        }
    }

    /// Tests if self lies on the half-open arc `(a, b]`, walking clockwise.
    ///
    /// When `a == b` the arc is the full ring, which makes the sole node of
    /// a one-node ring the owner of every key, its own id included.
    pub fn in_half_open(&self, a: &Id, b: &Id) -> bool {
        match a.cmp(b) {
            Ordering::Less => self > a && self <= b,
            Ordering::Greater => self > a || self <= b,
            Ordering::Equal => true,
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The identifier space: all ring arithmetic is modulo `2^bits`.
#[derive(Clone, Copy, Debug)]
pub struct IdSpace {
    bits: u32,
}

impl IdSpace {
    /// Creates the space of `bits`-wide identifiers.
    pub fn new(bits: u32) -> Self {
        IdSpace { bits }
    }

    /// The bit width `m` of this space.
    pub fn bits(&self) -> u32 {
        self.bits
    }

    fn modulus(&self) -> BigUint {
        BigUint::from(1u8) << self.bits
    }

    /// Hashes arbitrary bytes onto the ring: SHA-1, taken to `m` bits.
    pub fn hash(&self, bytes: &[u8]) -> Id {
        let mut hasher = Sha1::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        Id(BigUint::from_bytes_be(&digest) % self.modulus())
    }

    /// An explicit id, reduced into the space.
    pub fn id(&self, value: u64) -> Id {
        Id(BigUint::from(value) % self.modulus())
    }

    /// Reduces a foreign id into this space.
    pub fn reduce(&self, id: Id) -> Id {
        Id(id.0 % self.modulus())
    }

    /// The start of finger `index`: `(id + 2^index) mod 2^m`.
    pub fn finger_start(&self, id: &Id, index: u32) -> Id {
        Id((&id.0 + (BigUint::from(1u8) << index)) % self.modulus())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> IdSpace {
        IdSpace::new(8)
    }

    #[test]
    fn open_interval_plain_and_wrapping() {
        let s = space();
        assert!(s.id(50).in_open(&s.id(10), &s.id(60)));
        assert!(!s.id(10).in_open(&s.id(10), &s.id(60)));
        assert!(!s.id(60).in_open(&s.id(10), &s.id(60)));
        // wrapping arc (200, 60)
        assert!(s.id(250).in_open(&s.id(200), &s.id(60)));
        assert!(s.id(5).in_open(&s.id(200), &s.id(60)));
        assert!(!s.id(100).in_open(&s.id(200), &s.id(60)));
    }

    #[test]
    fn half_open_includes_upper_bound() {
        let s = space();
        assert!(s.id(60).in_half_open(&s.id(10), &s.id(60)));
        assert!(!s.id(10).in_half_open(&s.id(10), &s.id(60)));
        assert!(s.id(10).in_half_open(&s.id(200), &s.id(60)));
    }

    #[test]
    fn degenerate_interval_is_full_ring() {
        let s = space();
        let a = s.id(42);
        // (a, a] is everything, including a itself
        assert!(s.id(42).in_half_open(&a, &a));
        assert!(s.id(0).in_half_open(&a, &a));
        assert!(s.id(255).in_half_open(&a, &a));
        // (a, a) is everything but a
        assert!(!s.id(42).in_open(&a, &a));
        assert!(s.id(43).in_open(&a, &a));
    }

    #[test]
    fn hash_is_deterministic_and_in_range() {
        let s = space();
        let a = s.hash(b"127.0.0.1:4000");
        let b = s.hash(b"127.0.0.1:4000");
        assert_eq!(a, b);
        assert!(a <= s.id(255));
        assert_ne!(s.hash(b"x"), s.hash(b"y"));
    }

    #[test]
    fn finger_start_wraps() {
        let s = space();
        assert_eq!(s.finger_start(&s.id(10), 0), s.id(11));
        assert_eq!(s.finger_start(&s.id(10), 7), s.id(138));
        assert_eq!(s.finger_start(&s.id(200), 7), s.id(72));
    }
}

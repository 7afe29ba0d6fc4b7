//! two-to-one compression functions for tree nodes
//!
//! `MimcSponge` is the MiMC-Feistel sponge over the bn254 scalar field with
//! 220 rounds, x^5 and key 0, the same construction privacy pools use on chain
//! for their deposit trees. Round constants come from iterating keccak256 over
//! the seed `"mimcsponge"`.

use crate::field::{modulus, FieldElement};
use num_bigint::BigUint;
use num_traits::Zero;
use sha2::{Digest, Sha256};
use sha3::Keccak256;
use std::sync::OnceLock;

/// number of feistel rounds
pub const MIMC_ROUNDS: usize = 220;

/// keccak seed for round constants
pub const MIMC_SEED: &[u8] = b"mimcsponge";

pub trait TreeHasher: Send + Sync {
    fn hash(&self, left: &FieldElement, right: &FieldElement) -> FieldElement;
}

impl<T: TreeHasher + ?Sized> TreeHasher for &T {
    fn hash(&self, left: &FieldElement, right: &FieldElement) -> FieldElement {
        (**self).hash(left, right)
    }
}

impl<T: TreeHasher + ?Sized> TreeHasher for std::sync::Arc<T> {
    fn hash(&self, left: &FieldElement, right: &FieldElement) -> FieldElement {
        (**self).hash(left, right)
    }
}

fn mimc_constants() -> &'static [BigUint] {
    static CONSTANTS: OnceLock<Vec<BigUint>> = OnceLock::new();
    CONSTANTS.get_or_init(|| {
        let p = modulus();
        let mut constants = vec![BigUint::zero(); MIMC_ROUNDS];
        let mut digest: [u8; 32] = Keccak256::digest(MIMC_SEED).into();
        for constant in constants.iter_mut().take(MIMC_ROUNDS).skip(1) {
            digest = Keccak256::digest(digest).into();
            *constant = BigUint::from_bytes_be(&digest) % p;
        }
        // first and last rounds run without a constant
        constants[MIMC_ROUNDS - 1] = BigUint::zero();
        constants
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MimcSponge;

impl MimcSponge {
    pub fn new() -> Self {
        Self
    }

    fn feistel(&self, mut xl: BigUint, mut xr: BigUint) -> (BigUint, BigUint) {
        let p = modulus();
        let constants = mimc_constants();
        for (round, c) in constants.iter().enumerate() {
            let t = (&xl + c) % p;
            let t2 = &t * &t % p;
            let t4 = &t2 * &t2 % p;
            let t5 = t4 * &t % p;
            if round < MIMC_ROUNDS - 1 {
                let next = (xr + t5) % p;
                xr = std::mem::replace(&mut xl, next);
            } else {
                xr = (xr + t5) % p;
            }
        }
        (xl, xr)
    }

    /// sponge over any number of inputs, single output
    pub fn multi_hash(&self, inputs: &[FieldElement]) -> FieldElement {
        let p = modulus();
        let mut r = BigUint::zero();
        let mut c = BigUint::zero();
        for input in inputs {
            r = (r + input.reduced()) % p;
            let (xl, xr) = self.feistel(r, c);
            r = xl;
            c = xr;
        }
        FieldElement::from_reduced(r)
    }
}

impl TreeHasher for MimcSponge {
    fn hash(&self, left: &FieldElement, right: &FieldElement) -> FieldElement {
        self.multi_hash(&[left.clone(), right.clone()])
    }
}

/// sha256(be32(left) || be32(right)) reduced into the field
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl TreeHasher for Sha256Hasher {
    fn hash(&self, left: &FieldElement, right: &FieldElement) -> FieldElement {
        let mut hasher = Sha256::new();
        hasher.update(left.to_be_bytes());
        hasher.update(right.to_be_bytes());
        let digest: [u8; 32] = hasher.finalize().into();
        FieldElement::from_reduced(BigUint::from_bytes_be(&digest) % modulus())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn el(s: &str) -> FieldElement {
        FieldElement::parse(s).unwrap()
    }

    #[test]
    fn test_first_round_constant() {
        assert_eq!(mimc_constants()[0], BigUint::zero());
        assert_eq!(
            mimc_constants()[1].to_string(),
            "7120861356467848435263064379192047478074060781135320967663101236819528304084"
        );
        assert_eq!(mimc_constants()[MIMC_ROUNDS - 1], BigUint::zero());
    }

    #[test]
    fn test_mimc_known_values() {
        let h = MimcSponge::new();
        assert_eq!(
            h.hash(&FieldElement::zero(), &FieldElement::zero()).to_string(),
            "20636625426020718969131298365984859231982649550971729229988535915544421356929"
        );
        assert_eq!(
            h.hash(&el("1"), &el("2")).to_string(),
            "19814528709687996974327303300007262407299502847885145507292406548098437687919"
        );
    }

    #[test]
    fn test_mimc_reduces_inputs_above_modulus() {
        let h = MimcSponge::new();
        let max = FieldElement::max_value();
        let reduced = FieldElement::from_biguint(max.reduced()).unwrap();
        assert_eq!(h.hash(&max, &max), h.hash(&reduced, &reduced));
        assert_eq!(
            h.hash(&max, &max).to_string(),
            "2128323005195117366462164187182177677894770619483579302141853867226028219198"
        );
    }

    #[test]
    fn test_mimc_is_not_symmetric() {
        let h = MimcSponge::new();
        assert_ne!(h.hash(&el("1"), &el("2")), h.hash(&el("2"), &el("1")));
    }

    #[test]
    fn test_sha256_hasher_stays_in_field() {
        let h = Sha256Hasher;
        let out = h.hash(&FieldElement::max_value(), &FieldElement::zero());
        assert!(out.as_biguint() < modulus());
    }
}

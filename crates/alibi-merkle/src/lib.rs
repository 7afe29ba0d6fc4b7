//! Merkle trees for proof-of-innocence inputs
//!
//! - `MerkleTree`: fixed-depth, append-only tree with per-level zero values,
//!   the shape on-chain privacy pools use for their deposit trees
//! - `MimcSponge`: the bn254 MiMC sponge those pools hash with
//! - `exclusion`: the doubled-leaf tree over blocklisted commitments that turns
//!   a non-membership check into one merkle path

pub mod error;
pub mod exclusion;
pub mod field;
pub mod hasher;
pub mod proof;
pub mod tree;

pub use error::{Result, TreeError};
pub use exclusion::{
    bracketing_pair, build_exclusion_tree, exclusion_leaves, max_field_value, min_field_value,
    NonMembershipWitness,
};
pub use field::{modulus, FieldElement, FIELD_MODULUS};
pub use hasher::{MimcSponge, Sha256Hasher, TreeHasher};
pub use proof::MerklePath;
pub use tree::{MerkleTree, SerializedTree, MAX_LEVELS};

/// depth of the deposit trees of the eth pools
pub const DEFAULT_LEVELS: usize = 20;

/// zero leaf of the eth pools: keccak256("tornado") mod p
pub const POOL_ZERO_ELEMENT: &str =
    "21663839004416932945382355908790599225266501822907911457504978515578255421292";

//! Non-membership law for exclusion trees
//!
//! For every value outside the blocklisted set there is an even leaf index
//! bracketing it strictly; blocklisted values are never bracketed.

use alibi_merkle::{
    bracketing_pair, build_exclusion_tree, exclusion_leaves, FieldElement, NonMembershipWitness,
    Sha256Hasher,
};
use proptest::prelude::*;
use std::collections::BTreeSet;

fn sorted_set(values: &BTreeSet<u64>) -> Vec<FieldElement> {
    values.iter().map(|&v| FieldElement::from_u64(v)).collect()
}

proptest! {
    #[test]
    fn outsiders_fall_inside_an_aligned_pair(
        blocklisted in prop::collection::btree_set(1u64..10_000, 0..40),
        candidate in 1u64..10_000,
    ) {
        prop_assume!(!blocklisted.contains(&candidate));

        let leaves = exclusion_leaves(&sorted_set(&blocklisted));
        let x = FieldElement::from_u64(candidate);
        let i = bracketing_pair(&leaves, &x);

        prop_assert!(i.is_some());
        let i = i.unwrap();
        prop_assert_eq!(i % 2, 0);
        prop_assert!(leaves[i] <= x && x < leaves[i + 1]);
    }

    #[test]
    fn blocklisted_values_are_never_bracketed(
        blocklisted in prop::collection::btree_set(1u64..10_000, 1..40),
        pick in any::<prop::sample::Index>(),
    ) {
        let values: Vec<u64> = blocklisted.iter().copied().collect();
        let member = FieldElement::from_u64(values[pick.index(values.len())]);

        let leaves = exclusion_leaves(&sorted_set(&blocklisted));
        prop_assert!(bracketing_pair(&leaves, &member).is_none());
    }

    #[test]
    fn witnesses_verify_against_the_root(
        blocklisted in prop::collection::btree_set(1u64..1_000, 0..12),
        candidate in 1u64..1_000,
    ) {
        prop_assume!(!blocklisted.contains(&candidate));

        let tree = build_exclusion_tree(6, FieldElement::zero(), Sha256Hasher, sorted_set(&blocklisted)).unwrap();
        let witness = NonMembershipWitness::for_candidate(&tree, &FieldElement::from_u64(candidate))
            .unwrap()
            .expect("candidate outside blocklist");
        prop_assert!(witness.verify(&Sha256Hasher, tree.root()));
    }
}

#[test]
fn values_above_the_last_commitment_use_the_max_sentinel() {
    let leaves = exclusion_leaves(&[FieldElement::from_u64(5)]);
    let big = FieldElement::parse("0xfffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffe").unwrap();
    assert_eq!(bracketing_pair(&leaves, &big), Some(2));
}

#[test]
fn rebuilding_is_deterministic() {
    let commitments = vec![
        FieldElement::parse("0x456").unwrap(),
        FieldElement::parse("0xabc").unwrap(),
        FieldElement::parse("0x123").unwrap(),
    ];
    let mut reversed = commitments.clone();
    reversed.reverse();

    let a = build_exclusion_tree(8, FieldElement::zero(), Sha256Hasher, commitments).unwrap();
    let b = build_exclusion_tree(8, FieldElement::zero(), Sha256Hasher, reversed).unwrap();
    assert_eq!(a.serialize(), b.serialize());
    assert_eq!(a.root(), b.root());
}

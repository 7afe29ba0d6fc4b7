//! doubled-leaf exclusion trees
//!
//! For sorted blocklisted commitments `b0 < b1 < ... < bn-1` the leaves are
//!
//! ```text
//!   o      o      o           o
//!  / \    / \    / \   ...   / \
//! 0  b0  b0  b1 b1  b2     bn-1 MAX
//! ```
//!
//! Every commitment that is not blocklisted falls strictly inside exactly one
//! aligned pair, so a single path to the pair's left leaf plus an ordering
//! check against its sibling proves non-membership. A blocklisted value equals
//! a pair boundary and is never strictly inside one.

use crate::error::Result;
use crate::field::FieldElement;
use crate::hasher::TreeHasher;
use crate::proof::MerklePath;
use crate::tree::MerkleTree;
use serde::{Deserialize, Serialize};

/// upper sentinel, `2^256 - 1`
pub fn max_field_value() -> FieldElement {
    FieldElement::max_value()
}

/// lower sentinel
pub fn min_field_value() -> FieldElement {
    FieldElement::zero()
}

/// leaf sequence for commitments already sorted ascending
pub fn exclusion_leaves(sorted: &[FieldElement]) -> Vec<FieldElement> {
    let mut leaves = Vec::with_capacity(2 * sorted.len() + 2);
    leaves.push(min_field_value());
    for commitment in sorted {
        leaves.push(commitment.clone());
        leaves.push(commitment.clone());
    }
    leaves.push(max_field_value());
    leaves
}

/// build the exclusion tree; sorts its input first
pub fn build_exclusion_tree<H: TreeHasher>(
    levels: usize,
    zero_element: FieldElement,
    hasher: H,
    mut commitments: Vec<FieldElement>,
) -> Result<MerkleTree<H>> {
    commitments.sort();
    MerkleTree::with_elements(levels, exclusion_leaves(&commitments), zero_element, hasher)
}

/// even index `i` with `leaves[i] < x < leaves[i + 1]`
pub fn bracketing_pair(leaves: &[FieldElement], x: &FieldElement) -> Option<usize> {
    let pairs = leaves.len() / 2;
    // pairs are sorted by their lower bound
    let upper_bound = leaves_partition(leaves, pairs, x);
    if upper_bound == 0 {
        return None;
    }
    let i = 2 * (upper_bound - 1);
    (leaves[i] < *x && *x < leaves[i + 1]).then_some(i)
}

/// number of pairs whose lower bound is strictly below `x`
fn leaves_partition(leaves: &[FieldElement], pairs: usize, x: &FieldElement) -> usize {
    let (mut lo, mut hi) = (0usize, pairs);
    while lo < hi {
        let mid = (lo + hi) / 2;
        if leaves[2 * mid] < *x {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// evidence that `candidate` is not a leaf value of an exclusion tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonMembershipWitness {
    pub candidate: FieldElement,
    pub pair_index: usize,
    pub lower: FieldElement,
    pub upper: FieldElement,
    /// path to the lower leaf; its first sibling is `upper`
    pub path: MerklePath,
}

impl NonMembershipWitness {
    pub fn for_candidate<H: TreeHasher>(
        tree: &MerkleTree<H>,
        candidate: &FieldElement,
    ) -> Result<Option<Self>> {
        let Some(pair_index) = bracketing_pair(tree.elements(), candidate) else {
            return Ok(None);
        };
        let path = tree.path(pair_index)?;
        Ok(Some(Self {
            candidate: candidate.clone(),
            pair_index,
            lower: tree.elements()[pair_index].clone(),
            upper: tree.elements()[pair_index + 1].clone(),
            path,
        }))
    }

    pub fn verify<H: TreeHasher>(&self, hasher: &H, root: &FieldElement) -> bool {
        self.pair_index % 2 == 0
            && self.path.index == self.pair_index
            && self.path.root == *root
            && self.path.element == self.lower
            && self.path.sibling_leaf() == Some(&self.upper)
            && self.lower < self.candidate
            && self.candidate < self.upper
            && self.path.verify(hasher)
    }
}

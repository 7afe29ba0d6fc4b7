//! single-leaf merkle paths

use crate::field::FieldElement;
use crate::hasher::TreeHasher;
use serde::{Deserialize, Serialize};

/// authentication path for one leaf (0-based index)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerklePath {
    pub index: usize,
    pub element: FieldElement,
    /// sibling at each level, bottom up
    pub path_elements: Vec<FieldElement>,
    /// 0 when the running node is a left child, 1 when right
    pub path_indices: Vec<u8>,
    pub root: FieldElement,
}

impl MerklePath {
    /// fold the path and compare with the recorded root
    pub fn verify<H: TreeHasher>(&self, hasher: &H) -> bool {
        if self.path_elements.len() != self.path_indices.len() {
            return false;
        }

        let mut node = self.element.clone();
        let mut index = self.index;
        for (sibling, &bit) in self.path_elements.iter().zip(&self.path_indices) {
            if (index % 2) as u8 != bit {
                return false;
            }
            node = if bit == 0 {
                hasher.hash(&node, sibling)
            } else {
                hasher.hash(sibling, &node)
            };
            index /= 2;
        }

        node == self.root
    }

    /// leaf sitting next to this one in its pair
    pub fn sibling_leaf(&self) -> Option<&FieldElement> {
        self.path_elements.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::Sha256Hasher;
    use crate::tree::MerkleTree;

    #[test]
    fn test_tampered_path_fails() {
        let leaves = (1..=6).map(FieldElement::from_u64).collect();
        let tree = MerkleTree::with_elements(3, leaves, FieldElement::zero(), Sha256Hasher).unwrap();

        let mut path = tree.path(4).unwrap();
        assert!(path.verify(&Sha256Hasher));
        assert_eq!(path.sibling_leaf(), Some(&FieldElement::from_u64(6)));

        path.element = FieldElement::from_u64(99);
        assert!(!path.verify(&Sha256Hasher));

        let mut flipped = tree.path(4).unwrap();
        flipped.path_indices[0] = 1;
        assert!(!flipped.verify(&Sha256Hasher));
    }

    #[test]
    fn test_path_uses_zero_for_missing_sibling() {
        let leaves = (1..=3).map(FieldElement::from_u64).collect();
        let tree = MerkleTree::with_elements(2, leaves, FieldElement::from_u64(42), Sha256Hasher).unwrap();
        let path = tree.path(2).unwrap();
        assert_eq!(path.path_elements[0], FieldElement::from_u64(42));
        assert!(path.verify(&Sha256Hasher));
    }
}

//! fixed-depth incremental merkle tree
//!
//! Leaves are appended left to right. Missing nodes on the right edge take the
//! zero value of their level, `zeros[0] = zero_element` and
//! `zeros[l] = H(zeros[l-1], zeros[l-1])`, so the root only depends on the
//! leaf sequence, the hasher and the depth.

use crate::error::{Result, TreeError};
use crate::field::FieldElement;
use crate::hasher::TreeHasher;
use crate::proof::MerklePath;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// deepest tree we accept
pub const MAX_LEVELS: usize = 32;

/// layers wider than this are hashed with rayon
const PARALLEL_THRESHOLD: usize = 128;

pub struct MerkleTree<H> {
    levels: usize,
    zero_element: FieldElement,
    zeros: Vec<FieldElement>,
    /// layers[0] are the leaves, layers[levels] holds the root once non-empty
    layers: Vec<Vec<FieldElement>>,
    hasher: H,
}

/// portable form of a tree: enough for a peer to recompute the same root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedTree {
    pub levels: usize,
    pub zero_element: FieldElement,
    pub elements: Vec<FieldElement>,
}

impl<H: TreeHasher> MerkleTree<H> {
    pub fn new(levels: usize, zero_element: FieldElement, hasher: H) -> Result<Self> {
        if levels == 0 || levels > MAX_LEVELS {
            return Err(TreeError::InvalidLevels(levels));
        }

        let mut zeros = Vec::with_capacity(levels + 1);
        zeros.push(zero_element.clone());
        for level in 1..=levels {
            let below = &zeros[level - 1];
            let next = hasher.hash(below, below);
            zeros.push(next);
        }

        Ok(Self {
            levels,
            zero_element,
            zeros,
            layers: vec![Vec::new(); levels + 1],
            hasher,
        })
    }

    pub fn with_elements(
        levels: usize,
        elements: Vec<FieldElement>,
        zero_element: FieldElement,
        hasher: H,
    ) -> Result<Self> {
        let mut tree = Self::new(levels, zero_element, hasher)?;
        tree.bulk_insert(elements)?;
        Ok(tree)
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    pub fn zero_element(&self) -> &FieldElement {
        &self.zero_element
    }

    pub fn zeros(&self) -> &[FieldElement] {
        &self.zeros
    }

    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    pub fn capacity(&self) -> usize {
        1usize.checked_shl(self.levels as u32).unwrap_or(usize::MAX)
    }

    pub fn len(&self) -> usize {
        self.layers[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers[0].is_empty()
    }

    pub fn elements(&self) -> &[FieldElement] {
        &self.layers[0]
    }

    pub fn root(&self) -> &FieldElement {
        self.layers[self.levels]
            .first()
            .unwrap_or(&self.zeros[self.levels])
    }

    pub fn insert(&mut self, element: FieldElement) -> Result<()> {
        self.bulk_insert(vec![element])
    }

    /// append many leaves, rehashing only the right edge they touch
    pub fn bulk_insert(&mut self, elements: Vec<FieldElement>) -> Result<()> {
        if elements.is_empty() {
            return Ok(());
        }
        let capacity = self.capacity();
        if self.len() + elements.len() > capacity {
            return Err(TreeError::Full { capacity });
        }

        let first = self.len();
        self.layers[0].extend(elements);
        self.rebuild_from(first);
        Ok(())
    }

    pub fn path(&self, index: usize) -> Result<MerklePath> {
        let len = self.len();
        if index >= len {
            return Err(TreeError::IndexOutOfBounds { index, len });
        }

        let mut path_elements = Vec::with_capacity(self.levels);
        let mut path_indices = Vec::with_capacity(self.levels);
        let mut i = index;
        for level in 0..self.levels {
            let sibling = self.layers[level]
                .get(i ^ 1)
                .unwrap_or(&self.zeros[level])
                .clone();
            path_elements.push(sibling);
            path_indices.push((i % 2) as u8);
            i /= 2;
        }

        Ok(MerklePath {
            index,
            element: self.layers[0][index].clone(),
            path_elements,
            path_indices,
            root: self.root().clone(),
        })
    }

    pub fn serialize(&self) -> SerializedTree {
        SerializedTree {
            levels: self.levels,
            zero_element: self.zero_element.clone(),
            elements: self.layers[0].clone(),
        }
    }

    pub fn deserialize(serialized: SerializedTree, hasher: H) -> Result<Self> {
        Self::with_elements(
            serialized.levels,
            serialized.elements,
            serialized.zero_element,
            hasher,
        )
    }

    /// hash of the two children of node `index` at `level`
    fn node_hash(&self, level: usize, index: usize) -> FieldElement {
        let below = &self.layers[level - 1];
        let right = below.get(2 * index + 1).unwrap_or(&self.zeros[level - 1]);
        self.hasher.hash(&below[2 * index], right)
    }

    fn rebuild_from(&mut self, first_leaf: usize) {
        let mut start = first_leaf;
        for level in 1..=self.levels {
            start /= 2;
            let width = (self.layers[level - 1].len() + 1) / 2;

            let fresh: Vec<FieldElement> = if width - start >= PARALLEL_THRESHOLD {
                (start..width)
                    .into_par_iter()
                    .map(|i| self.node_hash(level, i))
                    .collect()
            } else {
                (start..width).map(|i| self.node_hash(level, i)).collect()
            };

            let layer = &mut self.layers[level];
            layer.truncate(start);
            layer.extend(fresh);
        }
    }
}

impl<H: TreeHasher> std::fmt::Debug for MerkleTree<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerkleTree")
            .field("levels", &self.levels)
            .field("len", &self.len())
            .field("root", self.root())
            .finish()
    }
}

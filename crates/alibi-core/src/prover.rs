//! inputs a prover needs for one pool and blocklist

use crate::blocklist::Blocklist;
use crate::error::Result;
use crate::exclusion_tree::ExclusionTreeBuilder;
use crate::tree_builder::TreeBuilder;
use alibi_merkle::{SerializedTree, TreeHasher};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProverParameters {
    #[serde(rename = "fullTree")]
    pub full_tree: SerializedTree,
    #[serde(rename = "exclusionTree")]
    pub exclusion_tree: SerializedTree,
    #[serde(rename = "blocklistCID")]
    pub blocklist_cid: String,
}

impl ProverParameters {
    /// build (or reuse) both trees of a pool
    pub async fn assemble<H>(
        trees: &TreeBuilder<H>,
        exclusions: &ExclusionTreeBuilder<H>,
        pool_name: &str,
        chain_id: u64,
        blocklist: &Blocklist,
    ) -> Result<Self>
    where
        H: TreeHasher + Clone + 'static,
    {
        let full_tree = trees.build(pool_name, chain_id).await?;
        let exclusion_tree = exclusions.build_for(pool_name, chain_id, blocklist).await?;
        Ok(Self {
            full_tree,
            exclusion_tree,
            blocklist_cid: blocklist.cid().to_string(),
        })
    }
}

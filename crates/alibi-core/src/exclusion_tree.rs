//! exclusion tree over the commitments of blocklisted depositors

use crate::blocklist::Blocklist;
use crate::chain::ChainEventSource;
use crate::error::{IndexerError, Result};
use crate::progress::{NoopReporter, ProgressReporter};
use crate::store::{CommitmentQuery, CommitmentSort, CommitmentStore, DEFAULT_PAGE_SIZE};
use crate::tree_builder::{leaves_of, pool_parameters};
use crate::types::PoolKey;
use alibi_merkle::{build_exclusion_tree, FieldElement, MimcSponge, SerializedTree, TreeHasher};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// pool, blocklist cid and the sorted depositor addresses
type CacheKey = (PoolKey, String, Vec<String>);

struct CachedExclusion {
    /// blocklisted commitments the tree was built from, in tree order
    leaves: Vec<FieldElement>,
    tree: SerializedTree,
}

pub struct ExclusionTreeBuilder<H = MimcSponge> {
    chain: Arc<dyn ChainEventSource>,
    commitments: Arc<dyn CommitmentStore>,
    progress: Arc<dyn ProgressReporter>,
    hasher: H,
    page_size: usize,
    cache: Mutex<HashMap<CacheKey, CachedExclusion>>,
}

impl ExclusionTreeBuilder<MimcSponge> {
    pub fn new(chain: Arc<dyn ChainEventSource>, commitments: Arc<dyn CommitmentStore>) -> Self {
        Self::with_hasher(chain, commitments, MimcSponge)
    }
}

impl<H> ExclusionTreeBuilder<H>
where
    H: TreeHasher + Clone + 'static,
{
    pub fn with_hasher(
        chain: Arc<dyn ChainEventSource>,
        commitments: Arc<dyn CommitmentStore>,
        hasher: H,
    ) -> Self {
        Self {
            chain,
            commitments,
            progress: Arc::new(NoopReporter),
            hasher,
            page_size: DEFAULT_PAGE_SIZE,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub async fn build_for(&self, pool_name: &str, chain_id: u64, blocklist: &Blocklist) -> Result<SerializedTree> {
        let key = PoolKey::checked(pool_name, chain_id)?;
        self.build_over(key, blocklist.cid(), blocklist.depositor_set())
            .await
    }

    /// doubled-leaf tree over the commitments deposited by `blocklisted`
    ///
    /// Built trees are remembered per pool, blocklist cid and address set, and
    /// reused while the matching commitments read back unchanged.
    pub async fn build(
        &self,
        pool_name: &str,
        chain_id: u64,
        blocklist_cid: &str,
        blocklisted: &[String],
    ) -> Result<SerializedTree> {
        let key = PoolKey::checked(pool_name, chain_id)?;
        let depositors: HashSet<String> = blocklisted
            .iter()
            .map(|address| address.trim().to_lowercase())
            .collect();
        self.build_over(key, blocklist_cid, Arc::new(depositors))
            .await
    }

    async fn build_over(
        &self,
        key: PoolKey,
        blocklist_cid: &str,
        depositors: Arc<HashSet<String>>,
    ) -> Result<SerializedTree> {
        if blocklist_cid.trim().is_empty() {
            return Err(IndexerError::MissingParameter("blocklistCID"));
        }

        let mut addresses: Vec<String> = depositors.iter().cloned().collect();
        addresses.sort_unstable();
        let cache_key = (key.clone(), blocklist_cid.to_string(), addresses);

        let query = CommitmentQuery::for_pool(&key)
            .with_depositors(depositors)
            .sorted_by(CommitmentSort::Commitment);
        let matched = self.commitments.count(&query).await?;

        let label = format!("exclusion tree {} ({})", key, blocklist_cid);
        self.progress.on_tree_start(&label, matched);

        let mut values = Vec::with_capacity(matched);
        loop {
            let page = self
                .commitments
                .find(&query.clone().page(values.len(), self.page_size))
                .await?;
            if page.data.is_empty() {
                break;
            }
            values.extend(leaves_of(&page.data)?);
            self.progress.on_tree_progress(&label, page.data.len());
            if values.len() >= page.total {
                break;
            }
        }

        let cached = self
            .cache
            .lock()
            .get(&cache_key)
            .filter(|cached| cached.leaves == values)
            .map(|cached| cached.tree.clone());
        if let Some(tree) = cached {
            debug!("{}: exclusion tree for {} cached", key, blocklist_cid);
            self.progress.on_tree_end(&label);
            return Ok(tree);
        }

        let params = pool_parameters(self.chain.as_ref(), &key).await?;
        let hasher = self.hasher.clone();
        let leaves = values.clone();
        let tree = tokio::task::spawn_blocking(move || {
            build_exclusion_tree(params.levels, params.zero_element, hasher, values)
        })
        .await??;

        info!(
            "{}: exclusion tree over {} blocklisted commitments, root {}",
            key,
            leaves.len(),
            tree.root()
        );
        self.progress.on_tree_end(&label);

        let serialized = tree.serialize();
        self.cache.lock().insert(
            cache_key,
            CachedExclusion {
                leaves,
                tree: serialized.clone(),
            },
        );
        Ok(serialized)
    }
}

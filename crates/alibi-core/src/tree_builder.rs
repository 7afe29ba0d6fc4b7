//! full deposit tree per pool
//!
//! One tree is cached per pool. A build first asks the store how many
//! commitments the pool has; if the cached tree already holds that many
//! leaves it is returned without reading a single row. Otherwise the missing
//! rows are paged in leaf index order and appended.
//!
//! The cache is keyed by count only: rows edited in place without changing
//! the count are not noticed.

use crate::chain::{ChainEventSource, PoolParameters};
use crate::error::{IndexerError, Result};
use crate::progress::{NoopReporter, ProgressReporter};
use crate::store::{CommitmentQuery, CommitmentSort, CommitmentStore, DEFAULT_PAGE_SIZE};
use crate::types::PoolKey;
use alibi_merkle::{FieldElement, MerkleTree, MimcSponge, SerializedTree, TreeHasher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// parse stored commitments into leaves
pub(crate) fn leaves_of<'a>(
    rows: impl IntoIterator<Item = &'a crate::types::Commitment>,
) -> Result<Vec<FieldElement>> {
    rows.into_iter()
        .map(|row| FieldElement::parse(&row.commitment).map_err(IndexerError::from))
        .collect()
}

/// fetch a pool's tree depth and zero leaf
pub(crate) async fn pool_parameters(chain: &dyn ChainEventSource, key: &PoolKey) -> Result<PoolParameters> {
    let pool = chain.find(key).await.map_err(IndexerError::from_lookup)?;
    PoolParameters::fetch(pool.contract.as_ref())
        .await
        .map_err(|e| IndexerError::ChainClientUnavailable(e.to_string()))
}

/// hash `leaves` into `tree` off the async runtime
async fn append<H>(mut tree: MerkleTree<H>, leaves: Vec<FieldElement>) -> Result<MerkleTree<H>>
where
    H: TreeHasher + 'static,
{
    let tree = tokio::task::spawn_blocking(move || tree.bulk_insert(leaves).map(|_| tree)).await??;
    Ok(tree)
}

struct CachedTree<H> {
    tree: MerkleTree<H>,
    /// leaf index of the last row appended from the store
    last_leaf_index: Option<u32>,
}

type Slot<H> = Arc<tokio::sync::Mutex<Option<CachedTree<H>>>>;

pub struct TreeBuilder<H = MimcSponge> {
    chain: Arc<dyn ChainEventSource>,
    commitments: Arc<dyn CommitmentStore>,
    progress: Arc<dyn ProgressReporter>,
    hasher: H,
    page_size: usize,
    slots: Mutex<HashMap<PoolKey, Slot<H>>>,
}

impl TreeBuilder<MimcSponge> {
    pub fn new(chain: Arc<dyn ChainEventSource>, commitments: Arc<dyn CommitmentStore>) -> Self {
        Self::with_hasher(chain, commitments, MimcSponge)
    }
}

impl<H> TreeBuilder<H>
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
            slots: Mutex::new(HashMap::new()),
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

    /// builds of one pool queue behind each other; different pools run side by side
    fn slot(&self, key: &PoolKey) -> Slot<H> {
        self.slots.lock().entry(key.clone()).or_default().clone()
    }

    async fn fresh(&self, key: &PoolKey) -> Result<CachedTree<H>> {
        let params = pool_parameters(self.chain.as_ref(), key).await?;
        let tree = MerkleTree::new(params.levels, params.zero_element, self.hasher.clone())?;
        Ok(CachedTree {
            tree,
            last_leaf_index: None,
        })
    }

    /// tree over every commitment of the pool, in leaf index order
    pub async fn build(&self, pool_name: &str, chain_id: u64) -> Result<SerializedTree> {
        let key = PoolKey::checked(pool_name, chain_id)?;
        let slot = self.slot(&key);
        let mut cached = slot.lock().await;

        let total = self.commitments.count(&CommitmentQuery::for_pool(&key)).await?;
        let mut entry = match cached.take() {
            Some(entry) if entry.tree.len() == total => {
                debug!("{}: deposit tree cached at {} leaves", key, total);
                let serialized = entry.tree.serialize();
                *cached = Some(entry);
                return Ok(serialized);
            }
            Some(entry) if entry.tree.len() < total => entry,
            Some(entry) => {
                warn!(
                    "{}: store holds {} commitments but the tree has {}, rebuilding",
                    key,
                    total,
                    entry.tree.len()
                );
                self.fresh(&key).await?
            }
            None => self.fresh(&key).await?,
        };

        let label = format!("deposit tree {}", key);
        self.progress.on_tree_start(&label, total - entry.tree.len());

        let by_leaf = CommitmentQuery::for_pool(&key).sorted_by(CommitmentSort::LeafIndex);
        while entry.tree.len() < total {
            let page = self
                .commitments
                .find(&by_leaf.clone().page(entry.tree.len(), self.page_size))
                .await?;
            let Some(first) = page.data.first() else {
                break;
            };

            // rows indexed out of order invalidate everything appended so far
            if entry.last_leaf_index.is_some_and(|last| first.leaf_index <= last) {
                warn!("{}: leaf {} arrived behind the cached tree, rebuilding", key, first.leaf_index);
                entry = self.fresh(&key).await?;
                continue;
            }

            let leaves = leaves_of(&page.data)?;
            let inserted = leaves.len();
            entry.last_leaf_index = page.data.last().map(|row| row.leaf_index);
            entry.tree = append(entry.tree, leaves).await?;
            self.progress.on_tree_progress(&label, inserted);
        }

        info!("{}: deposit tree at {} leaves, root {}", key, entry.tree.len(), entry.tree.root());
        self.progress.on_tree_end(&label);

        let serialized = entry.tree.serialize();
        *cached = Some(entry);
        Ok(serialized)
    }

    /// append live commitments to the cached tree, returning its new leaf count
    ///
    /// Leaves that never reach the store make the next `build` rebuild from it.
    pub async fn insert(&self, pool_name: &str, chain_id: u64, leaves: Vec<FieldElement>) -> Result<usize> {
        let key = PoolKey::checked(pool_name, chain_id)?;
        let slot = self.slot(&key);
        let mut cached = slot.lock().await;

        let mut entry = match cached.take() {
            Some(entry) => entry,
            None => self.fresh(&key).await?,
        };
        entry.tree = append(entry.tree, leaves).await?;
        let len = entry.tree.len();
        *cached = Some(entry);
        Ok(len)
    }
}

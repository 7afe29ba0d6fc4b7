//! persistence seams for commitments and block ranges
//!
//! The scanner and tree builders only talk to these traits; `MemoryStore`
//! backs tests and the sled store in the binary backs real runs.

use crate::error::StoreResult;
use crate::types::{
    BlockRange, BlockRangeId, Commitment, CommitmentId, CommitmentKey, CommitmentPatch,
    CommitmentStatus, NewBlockRange, NewCommitment, PoolKey, RangeStatus,
};
use alibi_merkle::FieldElement;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

/// rows per page when a caller does not say otherwise
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitmentSort {
    /// insertion order
    #[default]
    Id,
    LeafIndex,
    /// numeric value of the commitment
    Commitment,
}

/// filter, order and window over commitment rows
#[derive(Debug, Clone)]
pub struct CommitmentQuery {
    pub pool: Option<PoolKey>,
    pub leaf_index: Option<u32>,
    pub tx_hash: Option<String>,
    pub status: Option<CommitmentStatus>,
    /// lowercase depositor addresses
    pub depositor_in: Option<Arc<HashSet<String>>>,
    pub sort: CommitmentSort,
    pub skip: usize,
    /// 0 asks for the total only
    pub limit: usize,
}

impl Default for CommitmentQuery {
    fn default() -> Self {
        Self {
            pool: None,
            leaf_index: None,
            tx_hash: None,
            status: None,
            depositor_in: None,
            sort: CommitmentSort::Id,
            skip: 0,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl CommitmentQuery {
    pub fn for_pool(pool: &PoolKey) -> Self {
        Self {
            pool: Some(pool.clone()),
            ..Default::default()
        }
    }

    /// at most one row can match
    pub fn by_key(key: &CommitmentKey) -> Self {
        Self {
            pool: Some(key.pool.clone()),
            leaf_index: Some(key.leaf_index),
            tx_hash: Some(key.tx_hash.clone()),
            limit: 1,
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: CommitmentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_depositors(mut self, depositors: Arc<HashSet<String>>) -> Self {
        self.depositor_in = Some(depositors);
        self
    }

    pub fn sorted_by(mut self, sort: CommitmentSort) -> Self {
        self.sort = sort;
        self
    }

    pub fn page(mut self, skip: usize, limit: usize) -> Self {
        self.skip = skip;
        self.limit = limit;
        self
    }

    pub fn count_only(self) -> Self {
        self.page(0, 0)
    }

    pub fn matches(&self, row: &Commitment) -> bool {
        if let Some(pool) = &self.pool {
            if row.pool_name != pool.pool_name || row.chain_id != pool.chain_id {
                return false;
            }
        }
        if self.leaf_index.is_some_and(|index| index != row.leaf_index) {
            return false;
        }
        if self.tx_hash.as_ref().is_some_and(|hash| *hash != row.tx_hash) {
            return false;
        }
        if self.status.is_some_and(|status| status != row.status) {
            return false;
        }
        if let Some(depositors) = &self.depositor_in {
            match &row.depositor {
                Some(depositor) if depositors.contains(depositor) => {}
                _ => return false,
            }
        }
        true
    }

    /// order rows in place; ties fall back to id so pages are stable
    pub fn sort_rows(&self, rows: &mut [Commitment]) {
        match self.sort {
            CommitmentSort::Id => rows.sort_by_key(|row| row.id),
            CommitmentSort::LeafIndex => rows.sort_by_key(|row| (row.leaf_index, row.id)),
            CommitmentSort::Commitment => rows.sort_by(|a, b| compare_commitments(a, b)),
        }
    }
}

fn compare_commitments(a: &Commitment, b: &Commitment) -> Ordering {
    let av = FieldElement::parse(&a.commitment).ok();
    let bv = FieldElement::parse(&b.commitment).ok();
    av.cmp(&bv).then(a.id.cmp(&b.id))
}

/// filter over block ranges; results come back ordered by start block
#[derive(Debug, Clone, Default)]
pub struct RangeQuery {
    pub pool: Option<PoolKey>,
    /// empty matches every status
    pub statuses: Vec<RangeStatus>,
    pub limit: Option<usize>,
}

impl RangeQuery {
    pub fn for_pool(pool: &PoolKey) -> Self {
        Self {
            pool: Some(pool.clone()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: RangeStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, row: &BlockRange) -> bool {
        if let Some(pool) = &self.pool {
            if row.pool_name != pool.pool_name || row.chain_id != pool.chain_id {
                return false;
            }
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&row.status) {
            return false;
        }
        true
    }
}

/// one window of a query result plus the unwindowed total
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub total: usize,
    pub skip: usize,
    pub limit: usize,
    pub data: Vec<T>,
}

impl<T> Page<T> {
    /// cut a window out of an already filtered and ordered result
    pub fn window(rows: Vec<T>, skip: usize, limit: usize) -> Self {
        let total = rows.len();
        let data = rows.into_iter().skip(skip).take(limit).collect();
        Self {
            total,
            skip,
            limit,
            data,
        }
    }
}

#[async_trait]
pub trait CommitmentStore: Send + Sync {
    async fn find(&self, query: &CommitmentQuery) -> StoreResult<Page<Commitment>>;

    /// total rows matching the query, ignoring its window
    async fn count(&self, query: &CommitmentQuery) -> StoreResult<usize> {
        let query = query.clone().count_only();
        Ok(self.find(&query).await?.total)
    }

    /// insert a row; a row with the same `CommitmentKey` yields `StoreError::Conflict`
    async fn create(&self, row: NewCommitment) -> StoreResult<Commitment>;

    async fn patch(&self, id: CommitmentId, patch: CommitmentPatch) -> StoreResult<Commitment>;

    async fn remove(&self, id: CommitmentId) -> StoreResult<Commitment>;

    /// drop every row of a pool, returning how many went
    async fn remove_all(&self, pool: &PoolKey) -> StoreResult<usize>;
}

#[async_trait]
pub trait BlockRangeStore: Send + Sync {
    async fn find(&self, query: &RangeQuery) -> StoreResult<Page<BlockRange>>;

    /// insert a range; identical bounds for the same pool yield `StoreError::Conflict`
    async fn create(&self, row: NewBlockRange) -> StoreResult<BlockRange>;

    async fn patch_status(&self, id: BlockRangeId, status: RangeStatus) -> StoreResult<BlockRange>;

    async fn remove_all(&self, pool: &PoolKey) -> StoreResult<usize>;
}

#[async_trait]
impl<T: CommitmentStore + ?Sized> CommitmentStore for Arc<T> {
    async fn find(&self, query: &CommitmentQuery) -> StoreResult<Page<Commitment>> {
        (**self).find(query).await
    }

    async fn count(&self, query: &CommitmentQuery) -> StoreResult<usize> {
        (**self).count(query).await
    }

    async fn create(&self, row: NewCommitment) -> StoreResult<Commitment> {
        (**self).create(row).await
    }

    async fn patch(&self, id: CommitmentId, patch: CommitmentPatch) -> StoreResult<Commitment> {
        (**self).patch(id, patch).await
    }

    async fn remove(&self, id: CommitmentId) -> StoreResult<Commitment> {
        (**self).remove(id).await
    }

    async fn remove_all(&self, pool: &PoolKey) -> StoreResult<usize> {
        (**self).remove_all(pool).await
    }
}

#[async_trait]
impl<T: BlockRangeStore + ?Sized> BlockRangeStore for Arc<T> {
    async fn find(&self, query: &RangeQuery) -> StoreResult<Page<BlockRange>> {
        (**self).find(query).await
    }

    async fn create(&self, row: NewBlockRange) -> StoreResult<BlockRange> {
        (**self).create(row).await
    }

    async fn patch_status(&self, id: BlockRangeId, status: RangeStatus) -> StoreResult<BlockRange> {
        (**self).patch_status(id, status).await
    }

    async fn remove_all(&self, pool: &PoolKey) -> StoreResult<usize> {
        (**self).remove_all(pool).await
    }
}

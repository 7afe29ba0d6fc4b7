//! in-process store backing both traits
//!
//! Rows live behind a single mutex, so a uniqueness check and its insert are
//! one atomic step.

use crate::error::{StoreError, StoreResult};
use crate::store::{BlockRangeStore, CommitmentQuery, CommitmentStore, Page, RangeQuery};
use crate::types::{
    BlockRange, BlockRangeId, Commitment, CommitmentId, CommitmentKey, CommitmentPatch,
    NewBlockRange, NewCommitment, PoolKey, RangeStatus,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

type RangeKey = (PoolKey, u64, u64);

#[derive(Default)]
struct Rows {
    next_id: u64,
    commitments: BTreeMap<CommitmentId, Commitment>,
    commitment_keys: HashMap<CommitmentKey, CommitmentId>,
    ranges: BTreeMap<BlockRangeId, BlockRange>,
    range_keys: HashMap<RangeKey, BlockRangeId>,
}

impl Rows {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// read counters, for callers that want to see how often rows were fetched
#[derive(Debug, Default)]
pub struct ReadStats {
    page_reads: AtomicUsize,
    count_reads: AtomicUsize,
}

impl ReadStats {
    /// `find` calls that asked for rows
    pub fn page_reads(&self) -> usize {
        self.page_reads.load(Ordering::Relaxed)
    }

    /// `count` calls and `find` calls with a zero limit
    pub fn count_reads(&self) -> usize {
        self.count_reads.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Rows>,
    stats: ReadStats,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &ReadStats {
        &self.stats
    }

    pub fn commitment_rows(&self) -> Vec<Commitment> {
        self.rows.lock().commitments.values().cloned().collect()
    }

    pub fn range_rows(&self) -> Vec<BlockRange> {
        self.rows.lock().ranges.values().cloned().collect()
    }

    fn select(&self, query: &CommitmentQuery) -> Vec<Commitment> {
        let rows = self.rows.lock();
        let mut matched: Vec<Commitment> = rows
            .commitments
            .values()
            .filter(|row| query.matches(row))
            .cloned()
            .collect();
        drop(rows);
        query.sort_rows(&mut matched);
        matched
    }
}

#[async_trait]
impl CommitmentStore for MemoryStore {
    async fn find(&self, query: &CommitmentQuery) -> StoreResult<Page<Commitment>> {
        if query.limit == 0 {
            self.stats.count_reads.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.page_reads.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Page::window(self.select(query), query.skip, query.limit))
    }

    async fn count(&self, query: &CommitmentQuery) -> StoreResult<usize> {
        self.stats.count_reads.fetch_add(1, Ordering::Relaxed);
        let rows = self.rows.lock();
        Ok(rows.commitments.values().filter(|row| query.matches(row)).count())
    }

    async fn create(&self, row: NewCommitment) -> StoreResult<Commitment> {
        let key = row.key();
        let mut rows = self.rows.lock();
        if let Some(existing) = rows.commitment_keys.get(&key) {
            return Err(StoreError::Conflict(existing.0));
        }
        let id = CommitmentId(rows.allocate());
        let stored = row.into_row(id);
        rows.commitment_keys.insert(key, id);
        rows.commitments.insert(id, stored.clone());
        Ok(stored)
    }

    async fn patch(&self, id: CommitmentId, patch: CommitmentPatch) -> StoreResult<Commitment> {
        let mut rows = self.rows.lock();
        let row = rows.commitments.get_mut(&id).ok_or(StoreError::NotFound(id.0))?;
        patch.apply(row);
        Ok(row.clone())
    }

    async fn remove(&self, id: CommitmentId) -> StoreResult<Commitment> {
        let mut rows = self.rows.lock();
        let row = rows.commitments.remove(&id).ok_or(StoreError::NotFound(id.0))?;
        rows.commitment_keys.remove(&row.key());
        Ok(row)
    }

    async fn remove_all(&self, pool: &PoolKey) -> StoreResult<usize> {
        let mut rows = self.rows.lock();
        let before = rows.commitments.len();
        rows.commitments
            .retain(|_, row| row.pool_name != pool.pool_name || row.chain_id != pool.chain_id);
        rows.commitment_keys.retain(|key, _| key.pool != *pool);
        Ok(before - rows.commitments.len())
    }
}

#[async_trait]
impl BlockRangeStore for MemoryStore {
    async fn find(&self, query: &RangeQuery) -> StoreResult<Page<BlockRange>> {
        let rows = self.rows.lock();
        let mut matched: Vec<BlockRange> = rows
            .ranges
            .values()
            .filter(|row| query.matches(row))
            .cloned()
            .collect();
        drop(rows);
        matched.sort_by_key(|row| (row.start_block, row.end_block, row.id));
        let limit = query.limit.unwrap_or(matched.len());
        Ok(Page::window(matched, 0, limit))
    }

    async fn create(&self, row: NewBlockRange) -> StoreResult<BlockRange> {
        let key = (
            PoolKey::new(row.pool_name.clone(), row.chain_id),
            row.start_block,
            row.end_block,
        );
        let mut rows = self.rows.lock();
        if let Some(existing) = rows.range_keys.get(&key) {
            return Err(StoreError::Conflict(existing.0));
        }
        let id = BlockRangeId(rows.allocate());
        let stored = row.into_row(id);
        rows.range_keys.insert(key, id);
        rows.ranges.insert(id, stored.clone());
        Ok(stored)
    }

    async fn patch_status(&self, id: BlockRangeId, status: RangeStatus) -> StoreResult<BlockRange> {
        let mut rows = self.rows.lock();
        let row = rows.ranges.get_mut(&id).ok_or(StoreError::NotFound(id.0))?;
        row.status = status;
        Ok(row.clone())
    }

    async fn remove_all(&self, pool: &PoolKey) -> StoreResult<usize> {
        let mut rows = self.rows.lock();
        let before = rows.ranges.len();
        rows.ranges
            .retain(|_, row| row.pool_name != pool.pool_name || row.chain_id != pool.chain_id);
        rows.range_keys.retain(|(key, _, _), _| key != pool);
        Ok(before - rows.ranges.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CommitmentStatus, DepositEvent};

    fn event(leaf_index: u32, tx: &str) -> DepositEvent {
        DepositEvent {
            commitment: format!("0x{:x}", leaf_index + 0xa00),
            leaf_index,
            timestamp: 100 + leaf_index as u64,
            transaction_hash: tx.into(),
            block_number: 10,
            removed: false,
        }
    }

    #[tokio::test]
    async fn test_duplicate_commitment_conflicts_with_existing_id() {
        let store = MemoryStore::new();
        let pool = PoolKey::new("1ETH", 1);
        let first = CommitmentStore::create(&store, NewCommitment::pending(&pool, &event(1, "0x1")))
            .await
            .unwrap();

        let again = CommitmentStore::create(&store, NewCommitment::pending(&pool, &event(1, "0x1"))).await;
        assert_eq!(again, Err(StoreError::Conflict(first.id.0)));

        // same leaf index from another pool is a different row
        let other = PoolKey::new("10ETH", 1);
        assert!(CommitmentStore::create(&store, NewCommitment::pending(&other, &event(1, "0x1")))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_remove_frees_the_key() {
        let store = MemoryStore::new();
        let pool = PoolKey::new("1ETH", 1);
        let row = CommitmentStore::create(&store, NewCommitment::pending(&pool, &event(2, "0x2")))
            .await
            .unwrap();
        store.remove(row.id).await.unwrap();
        assert!(CommitmentStore::create(&store, NewCommitment::pending(&pool, &event(2, "0x2")))
            .await
            .is_ok());
        assert_eq!(store.remove(row.id).await, Err(StoreError::NotFound(row.id.0)));
    }

    #[tokio::test]
    async fn test_status_filter_and_count() {
        let store = MemoryStore::new();
        let pool = PoolKey::new("1ETH", 1);
        for i in 0..5 {
            let row = CommitmentStore::create(&store, NewCommitment::pending(&pool, &event(i, &format!("0x{}", i))))
                .await
                .unwrap();
            if i % 2 == 0 {
                store
                    .patch(row.id, CommitmentPatch::resolved(format!("0xd{}", i)))
                    .await
                    .unwrap();
            }
        }

        let completed = CommitmentQuery::for_pool(&pool).with_status(CommitmentStatus::Completed);
        assert_eq!(store.count(&completed).await.unwrap(), 3);
        let page = CommitmentStore::find(&store, &completed.page(1, 1)).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.data[0].leaf_index, 2);
    }

    #[tokio::test]
    async fn test_ranges_unique_per_bounds() {
        let store = MemoryStore::new();
        let pool = PoolKey::new("1ETH", 1);
        let range = BlockRangeStore::create(&store, NewBlockRange::pending(&pool, 0, 1999))
            .await
            .unwrap();
        assert_eq!(
            BlockRangeStore::create(&store, NewBlockRange::pending(&pool, 0, 1999)).await,
            Err(StoreError::Conflict(range.id.0))
        );

        store.patch_status(range.id, RangeStatus::InProgress).await.unwrap();
        let pending = BlockRangeStore::find(&store, &RangeQuery::for_pool(&pool).with_status(RangeStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.total, 0);
        assert_eq!(BlockRangeStore::remove_all(&store, &pool).await.unwrap(), 1);
    }
}

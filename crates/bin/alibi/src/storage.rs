//! sled-backed commitment and block range stores
//!
//! Rows are bincode encoded under their big-endian id, so iteration follows
//! insertion order. Each row table has a key index tree; inserts and removals
//! touch both inside one transaction.

use crate::error::{AlibiError, Result};
use alibi_core::{
    BlockRange, BlockRangeId, BlockRangeStore, Commitment, CommitmentId, CommitmentKey,
    CommitmentPatch, CommitmentQuery, CommitmentStore, NewBlockRange, NewCommitment, Page,
    PoolKey, RangeQuery, RangeStatus, StoreError, StoreResult,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionResult};
use sled::{Batch, Transactional, Tree};
use tracing::{debug, info};

pub struct SledStore {
    db: sled::Db,
    commitments: Tree,
    commitment_keys: Tree,
    ranges: Tree,
    range_keys: Tree,
}

impl SledStore {
    pub fn open(path: &str) -> Result<Self> {
        info!("opening store at {}", path);
        let db = sled::open(path)?;
        Ok(Self {
            commitments: db.open_tree("commitments")?,
            commitment_keys: db.open_tree("commitment_keys")?,
            ranges: db.open_tree("block_ranges")?,
            range_keys: db.open_tree("block_range_keys")?,
            db,
        })
    }

    pub async fn flush(&self) -> Result<()> {
        let bytes = self.db.flush_async().await?;
        debug!("flushed {} bytes", bytes);
        Ok(())
    }

    fn next_id(&self) -> StoreResult<u64> {
        self.db.generate_id().map_err(backend)
    }

    fn scan_rows<T: DeserializeOwned>(&self, tree: &Tree, mut keep: impl FnMut(&T) -> bool) -> StoreResult<Vec<T>> {
        let mut rows = Vec::new();
        for item in tree.iter() {
            let (_, value) = item.map_err(backend)?;
            let row: T = decode(&value)?;
            if keep(&row) {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// commitment rows a query can match, using the key index when the query pins one row
    fn candidates(&self, query: &CommitmentQuery) -> StoreResult<Vec<Commitment>> {
        if let (Some(pool), Some(leaf_index), Some(tx_hash)) = (&query.pool, query.leaf_index, &query.tx_hash) {
            let key = encode(&CommitmentKey {
                pool: pool.clone(),
                leaf_index,
                tx_hash: tx_hash.clone(),
            })?;
            let Some(id) = self.commitment_keys.get(key).map_err(backend)? else {
                return Ok(Vec::new());
            };
            let row = match self.commitments.get(id).map_err(backend)? {
                Some(bytes) => decode::<Commitment>(&bytes)?,
                None => return Ok(Vec::new()),
            };
            return Ok(if query.matches(&row) { vec![row] } else { Vec::new() });
        }
        self.scan_rows(&self.commitments, |row: &Commitment| query.matches(row))
    }

    /// drop every row of `pool` from a row table and its key index
    fn purge<T, F>(&self, rows: &Tree, keys: &Tree, pool: &PoolKey, key_of: F) -> StoreResult<usize>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> Option<StoreResult<Vec<u8>>>,
    {
        let mut row_batch = Batch::default();
        let mut key_batch = Batch::default();
        let mut removed = 0;
        for item in rows.iter() {
            let (id, value) = item.map_err(backend)?;
            let row: T = decode(&value)?;
            if let Some(key) = key_of(&row) {
                row_batch.remove(id);
                key_batch.remove(key?);
                removed += 1;
            }
        }
        let result: TransactionResult<(), StoreError> = (rows, keys).transaction(|(rows, keys)| {
            rows.apply_batch(&row_batch)?;
            keys.apply_batch(&key_batch)?;
            Ok(())
        });
        settle(result)?;
        debug!("removed {} rows of {}", removed, pool);
        Ok(removed)
    }
}

fn backend(err: sled::Error) -> StoreError {
    AlibiError::from(err).into()
}

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| AlibiError::from(e).into())
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| AlibiError::from(e).into())
}

fn id_of(bytes: &[u8]) -> u64 {
    let mut id = [0u8; 8];
    if bytes.len() == 8 {
        id.copy_from_slice(bytes);
    }
    u64::from_be_bytes(id)
}

fn settle<T>(result: TransactionResult<T, StoreError>) -> StoreResult<T> {
    result.map_err(|err| match err {
        TransactionError::Abort(err) => err,
        TransactionError::Storage(err) => backend(err),
    })
}

fn range_key(pool_name: &str, chain_id: u64, start_block: u64, end_block: u64) -> StoreResult<Vec<u8>> {
    encode(&(pool_name, chain_id, start_block, end_block))
}

fn in_pool(pool_name: &str, chain_id: u64, pool: &PoolKey) -> bool {
    pool_name == pool.pool_name && chain_id == pool.chain_id
}

/// read, change and compare-and-swap one row until no writer raced us
fn modify<T, F>(tree: &Tree, id: u64, change: F) -> StoreResult<T>
where
    T: Serialize + DeserializeOwned,
    F: Fn(&mut T),
{
    let key = id.to_be_bytes();
    loop {
        let current = tree.get(key).map_err(backend)?.ok_or(StoreError::NotFound(id))?;
        let mut row: T = decode(&current)?;
        change(&mut row);
        let updated = encode(&row)?;
        match tree.compare_and_swap(key, Some(current), Some(updated)).map_err(backend)? {
            Ok(()) => return Ok(row),
            Err(_) => continue,
        }
    }
}

#[async_trait]
impl CommitmentStore for SledStore {
    async fn find(&self, query: &CommitmentQuery) -> StoreResult<Page<Commitment>> {
        let mut rows = self.candidates(query)?;
        if query.limit == 0 {
            return Ok(Page::window(rows, query.skip, 0));
        }
        query.sort_rows(&mut rows);
        Ok(Page::window(rows, query.skip, query.limit))
    }

    async fn create(&self, row: NewCommitment) -> StoreResult<Commitment> {
        let key = encode(&row.key())?;
        let id = CommitmentId(self.next_id()?);
        let stored = row.into_row(id);
        let value = encode(&stored)?;
        let id_bytes = id.0.to_be_bytes();

        let result: TransactionResult<(), StoreError> =
            (&self.commitment_keys, &self.commitments).transaction(|(keys, rows)| {
                if let Some(existing) = keys.get(&key)? {
                    return Err(ConflictableTransactionError::Abort(StoreError::Conflict(id_of(&existing))));
                }
                keys.insert(key.as_slice(), &id_bytes[..])?;
                rows.insert(&id_bytes[..], value.as_slice())?;
                Ok(())
            });
        settle(result)?;
        Ok(stored)
    }

    async fn patch(&self, id: CommitmentId, patch: CommitmentPatch) -> StoreResult<Commitment> {
        modify(&self.commitments, id.0, |row: &mut Commitment| patch.apply(row))
    }

    async fn remove(&self, id: CommitmentId) -> StoreResult<Commitment> {
        let id_bytes = id.0.to_be_bytes();
        let result: TransactionResult<Commitment, StoreError> =
            (&self.commitment_keys, &self.commitments).transaction(|(keys, rows)| {
                let Some(bytes) = rows.remove(&id_bytes[..])? else {
                    return Err(ConflictableTransactionError::Abort(StoreError::NotFound(id.0)));
                };
                let row: Commitment = decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
                let key = encode(&row.key()).map_err(ConflictableTransactionError::Abort)?;
                keys.remove(key)?;
                Ok(row)
            });
        settle(result)
    }

    async fn remove_all(&self, pool: &PoolKey) -> StoreResult<usize> {
        self.purge(&self.commitments, &self.commitment_keys, pool, |row: &Commitment| {
            in_pool(&row.pool_name, row.chain_id, pool).then(|| encode(&row.key()))
        })
    }
}

#[async_trait]
impl BlockRangeStore for SledStore {
    async fn find(&self, query: &RangeQuery) -> StoreResult<Page<BlockRange>> {
        let mut rows = self.scan_rows(&self.ranges, |row: &BlockRange| query.matches(row))?;
        rows.sort_by_key(|row| (row.start_block, row.end_block, row.id));
        let limit = query.limit.unwrap_or(rows.len());
        Ok(Page::window(rows, 0, limit))
    }

    async fn create(&self, row: NewBlockRange) -> StoreResult<BlockRange> {
        let key = range_key(&row.pool_name, row.chain_id, row.start_block, row.end_block)?;
        let id = BlockRangeId(self.next_id()?);
        let stored = row.into_row(id);
        let value = encode(&stored)?;
        let id_bytes = id.0.to_be_bytes();

        let result: TransactionResult<(), StoreError> =
            (&self.range_keys, &self.ranges).transaction(|(keys, rows)| {
                if let Some(existing) = keys.get(&key)? {
                    return Err(ConflictableTransactionError::Abort(StoreError::Conflict(id_of(&existing))));
                }
                keys.insert(key.as_slice(), &id_bytes[..])?;
                rows.insert(&id_bytes[..], value.as_slice())?;
                Ok(())
            });
        settle(result)?;
        Ok(stored)
    }

    async fn patch_status(&self, id: BlockRangeId, status: RangeStatus) -> StoreResult<BlockRange> {
        modify(&self.ranges, id.0, |row: &mut BlockRange| row.status = status)
    }

    async fn remove_all(&self, pool: &PoolKey) -> StoreResult<usize> {
        self.purge(&self.ranges, &self.range_keys, pool, |row: &BlockRange| {
            in_pool(&row.pool_name, row.chain_id, pool)
                .then(|| range_key(&row.pool_name, row.chain_id, row.start_block, row.end_block))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alibi_core::{
        BlockRangeScanner, ChainEventSource, ChainResult, CommitmentSort, CommitmentStatus,
        DepositEvent, PoolContract, PoolHandle, RateLimiter, RateLimiterConfig, Receipt,
        ScannerConfig,
    };
    use alibi_merkle::FieldElement;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn open() -> (TempDir, SledStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path().join("db").to_str().unwrap()).unwrap();
        (dir, store)
    }

    fn pool() -> PoolKey {
        PoolKey::new("1ETH", 1)
    }

    fn deposit(commitment: &str, leaf_index: u32, tx: &str) -> NewCommitment {
        NewCommitment::pending(
            &pool(),
            &DepositEvent {
                commitment: commitment.into(),
                leaf_index,
                timestamp: 1_600_000_000,
                transaction_hash: tx.into(),
                block_number: 9_200_000,
                removed: false,
            },
        )
    }

    #[tokio::test]
    async fn test_commitment_uniqueness() {
        let (_dir, store) = open();
        let first = CommitmentStore::create(&store, deposit("0xabc", 0, "0x01")).await.unwrap();
        let err = CommitmentStore::create(&store, deposit("0xabc", 0, "0x01"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(id) if id == first.id.0));

        // same leaf from another transaction is a different row
        CommitmentStore::create(&store, deposit("0xabc", 0, "0x02")).await.unwrap();
        assert_eq!(store.count(&CommitmentQuery::for_pool(&pool())).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_find_by_key_and_sorting() {
        let (_dir, store) = open();
        for (commitment, leaf, tx) in [("0x0f", 2, "0x03"), ("0xa0", 0, "0x01"), ("0x01", 1, "0x02")] {
            CommitmentStore::create(&store, deposit(commitment, leaf, tx)).await.unwrap();
        }

        let key = deposit("0x01", 1, "0x02").key();
        let hit = CommitmentStore::find(&store, &CommitmentQuery::by_key(&key)).await.unwrap();
        assert_eq!(hit.total, 1);
        assert_eq!(hit.data[0].commitment, "0x01");

        let by_leaf = CommitmentStore::find(
            &store,
            &CommitmentQuery::for_pool(&pool()).sorted_by(CommitmentSort::LeafIndex),
        )
        .await
        .unwrap();
        let leaves: Vec<_> = by_leaf.data.iter().map(|row| row.leaf_index).collect();
        assert_eq!(leaves, vec![0, 1, 2]);

        let by_value = CommitmentStore::find(
            &store,
            &CommitmentQuery::for_pool(&pool())
                .sorted_by(CommitmentSort::Commitment)
                .page(1, 5),
        )
        .await
        .unwrap();
        assert_eq!(by_value.total, 3);
        let values: Vec<_> = by_value.data.iter().map(|row| row.commitment.as_str()).collect();
        assert_eq!(values, vec!["0x0f", "0xa0"]);
    }

    #[tokio::test]
    async fn test_patch_and_remove() {
        let (_dir, store) = open();
        let row = CommitmentStore::create(&store, deposit("0xabc", 0, "0x01")).await.unwrap();

        let patched = store
            .patch(row.id, CommitmentPatch::resolved("0x00000000000000000000000000000000000000a1".into()))
            .await
            .unwrap();
        assert_eq!(patched.status, CommitmentStatus::Completed);

        let removed = store.remove(row.id).await.unwrap();
        assert_eq!(removed, patched);
        assert!(matches!(store.remove(row.id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.patch(row.id, CommitmentPatch::status(CommitmentStatus::Failed)).await,
            Err(StoreError::NotFound(_))
        ));

        // the key is free again
        CommitmentStore::create(&store, deposit("0xabc", 0, "0x01")).await.unwrap();
    }

    #[tokio::test]
    async fn test_ranges_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let path = path.to_str().unwrap();
        {
            let store = SledStore::open(path).unwrap();
            let range = BlockRangeStore::create(&store, NewBlockRange::pending(&pool(), 100, 2099))
                .await
                .unwrap();
            store.patch_status(range.id, RangeStatus::Completed).await.unwrap();
            BlockRangeStore::create(&store, NewBlockRange::pending(&pool(), 2100, 4099))
                .await
                .unwrap();
            assert!(matches!(
                BlockRangeStore::create(&store, NewBlockRange::pending(&pool(), 100, 2099)).await,
                Err(StoreError::Conflict(id)) if id == range.id.0
            ));
            store.flush().await.unwrap();
        }

        let store = SledStore::open(path).unwrap();
        let pending = BlockRangeStore::find(
            &store,
            &RangeQuery::for_pool(&pool()).with_status(RangeStatus::Pending),
        )
        .await
        .unwrap();
        assert_eq!(pending.total, 1);
        assert_eq!(pending.data[0].start_block, 2100);

        let all = BlockRangeStore::find(&store, &RangeQuery::for_pool(&pool())).await.unwrap();
        assert_eq!(all.data[0].status, RangeStatus::Completed);
    }

    #[tokio::test]
    async fn test_remove_all_is_per_pool() {
        let (_dir, store) = open();
        let other = PoolKey::new("10ETH", 1);
        CommitmentStore::create(&store, deposit("0xabc", 0, "0x01")).await.unwrap();
        CommitmentStore::create(&store, deposit("0xdef", 1, "0x02")).await.unwrap();
        BlockRangeStore::create(&store, NewBlockRange::pending(&pool(), 100, 2099))
            .await
            .unwrap();
        BlockRangeStore::create(&store, NewBlockRange::pending(&other, 100, 2099))
            .await
            .unwrap();

        assert_eq!(CommitmentStore::remove_all(&store, &pool()).await.unwrap(), 2);
        assert_eq!(BlockRangeStore::remove_all(&store, &pool()).await.unwrap(), 1);
        assert_eq!(store.count(&CommitmentQuery::for_pool(&pool())).await.unwrap(), 0);

        let left = BlockRangeStore::find(&store, &RangeQuery::default()).await.unwrap();
        assert_eq!(left.total, 1);
        assert_eq!(left.data[0].pool(), other);

        // keys went with the rows
        CommitmentStore::create(&store, deposit("0xabc", 0, "0x01")).await.unwrap();
        BlockRangeStore::create(&store, NewBlockRange::pending(&pool(), 100, 2099))
            .await
            .unwrap();
    }

    /// a pool with three deposits between blocks 100 and 5000
    struct FixedPool;

    #[async_trait]
    impl PoolContract for FixedPool {
        async fn block_number(&self) -> ChainResult<u64> {
            Ok(6_000)
        }

        async fn query_deposits(&self, from_block: u64, to_block: u64) -> ChainResult<Vec<DepositEvent>> {
            Ok([(0u32, 150u64), (1, 2_500), (2, 4_900)]
                .into_iter()
                .filter(|(_, block)| (from_block..=to_block).contains(block))
                .map(|(leaf_index, block_number)| DepositEvent {
                    commitment: format!("0x{:x}", 0xc0 + leaf_index),
                    leaf_index,
                    timestamp: 1_600_000_000 + block_number,
                    transaction_hash: format!("0x{:02x}", leaf_index),
                    block_number,
                    removed: false,
                })
                .collect())
        }

        async fn transaction_receipt(&self, tx_hash: &str) -> ChainResult<Receipt> {
            Ok(Receipt {
                transaction_hash: tx_hash.to_string(),
                from: "0x00000000000000000000000000000000000000AA".into(),
                status: 1,
            })
        }

        async fn levels(&self) -> ChainResult<usize> {
            Ok(4)
        }

        async fn zero_element(&self) -> ChainResult<FieldElement> {
            Ok(FieldElement::zero())
        }
    }

    struct FixedChain;

    #[async_trait]
    impl ChainEventSource for FixedChain {
        async fn find(&self, _: &PoolKey) -> ChainResult<PoolHandle> {
            Ok(PoolHandle {
                contract: Arc::new(FixedPool),
                created_at_block: 100,
            })
        }
    }

    fn scanner(store: Arc<SledStore>) -> BlockRangeScanner {
        let limiter = RateLimiter::new(RateLimiterConfig {
            capacity: 10_000,
            refill_per_second: 10_000,
        })
        .unwrap();
        BlockRangeScanner::new(
            Arc::new(FixedChain),
            store.clone(),
            store,
            Arc::new(limiter),
            ScannerConfig {
                sanctioned_at_block: 5_000,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_scan_resumes_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let path = path.to_str().unwrap();

        {
            let store = Arc::new(SledStore::open(path).unwrap());
            let summary = scanner(store.clone()).scan("1ETH", 1).await.unwrap();
            assert_eq!(summary.total_size, 3);
            store.flush().await.unwrap();
        }

        let store = Arc::new(SledStore::open(path).unwrap());
        let scanner = scanner(store.clone());
        let again = scanner.scan("1ETH", 1).await.unwrap();
        assert_eq!(again.total_size, 0);

        let status = scanner.status("1ETH", 1).await.unwrap();
        assert!(status.is_settled());
        assert_eq!(status.completed_commitments, 3);
        assert_eq!(status.completed_ranges, 3);

        let rows = CommitmentStore::find(&*store, &CommitmentQuery::for_pool(&pool()))
            .await
            .unwrap();
        assert!(rows
            .data
            .iter()
            .all(|row| row.depositor.as_deref() == Some("0x00000000000000000000000000000000000000aa")));
    }
}

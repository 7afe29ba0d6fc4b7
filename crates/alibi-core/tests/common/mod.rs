//! in-memory chain and flaky store doubles shared by the integration tests

#![allow(dead_code)]

use alibi_core::{
    BlockRangeScanner, ChainError, ChainEventSource, ChainResult, Commitment, CommitmentId,
    CommitmentPatch, CommitmentQuery, CommitmentStore, DepositEvent, MemoryStore, NewCommitment,
    Page, PoolContract, PoolHandle, PoolKey, RateLimiter, RateLimiterConfig, Receipt,
    ScannerConfig, StoreError, StoreResult,
};
use alibi_merkle::{FieldElement, DEFAULT_LEVELS, POOL_ZERO_ELEMENT};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const POOL: &str = "1ETH";
pub const CHAIN: u64 = 1;
pub const CREATED_AT: u64 = 100;
pub const HEAD: u64 = 10_000;
pub const SANCTIONED_AT: u64 = 5_000;

pub fn pool_key() -> PoolKey {
    PoolKey::new(POOL, CHAIN)
}

/// (commitment, leaf index, timestamp, tx hash, sender, block)
pub const DEPOSITS: [(&str, u32, u64, &str, &str, u64); 4] = [
    ("0xabc", 1, 123, "0x123", "0xAAaa000000000000000000000000000000000001", 150),
    ("0xdef", 2, 234, "0x234", "0xBBbb000000000000000000000000000000000002", 2_200),
    ("0x123", 3, 345, "0x345", "0xCCcc000000000000000000000000000000000003", 2_300),
    ("0x456", 4, 456, "0x456", "0xDDdd000000000000000000000000000000000004", 4_500),
];

pub fn sender_of(tx_hash: &str) -> String {
    DEPOSITS
        .iter()
        .find(|deposit| deposit.3 == tx_hash)
        .map(|deposit| deposit.4.to_lowercase())
        .unwrap()
}

pub fn deposit_events() -> Vec<DepositEvent> {
    DEPOSITS
        .iter()
        .map(|&(commitment, leaf_index, timestamp, tx, _, block)| DepositEvent {
            commitment: commitment.into(),
            leaf_index,
            timestamp,
            transaction_hash: tx.into(),
            block_number: block,
            removed: false,
        })
        .collect()
}

pub struct MockPool {
    events: Mutex<Vec<DepositEvent>>,
    senders: HashMap<String, String>,
    head: AtomicU64,
    levels: usize,
    zero_element: FieldElement,
    query_failures: AtomicUsize,
    /// windows whose query always fails
    broken_windows: Mutex<HashSet<u64>>,
    receipt_failures: Mutex<HashMap<String, usize>>,
    reverted: Mutex<HashSet<String>>,
    query_delay: Mutex<Option<Duration>>,
    receipt_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub queries: AtomicUsize,
    pub receipts: AtomicUsize,
    pub parameter_reads: AtomicUsize,
}

impl MockPool {
    pub fn new(events: Vec<DepositEvent>) -> Self {
        let senders = DEPOSITS
            .iter()
            .map(|deposit| (deposit.3.to_string(), deposit.4.to_string()))
            .collect();
        Self {
            events: Mutex::new(events),
            senders,
            head: AtomicU64::new(HEAD),
            levels: DEFAULT_LEVELS,
            zero_element: FieldElement::parse(POOL_ZERO_ELEMENT).unwrap(),
            query_failures: AtomicUsize::new(0),
            broken_windows: Mutex::new(HashSet::new()),
            receipt_failures: Mutex::new(HashMap::new()),
            reverted: Mutex::new(HashSet::new()),
            query_delay: Mutex::new(None),
            receipt_delay: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
            receipts: AtomicUsize::new(0),
            parameter_reads: AtomicUsize::new(0),
        }
    }

    pub fn with_levels(mut self, levels: usize) -> Self {
        self.levels = levels;
        self
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn fail_next_queries(&self, n: usize) {
        self.query_failures.store(n, Ordering::SeqCst);
    }

    pub fn break_window(&self, start_block: u64) {
        self.broken_windows.lock().insert(start_block);
    }

    pub fn fail_receipt(&self, tx_hash: &str, times: usize) {
        self.receipt_failures.lock().insert(tx_hash.to_string(), times);
    }

    pub fn revert(&self, tx_hash: &str) {
        self.reverted.lock().insert(tx_hash.to_string());
    }

    pub fn set_query_delay(&self, delay: Duration) {
        *self.query_delay.lock() = Some(delay);
    }

    pub fn set_receipt_delay(&self, delay: Duration) {
        *self.receipt_delay.lock() = Some(delay);
    }

    pub fn push_event(&self, event: DepositEvent) {
        self.events.lock().push(event);
    }
}

#[async_trait]
impl PoolContract for MockPool {
    async fn block_number(&self) -> ChainResult<u64> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn query_deposits(&self, from_block: u64, to_block: u64) -> ChainResult<Vec<DepositEvent>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let delay = *self.query_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.broken_windows.lock().contains(&from_block) {
            return Err(ChainError::Rpc("window permanently broken".into()));
        }
        let injected = self
            .query_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(ChainError::Rpc("connection reset".into()));
        }
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|event| (from_block..=to_block).contains(&event.block_number))
            .cloned()
            .collect())
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> ChainResult<Receipt> {
        self.receipts.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.receipt_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        {
            let mut failures = self.receipt_failures.lock();
            if let Some(left) = failures.get_mut(tx_hash) {
                if *left > 0 {
                    *left -= 1;
                    return Err(ChainError::Rpc(format!("receipt for {} timed out", tx_hash)));
                }
            }
        }

        let status = if self.reverted.lock().contains(tx_hash) { 0 } else { 1 };
        Ok(Receipt {
            transaction_hash: tx_hash.to_string(),
            from: self.senders.get(tx_hash).cloned().unwrap_or_default(),
            status,
        })
    }

    async fn levels(&self) -> ChainResult<usize> {
        self.parameter_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.levels)
    }

    async fn zero_element(&self) -> ChainResult<FieldElement> {
        Ok(self.zero_element.clone())
    }
}

/// one pool on one chain
pub struct MockChain {
    pools: HashMap<PoolKey, PoolHandle>,
    pub offline: bool,
}

impl MockChain {
    pub fn new(pool: Arc<MockPool>) -> Self {
        let mut pools = HashMap::new();
        pools.insert(
            pool_key(),
            PoolHandle {
                contract: pool,
                created_at_block: CREATED_AT,
            },
        );
        Self { pools, offline: false }
    }

    pub fn offline() -> Self {
        Self {
            pools: HashMap::new(),
            offline: true,
        }
    }
}

#[async_trait]
impl ChainEventSource for MockChain {
    async fn find(&self, pool: &PoolKey) -> ChainResult<PoolHandle> {
        if self.offline {
            return Err(ChainError::Rpc("connection refused".into()));
        }
        self.pools.get(pool).cloned().ok_or_else(|| ChainError::UnknownPool {
            pool: pool.pool_name.clone(),
            chain_id: pool.chain_id,
        })
    }
}

/// memory store whose next `patch` calls fail
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    patch_failures: AtomicUsize,
}

impl FlakyStore {
    pub fn fail_next_patches(&self, n: usize) {
        self.patch_failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl CommitmentStore for FlakyStore {
    async fn find(&self, query: &CommitmentQuery) -> StoreResult<Page<Commitment>> {
        CommitmentStore::find(&self.inner, query).await
    }

    async fn count(&self, query: &CommitmentQuery) -> StoreResult<usize> {
        self.inner.count(query).await
    }

    async fn create(&self, row: NewCommitment) -> StoreResult<Commitment> {
        CommitmentStore::create(&self.inner, row).await
    }

    async fn patch(&self, id: CommitmentId, patch: CommitmentPatch) -> StoreResult<Commitment> {
        let injected = self
            .patch_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Backend("write timed out".into()));
        }
        self.inner.patch(id, patch).await
    }

    async fn remove(&self, id: CommitmentId) -> StoreResult<Commitment> {
        self.inner.remove(id).await
    }

    async fn remove_all(&self, pool: &PoolKey) -> StoreResult<usize> {
        CommitmentStore::remove_all(&self.inner, pool).await
    }
}

pub fn fast_config() -> ScannerConfig {
    ScannerConfig {
        sanctioned_at_block: SANCTIONED_AT,
        converge_polls: 2,
        converge_backoff: Duration::from_millis(1),
        max_converge_backoff: Duration::from_millis(4),
        retry_backoff: Duration::from_millis(1),
        max_retry_backoff: Duration::from_millis(4),
        ..Default::default()
    }
}

pub fn roomy_limiter() -> Arc<RateLimiter> {
    Arc::new(
        RateLimiter::new(RateLimiterConfig {
            capacity: 100_000,
            refill_per_second: 100_000,
        })
        .unwrap(),
    )
}

pub struct Harness {
    pub pool: Arc<MockPool>,
    pub store: Arc<MemoryStore>,
    pub scanner: BlockRangeScanner,
}

impl Harness {
    pub fn new(pool: MockPool) -> Self {
        Self::with_config(pool, fast_config())
    }

    pub fn with_config(pool: MockPool, config: ScannerConfig) -> Self {
        let pool = Arc::new(pool);
        let store = Arc::new(MemoryStore::new());
        let scanner = BlockRangeScanner::new(
            Arc::new(MockChain::new(pool.clone())),
            store.clone(),
            store.clone(),
            roomy_limiter(),
            config,
        )
        .unwrap();
        Self { pool, store, scanner }
    }
}

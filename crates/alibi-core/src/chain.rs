//! chain collaborators
//!
//! `ChainEventSource` resolves a pool to a `PoolContract`; the contract answers
//! the handful of reads the indexer and the tree builders need.

use crate::error::ChainResult;
use crate::types::{DepositEvent, PoolKey, Receipt};
use alibi_merkle::FieldElement;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait PoolContract: Send + Sync {
    /// current head of the chain the pool lives on
    async fn block_number(&self) -> ChainResult<u64>;

    /// Deposit events emitted in the inclusive block window
    async fn query_deposits(&self, from_block: u64, to_block: u64) -> ChainResult<Vec<DepositEvent>>;

    async fn transaction_receipt(&self, tx_hash: &str) -> ChainResult<Receipt>;

    /// depth of the pool's deposit tree
    async fn levels(&self) -> ChainResult<usize>;

    /// value of an empty leaf in the pool's deposit tree
    async fn zero_element(&self) -> ChainResult<FieldElement>;
}

/// a resolved pool: its contract plus the block it was deployed in
#[derive(Clone)]
pub struct PoolHandle {
    pub contract: Arc<dyn PoolContract>,
    pub created_at_block: u64,
}

#[async_trait]
pub trait ChainEventSource: Send + Sync {
    /// fails with `ChainError::UnknownPool` when the pool is not configured for the chain
    async fn find(&self, pool: &PoolKey) -> ChainResult<PoolHandle>;
}

/// depth and zero leaf read from a pool contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolParameters {
    pub levels: usize,
    pub zero_element: FieldElement,
}

impl PoolParameters {
    pub async fn fetch(contract: &dyn PoolContract) -> ChainResult<Self> {
        let (levels, zero_element) =
            futures::try_join!(contract.levels(), contract.zero_element())?;
        Ok(Self { levels, zero_element })
    }
}

//! rows, chain events and scan results

use crate::error::{IndexerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// a deposit pool on one chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolKey {
    pub pool_name: String,
    pub chain_id: u64,
}

impl PoolKey {
    pub fn new(pool_name: impl Into<String>, chain_id: u64) -> Self {
        Self {
            pool_name: pool_name.into(),
            chain_id,
        }
    }

    /// validate caller supplied parameters
    pub fn checked(pool_name: &str, chain_id: u64) -> Result<Self> {
        if pool_name.trim().is_empty() {
            return Err(IndexerError::MissingParameter("poolName"));
        }
        if chain_id == 0 {
            return Err(IndexerError::MissingParameter("chainId"));
        }
        Ok(Self::new(pool_name.trim(), chain_id))
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.pool_name, self.chain_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitmentStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RangeStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitmentId(pub u64);

impl fmt::Display for CommitmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockRangeId(pub u64);

impl fmt::Display for BlockRangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// uniqueness key of a commitment row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitmentKey {
    pub pool: PoolKey,
    pub leaf_index: u32,
    pub tx_hash: String,
}

/// one indexed deposit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commitment {
    pub id: CommitmentId,
    /// hex commitment as emitted by the pool
    pub commitment: String,
    pub leaf_index: u32,
    pub timestamp: u64,
    pub pool_name: String,
    pub chain_id: u64,
    pub tx_hash: String,
    /// lowercase sender of the deposit transaction, set once its receipt resolved
    pub depositor: Option<String>,
    pub status: CommitmentStatus,
}

impl Commitment {
    pub fn pool(&self) -> PoolKey {
        PoolKey::new(self.pool_name.clone(), self.chain_id)
    }

    pub fn key(&self) -> CommitmentKey {
        CommitmentKey {
            pool: self.pool(),
            leaf_index: self.leaf_index,
            tx_hash: self.tx_hash.clone(),
        }
    }
}

/// commitment row before the store assigns an id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCommitment {
    pub commitment: String,
    pub leaf_index: u32,
    pub timestamp: u64,
    pub pool_name: String,
    pub chain_id: u64,
    pub tx_hash: String,
    pub depositor: Option<String>,
    pub status: CommitmentStatus,
}

impl NewCommitment {
    /// pending row for a freshly seen deposit event
    pub fn pending(pool: &PoolKey, event: &DepositEvent) -> Self {
        Self {
            commitment: event.commitment.clone(),
            leaf_index: event.leaf_index,
            timestamp: event.timestamp,
            pool_name: pool.pool_name.clone(),
            chain_id: pool.chain_id,
            tx_hash: event.transaction_hash.clone(),
            depositor: None,
            status: CommitmentStatus::Pending,
        }
    }

    pub fn key(&self) -> CommitmentKey {
        CommitmentKey {
            pool: PoolKey::new(self.pool_name.clone(), self.chain_id),
            leaf_index: self.leaf_index,
            tx_hash: self.tx_hash.clone(),
        }
    }

    pub fn into_row(self, id: CommitmentId) -> Commitment {
        Commitment {
            id,
            commitment: self.commitment,
            leaf_index: self.leaf_index,
            timestamp: self.timestamp,
            pool_name: self.pool_name,
            chain_id: self.chain_id,
            tx_hash: self.tx_hash,
            depositor: self.depositor,
            status: self.status,
        }
    }
}

/// partial update of a commitment row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitmentPatch {
    pub depositor: Option<String>,
    pub status: Option<CommitmentStatus>,
}

impl CommitmentPatch {
    pub fn resolved(depositor: String) -> Self {
        Self {
            depositor: Some(depositor),
            status: Some(CommitmentStatus::Completed),
        }
    }

    pub fn status(status: CommitmentStatus) -> Self {
        Self {
            depositor: None,
            status: Some(status),
        }
    }

    pub fn apply(&self, row: &mut Commitment) {
        if let Some(depositor) = &self.depositor {
            row.depositor = Some(depositor.clone());
        }
        if let Some(status) = self.status {
            row.status = status;
        }
    }
}

/// inclusive block window scanned as one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRange {
    pub id: BlockRangeId,
    pub pool_name: String,
    pub chain_id: u64,
    pub start_block: u64,
    pub end_block: u64,
    pub status: RangeStatus,
}

impl BlockRange {
    pub fn pool(&self) -> PoolKey {
        PoolKey::new(self.pool_name.clone(), self.chain_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBlockRange {
    pub pool_name: String,
    pub chain_id: u64,
    pub start_block: u64,
    pub end_block: u64,
    pub status: RangeStatus,
}

impl NewBlockRange {
    pub fn pending(pool: &PoolKey, start_block: u64, end_block: u64) -> Self {
        Self {
            pool_name: pool.pool_name.clone(),
            chain_id: pool.chain_id,
            start_block,
            end_block,
            status: RangeStatus::Pending,
        }
    }

    pub fn into_row(self, id: BlockRangeId) -> BlockRange {
        BlockRange {
            id,
            pool_name: self.pool_name,
            chain_id: self.chain_id,
            start_block: self.start_block,
            end_block: self.end_block,
            status: self.status,
        }
    }
}

/// decoded Deposit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositEvent {
    pub commitment: String,
    pub leaf_index: u32,
    pub timestamp: u64,
    pub transaction_hash: String,
    pub block_number: u64,
    /// log was dropped by a reorg
    pub removed: bool,
}

/// the parts of a transaction receipt the indexer reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: String,
    pub from: String,
    /// 1 for success, 0 for revert
    pub status: u64,
}

impl Receipt {
    pub fn succeeded(&self) -> bool {
        self.status == 1
    }
}

/// result of a completed scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub message: String,
    /// deposit events returned by the ranges processed in this run
    pub total_size: usize,
}

impl ScanSummary {
    pub fn complete(total_size: usize) -> Self {
        Self {
            message: "Scan complete".into(),
            total_size,
        }
    }
}

/// per-status row counts of one pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatus {
    pub pending_ranges: usize,
    pub in_progress_ranges: usize,
    pub completed_ranges: usize,
    pub failed_ranges: usize,
    pub pending_commitments: usize,
    pub completed_commitments: usize,
    pub failed_commitments: usize,
}

impl ScanStatus {
    pub fn total_ranges(&self) -> usize {
        self.pending_ranges + self.in_progress_ranges + self.completed_ranges + self.failed_ranges
    }

    pub fn total_commitments(&self) -> usize {
        self.pending_commitments + self.completed_commitments + self.failed_commitments
    }

    /// every range scanned and every receipt resolved
    pub fn is_settled(&self) -> bool {
        self.total_ranges() > 0
            && self.completed_ranges == self.total_ranges()
            && self.completed_commitments == self.total_commitments()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_key_requires_both_parts() {
        assert!(matches!(
            PoolKey::checked("", 1),
            Err(IndexerError::MissingParameter("poolName"))
        ));
        assert!(matches!(
            PoolKey::checked("1ETH", 0),
            Err(IndexerError::MissingParameter("chainId"))
        ));
        assert_eq!(PoolKey::checked(" 1ETH ", 1).unwrap(), PoolKey::new("1ETH", 1));
    }

    #[test]
    fn test_patch_keeps_unset_fields() {
        let event = DepositEvent {
            commitment: "0xabc".into(),
            leaf_index: 1,
            timestamp: 123,
            transaction_hash: "0x123".into(),
            block_number: 100,
            removed: false,
        };
        let mut row = NewCommitment::pending(&PoolKey::new("1ETH", 1), &event).into_row(CommitmentId(7));

        CommitmentPatch::status(CommitmentStatus::Failed).apply(&mut row);
        assert_eq!(row.status, CommitmentStatus::Failed);
        assert_eq!(row.depositor, None);

        CommitmentPatch::resolved("0xdead".into()).apply(&mut row);
        assert_eq!(row.status, CommitmentStatus::Completed);
        assert_eq!(row.depositor.as_deref(), Some("0xdead"));
    }

    #[test]
    fn test_scan_summary_wire_shape() {
        let json = serde_json::to_value(ScanSummary::complete(4)).unwrap();
        assert_eq!(json, serde_json::json!({ "message": "Scan complete", "totalSize": 4 }));
    }
}

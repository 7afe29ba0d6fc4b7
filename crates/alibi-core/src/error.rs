//! error types for alibi-core

use alibi_merkle::TreeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("unknown pool {pool} on chain {chain_id}")]
    UnknownPool { pool: String, chain_id: u64 },

    #[error("chain client unavailable: {0}")]
    ChainClientUnavailable(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("rate limiter error: {0}")]
    Limiter(#[from] LimiterError),

    #[error("invalid blocklist: {0}")]
    Blocklist(#[from] BlocklistError),

    #[error("scan cancelled")]
    Cancelled,

    #[error(
        "scan incomplete: {failed_ranges} block ranges and {failed_commitments} commitments still failing"
    )]
    Incomplete {
        failed_ranges: usize,
        failed_commitments: usize,
    },

    #[error("background task failed: {0}")]
    Task(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl IndexerError {
    /// map a pool lookup failure; only an unknown pool is a caller error
    pub fn from_lookup(err: ChainError) -> Self {
        match err {
            ChainError::UnknownPool { pool, chain_id } => IndexerError::UnknownPool { pool, chain_id },
            other => IndexerError::ChainClientUnavailable(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for IndexerError {
    fn from(err: tokio::task::JoinError) -> Self {
        IndexerError::Task(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("unknown pool {pool} on chain {chain_id}")]
    UnknownPool { pool: String, chain_id: u64 },

    #[error("no rpc endpoint for chain {0}")]
    NoEndpoint(u64),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("decode error: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// uniqueness constraint hit; carries the id of the row that already exists
    #[error("row already exists (id {0})")]
    Conflict(u64),

    #[error("row not found (id {0})")]
    NotFound(u64),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimiterError {
    #[error("missing compute units")]
    MissingComputeUnits,

    #[error("invalid limiter config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlocklistError {
    #[error("blocklist data not found in parsed json")]
    MissingBlocklist,

    #[error("invalid blocklist entry: {0}")]
    InvalidAddress(String),

    #[error("malformed json: {0}")]
    Json(String),
}

pub type Result<T> = std::result::Result<T, IndexerError>;
pub type ChainResult<T> = std::result::Result<T, ChainError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;

//! proof-of-innocence indexer
//!
//! - `BlockRangeScanner`: resumable scan of a pool's Deposit events into a
//!   commitment store, resolving each deposit's sender from its receipt
//! - `RateLimiter`: compute-unit budget shared by every chain call
//! - `TreeBuilder` / `ExclusionTreeBuilder`: the pool's full deposit tree and
//!   the doubled-leaf tree over blocklisted deposits
//!
//! Storage and chain access sit behind traits (`store`, `chain`); the binary
//! wires in sled and JSON-RPC.

pub mod blocklist;
pub mod chain;
pub mod error;
pub mod exclusion_tree;
pub mod limiter;
pub mod memory;
pub mod pools;
pub mod progress;
pub mod prover;
pub mod scanner;
pub mod store;
pub mod tree_builder;
pub mod types;

pub use blocklist::{normalize_address, Blocklist};
pub use chain::{ChainEventSource, PoolContract, PoolHandle, PoolParameters};
pub use error::{
    BlocklistError, ChainError, ChainResult, IndexerError, LimiterError, Result, StoreError,
    StoreResult,
};
pub use exclusion_tree::ExclusionTreeBuilder;
pub use limiter::{RateLimiter, RateLimiterConfig};
pub use memory::MemoryStore;
pub use pools::{PoolDeployment, PoolEntry, PoolRegistry};
pub use progress::{NoopReporter, ProgressReporter, ScanEvent, TracingReporter};
pub use prover::ProverParameters;
pub use scanner::{BlockRangeScanner, ScannerConfig};
pub use store::{
    BlockRangeStore, CommitmentQuery, CommitmentSort, CommitmentStore, Page, RangeQuery,
    DEFAULT_PAGE_SIZE,
};
pub use tree_builder::TreeBuilder;
pub use types::*;

//! error types for merkle tree construction

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("tree is full (capacity {capacity} leaves)")]
    Full { capacity: usize },

    #[error("leaf index {index} out of bounds ({len} leaves)")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("invalid field element: {0}")]
    InvalidElement(String),

    #[error("invalid tree levels: {0} (expected 1..=32)")]
    InvalidLevels(usize),
}

pub type Result<T> = std::result::Result<T, TreeError>;

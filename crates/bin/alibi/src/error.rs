use alibi_core::{ChainError, StoreError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlibiError {
    #[error("ethereum RPC error: {0}")]
    Rpc(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AlibiError>;

impl From<sled::Error> for AlibiError {
    fn from(err: sled::Error) -> Self {
        AlibiError::Storage(format!("sled: {}", err))
    }
}

impl From<bincode::Error> for AlibiError {
    fn from(err: bincode::Error) -> Self {
        AlibiError::Serialization(err.to_string())
    }
}

impl From<AlibiError> for ChainError {
    fn from(err: AlibiError) -> Self {
        match err {
            AlibiError::Serialization(msg) => ChainError::Decode(msg),
            other => ChainError::Rpc(other.to_string()),
        }
    }
}

impl From<AlibiError> for StoreError {
    fn from(err: AlibiError) -> Self {
        match err {
            AlibiError::Serialization(msg) => StoreError::Codec(msg),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

//! known pool deployments

use crate::error::{ChainError, ChainResult};
use crate::types::PoolKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MAINNET: u64 = 1;
pub const GOERLI: u64 = 5;
/// local node forked from mainnet
pub const LOCAL_FORK: u64 = 31337;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolDeployment {
    pub address: String,
    /// first block worth scanning
    pub created_at_block: u64,
}

/// one pool as written in a pool file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PoolEntry {
    pub pool: String,
    pub chain_id: u64,
    pub address: String,
    #[serde(default)]
    pub created_at_block: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolRegistry {
    pools: BTreeMap<PoolKey, PoolDeployment>,
}

// (pool, mainnet address, mainnet deployment block, goerli address)
const ETH_POOLS: [(&str, &str, u64, &str); 4] = [
    (
        "01ETH",
        "0x12d66f87a04a9e220743712ce6d9bb1b5616b8fc",
        9_116_966,
        "0x6bf694a291df3fec1f7e69701e3ab6c592435ae7",
    ),
    (
        "1ETH",
        "0x47ce0c6ed5b0ce3d3a51fdb1c52dc66a7c3c2936",
        9_117_609,
        "0x3aac1cc67c2ec5db4ea850957b967ba153ad6279",
    ),
    (
        "10ETH",
        "0x910cbd523d972eb0a6f4cae4618ad62622b39dbf",
        9_117_720,
        "0x723b78e67497e85279cb204544566f4dc5d2aca0",
    ),
    (
        "100ETH",
        "0xa160cdab225685da1d56aa342ad8841c3b53f291",
        9_161_895,
        "0x0e3a09dda6b20afbb34ac7cd4a6881493f3e7bf7",
    ),
];

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// the eth pools on mainnet, a local mainnet fork and goerli
    ///
    /// Goerli deployments start at genesis; give a pool file to narrow them.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for (pool, mainnet, deployed_at, goerli) in ETH_POOLS {
            for chain_id in [MAINNET, LOCAL_FORK] {
                registry.insert(
                    PoolKey::new(pool, chain_id),
                    PoolDeployment {
                        address: mainnet.to_string(),
                        created_at_block: deployed_at,
                    },
                );
            }
            registry.insert(
                PoolKey::new(pool, GOERLI),
                PoolDeployment {
                    address: goerli.to_string(),
                    created_at_block: 0,
                },
            );
        }
        registry
    }

    pub fn from_entries(entries: impl IntoIterator<Item = PoolEntry>) -> Self {
        let mut registry = Self::new();
        for entry in entries {
            registry.insert(
                PoolKey::new(entry.pool, entry.chain_id),
                PoolDeployment {
                    address: entry.address.to_lowercase(),
                    created_at_block: entry.created_at_block,
                },
            );
        }
        registry
    }

    pub fn insert(&mut self, key: PoolKey, deployment: PoolDeployment) {
        self.pools.insert(key, deployment);
    }

    /// entries of `other` replace ours
    pub fn merge(&mut self, other: PoolRegistry) {
        self.pools.extend(other.pools);
    }

    pub fn get(&self, key: &PoolKey) -> Option<&PoolDeployment> {
        self.pools.get(key)
    }

    pub fn lookup(&self, key: &PoolKey) -> ChainResult<&PoolDeployment> {
        self.get(key).ok_or_else(|| ChainError::UnknownPool {
            pool: key.pool_name.clone(),
            chain_id: key.chain_id,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PoolKey, &PoolDeployment)> {
        self.pools.iter()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

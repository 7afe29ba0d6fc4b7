//! pool file and endpoint arguments

use crate::error::{AlibiError, Result};
use alibi_core::{PoolEntry, PoolRegistry};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// `[[pool]]` tables of a pool file
#[derive(Debug, Default, Deserialize)]
pub struct PoolFile {
    #[serde(default, rename = "pool")]
    pub pools: Vec<PoolEntry>,
}

impl PoolFile {
    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| AlibiError::Config(format!("pool file: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }
}

/// builtin deployments, overridden by the pool file when one is given
pub fn load_registry(pool_file: Option<&Path>) -> Result<PoolRegistry> {
    let mut registry = PoolRegistry::builtin();
    if let Some(path) = pool_file {
        let file = PoolFile::load(path)?;
        info!("loaded {} pools from {}", file.pools.len(), path.display());
        registry.merge(PoolRegistry::from_entries(file.pools));
    }
    Ok(registry)
}

/// parse `chain=url`, as given to `--rpc`
pub fn parse_endpoint(arg: &str) -> std::result::Result<(u64, String), String> {
    let (chain, url) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected chain=url, got {}", arg))?;
    let chain_id = chain
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("chain id {}: {}", chain, e))?;
    let url = url.trim();
    if url.is_empty() {
        return Err(format!("empty url for chain {}", chain_id));
    }
    Ok((chain_id, url.to_string()))
}

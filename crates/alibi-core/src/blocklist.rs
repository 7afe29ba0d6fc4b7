//! blocklisted depositor addresses and the content id naming them

use crate::error::BlocklistError;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

/// lowercase `0x`-prefixed form of a 20 byte address
pub fn normalize_address(address: &str) -> Result<String, BlocklistError> {
    let trimmed = address.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| BlocklistError::InvalidAddress(address.to_string()))?;
    let bytes = hex::decode(digits).map_err(|_| BlocklistError::InvalidAddress(address.to_string()))?;
    if bytes.len() != 20 {
        return Err(BlocklistError::InvalidAddress(address.to_string()));
    }
    Ok(format!("0x{}", hex::encode(bytes)))
}

#[derive(Deserialize)]
struct BlocklistFile {
    blocklist: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blocklist {
    cid: String,
    addresses: Vec<String>,
}

impl Blocklist {
    /// validate, lowercase and dedup `addresses`, keeping first-seen order
    pub fn new(cid: impl Into<String>, addresses: Vec<String>) -> Result<Self, BlocklistError> {
        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(addresses.len());
        for address in addresses {
            let address = normalize_address(&address)?;
            if seen.insert(address.clone()) {
                normalized.push(address);
            }
        }
        Ok(Self {
            cid: cid.into(),
            addresses: normalized,
        })
    }

    /// parse a `{"blocklist": [..]}` document fetched under `cid`
    pub fn from_json(cid: impl Into<String>, bytes: &[u8]) -> Result<Self, BlocklistError> {
        let file: BlocklistFile =
            serde_json::from_slice(bytes).map_err(|e| BlocklistError::Json(e.to_string()))?;
        let addresses = file.blocklist.ok_or(BlocklistError::MissingBlocklist)?;
        Self::new(cid, addresses)
    }

    pub fn cid(&self) -> &str {
        &self.cid
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn contains(&self, address: &str) -> bool {
        normalize_address(address).is_ok_and(|address| self.addresses.contains(&address))
    }

    pub fn depositor_set(&self) -> Arc<HashSet<String>> {
        Arc::new(self.addresses.iter().cloned().collect())
    }
}

//! ethereum JSON-RPC client and the pool contracts behind it

use crate::constants::{DEPOSIT_TOPIC, LEVELS_SELECTOR, ZERO_VALUE_SELECTOR};
use crate::error::{AlibiError, Result};
use alibi_core::{
    ChainError, ChainEventSource, ChainResult, DepositEvent, PoolContract, PoolHandle, PoolKey,
    PoolRegistry, Receipt,
};
use alibi_merkle::FieldElement;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct EthRpcClient {
    url: String,
    client: Client,
}

impl EthRpcClient {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: Client::new(),
        }
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AlibiError::Rpc(e.to_string()))?;

        let json: RpcResponse = response
            .json()
            .await
            .map_err(|e| AlibiError::Rpc(e.to_string()))?;

        if let Some(error) = json.error {
            return Err(AlibiError::Rpc(format!(
                "{} failed with {}: {}",
                method, error.code, error.message
            )));
        }

        Ok(json.result.unwrap_or(Value::Null))
    }

    pub async fn block_number(&self) -> Result<u64> {
        let result = self.call("eth_blockNumber", vec![]).await?;
        let quantity: String = from_value(result)?;
        parse_quantity(&quantity)
    }

    /// logs of one contract and topic in an inclusive block window
    pub async fn get_logs(
        &self,
        address: &str,
        topic: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>> {
        let filter = json!({
            "address": address,
            "topics": [topic],
            "fromBlock": to_quantity(from_block),
            "toBlock": to_quantity(to_block),
        });
        let result = self.call("eth_getLogs", vec![filter]).await?;
        from_value(result)
    }

    pub async fn get_transaction_receipt(&self, tx_hash: &str) -> Result<TransactionReceipt> {
        let result = self
            .call("eth_getTransactionReceipt", vec![json!(tx_hash)])
            .await?;
        if result.is_null() {
            return Err(AlibiError::Rpc(format!("no receipt for {}", tx_hash)));
        }
        from_value(result)
    }

    /// read-only call against the latest block
    pub async fn eth_call(&self, to: &str, data: &str) -> Result<Vec<u8>> {
        let result = self
            .call("eth_call", vec![json!({ "to": to, "data": data }), json!("latest")])
            .await?;
        let hex_data: String = from_value(result)?;
        decode_hex(&hex_data)
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: Option<String>,
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    pub from: String,
    /// absent before byzantium
    pub status: Option<String>,
}

impl TransactionReceipt {
    pub fn into_receipt(self) -> Result<Receipt> {
        let status = match &self.status {
            Some(status) => parse_quantity(status)?,
            None => 1,
        };
        Ok(Receipt {
            transaction_hash: self.transaction_hash,
            from: self.from,
            status,
        })
    }
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| AlibiError::Serialization(e.to_string()))
}

pub fn to_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

pub fn parse_quantity(quantity: &str) -> Result<u64> {
    let digits = quantity
        .strip_prefix("0x")
        .ok_or_else(|| AlibiError::Serialization(format!("quantity without 0x: {}", quantity)))?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| AlibiError::Serialization(format!("quantity {}: {}", quantity, e)))
}

fn decode_hex(data: &str) -> Result<Vec<u8>> {
    hex::decode(data.trim_start_matches("0x"))
        .map_err(|e| AlibiError::Serialization(format!("hex data: {}", e)))
}

/// 32 byte abi word at `index`
fn word(data: &[u8], index: usize) -> Result<[u8; 32]> {
    let start = index * 32;
    data.get(start..start + 32)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| {
            AlibiError::Serialization(format!("abi word {} missing in {} bytes", index, data.len()))
        })
}

/// decode `Deposit(bytes32 indexed commitment, uint32 leafIndex, uint256 timestamp)`
pub fn decode_deposit(log: &Log) -> Result<DepositEvent> {
    if log.topics.len() < 2 {
        return Err(AlibiError::Serialization(format!(
            "deposit log with {} topics",
            log.topics.len()
        )));
    }
    let commitment = log.topics[1].to_lowercase();
    let data = decode_hex(&log.data)?;

    let leaf_word = word(&data, 0)?;
    if leaf_word[..28].iter().any(|&b| b != 0) {
        return Err(AlibiError::Serialization("leaf index exceeds uint32".into()));
    }
    let leaf_index = u32::from_be_bytes([leaf_word[28], leaf_word[29], leaf_word[30], leaf_word[31]]);

    let time_word = word(&data, 1)?;
    if time_word[..24].iter().any(|&b| b != 0) {
        return Err(AlibiError::Serialization("timestamp exceeds uint64".into()));
    }
    let mut timestamp = [0u8; 8];
    timestamp.copy_from_slice(&time_word[24..]);

    let transaction_hash = log
        .transaction_hash
        .clone()
        .ok_or_else(|| AlibiError::Serialization("pending deposit log".into()))?;
    let block_number = log
        .block_number
        .as_deref()
        .ok_or_else(|| AlibiError::Serialization("pending deposit log".into()))
        .and_then(parse_quantity)?;

    Ok(DepositEvent {
        commitment,
        leaf_index,
        timestamp: u64::from_be_bytes(timestamp),
        transaction_hash,
        block_number,
        removed: log.removed,
    })
}

/// one deployed pool reached through a node
pub struct EthPool {
    client: EthRpcClient,
    address: String,
}

impl EthPool {
    pub fn new(client: EthRpcClient, address: impl Into<String>) -> Self {
        Self {
            client,
            address: address.into(),
        }
    }
}

#[async_trait]
impl PoolContract for EthPool {
    async fn block_number(&self) -> ChainResult<u64> {
        Ok(self.client.block_number().await?)
    }

    async fn query_deposits(&self, from_block: u64, to_block: u64) -> ChainResult<Vec<DepositEvent>> {
        let logs = self
            .client
            .get_logs(&self.address, DEPOSIT_TOPIC, from_block, to_block)
            .await?;
        debug!("{} deposit logs in {}..={}", logs.len(), from_block, to_block);
        logs.iter()
            .map(|log| decode_deposit(log).map_err(ChainError::from))
            .collect()
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> ChainResult<Receipt> {
        let receipt = self.client.get_transaction_receipt(tx_hash).await?;
        Ok(receipt.into_receipt()?)
    }

    async fn levels(&self) -> ChainResult<usize> {
        let output = self.client.eth_call(&self.address, LEVELS_SELECTOR).await?;
        let levels = word(&output, 0)?;
        if levels[..28].iter().any(|&b| b != 0) {
            return Err(ChainError::Decode("levels exceeds uint32".into()));
        }
        Ok(u32::from_be_bytes([levels[28], levels[29], levels[30], levels[31]]) as usize)
    }

    async fn zero_element(&self) -> ChainResult<FieldElement> {
        let output = self.client.eth_call(&self.address, ZERO_VALUE_SELECTOR).await?;
        Ok(FieldElement::from_be_bytes(&word(&output, 0)?))
    }
}

/// resolves pools of the registry against one node per chain
pub struct EthRpcSource {
    registry: PoolRegistry,
    endpoints: HashMap<u64, EthRpcClient>,
}

impl EthRpcSource {
    pub fn new(registry: PoolRegistry, endpoints: impl IntoIterator<Item = (u64, String)>) -> Self {
        let endpoints = endpoints
            .into_iter()
            .map(|(chain_id, url)| (chain_id, EthRpcClient::new(&url)))
            .collect();
        Self { registry, endpoints }
    }

    pub fn registry(&self) -> &PoolRegistry {
        &self.registry
    }
}

#[async_trait]
impl ChainEventSource for EthRpcSource {
    async fn find(&self, pool: &PoolKey) -> ChainResult<PoolHandle> {
        let deployment = self.registry.lookup(pool)?;
        let client = self
            .endpoints
            .get(&pool.chain_id)
            .ok_or(ChainError::NoEndpoint(pool.chain_id))?;
        Ok(PoolHandle {
            contract: Arc::new(EthPool::new(client.clone(), deployment.address.clone())),
            created_at_block: deployment.created_at_block,
        })
    }
}

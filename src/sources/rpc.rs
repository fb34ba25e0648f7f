//! Ethereum JSON-RPC ledger adapter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, Bytes, Selector, B256, U256};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use super::{LedgerQuery, SourceError};
use crate::chain::{Log, RawTransaction, Receipt};

#[derive(Debug)]
pub struct JsonRpcLedger {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcLedger {
    pub fn new(url: impl Into<String>) -> Result<Self, SourceError> {
        Self::with_timeout(url, Duration::from_secs(30))
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()?;
        Ok(Self::with_client(client, url))
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Issue one JSON-RPC call. A JSON `null` result comes back as `Ok(None)`.
    pub(crate) async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<T>, SourceError> {
        rpc_request(&self.client, &self.url, &self.next_id, method, params).await
    }
}

pub(crate) async fn rpc_request<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    next_id: &AtomicU64,
    method: &str,
    params: Value,
) -> Result<Option<T>, SourceError> {
    let id = next_id.fetch_add(1, Ordering::Relaxed);
    let body = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    });

    let response = client.post(url).json(&body).send().await?;
    let status = response.status();
    if status.as_u16() == 429 {
        return Err(SourceError::RateLimited(format!("{method}: HTTP 429")));
    }
    let envelope: RpcEnvelope = response.error_for_status()?.json().await?;

    if let Some(err) = envelope.error {
        return Err(SourceError::Rpc {
            code: err.code,
            message: err.message,
        });
    }
    match envelope.result {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| SourceError::decode(format!("{method}: {e}"))),
    }
}

#[async_trait]
impl LedgerQuery for JsonRpcLedger {
    async fn get_transaction(&self, hash: B256) -> Result<Option<RawTransaction>, SourceError> {
        let tx: Option<RpcTransaction> = self
            .request("eth_getTransactionByHash", json!([hash]))
            .await?;
        Ok(tx.map(RawTransaction::from))
    }

    async fn get_receipt(&self, hash: B256) -> Result<Option<Receipt>, SourceError> {
        let receipt: Option<RpcReceipt> = self
            .request("eth_getTransactionReceipt", json!([hash]))
            .await?;
        Ok(receipt.map(Receipt::from))
    }

    async fn get_bytecode(&self, address: Address) -> Result<Bytes, SourceError> {
        let code: Option<Bytes> = self
            .request("eth_getCode", json!([address, "latest"]))
            .await?;
        Ok(code.unwrap_or_default())
    }

    async fn call(&self, address: Address, selector: Selector) -> Result<Bytes, SourceError> {
        let data = Bytes::copy_from_slice(selector.as_slice());
        let out: Option<Bytes> = self
            .request(
                "eth_call",
                json!([{ "to": address, "data": data }, "latest"]),
            )
            .await?;
        Ok(out.unwrap_or_default())
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Deserialize)]
struct RpcEnvelope {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    hash: B256,
    from: Address,
    to: Option<Address>,
    value: U256,
    input: Bytes,
    #[serde(deserialize_with = "quantity")]
    nonce: u64,
    #[serde(default, deserialize_with = "opt_quantity")]
    block_number: Option<u64>,
    #[serde(deserialize_with = "quantity")]
    gas: u64,
    #[serde(default)]
    gas_price: Option<U256>,
    #[serde(default)]
    max_fee_per_gas: Option<U256>,
    #[serde(default)]
    max_priority_fee_per_gas: Option<U256>,
}

impl From<RpcTransaction> for RawTransaction {
    fn from(tx: RpcTransaction) -> Self {
        RawTransaction {
            hash: tx.hash,
            from: tx.from,
            to: tx.to,
            value: tx.value,
            input: tx.input,
            nonce: tx.nonce,
            block_number: tx.block_number,
            gas_limit: tx.gas,
            gas_price: tx.gas_price,
            max_fee_per_gas: tx.max_fee_per_gas,
            max_priority_fee_per_gas: tx.max_priority_fee_per_gas,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    #[serde(default, deserialize_with = "opt_quantity")]
    status: Option<u64>,
    #[serde(deserialize_with = "quantity")]
    block_number: u64,
    #[serde(deserialize_with = "quantity")]
    gas_used: u64,
    #[serde(default)]
    effective_gas_price: Option<U256>,
    #[serde(default)]
    contract_address: Option<Address>,
    #[serde(default)]
    logs: Vec<RpcLog>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
    #[serde(default, deserialize_with = "opt_quantity")]
    log_index: Option<u64>,
}

impl From<RpcReceipt> for Receipt {
    fn from(r: RpcReceipt) -> Self {
        let logs = r
            .logs
            .into_iter()
            .enumerate()
            .map(|(i, log)| Log {
                address: log.address,
                topics: log.topics,
                data: log.data,
                log_index: log.log_index.unwrap_or(i as u64),
            })
            .collect();
        Receipt {
            // Pre-Byzantium receipts carry a state root instead of a status.
            status: r.status.map_or(true, |s| s == 1),
            block_number: r.block_number,
            gas_used: r.gas_used,
            effective_gas_price: r.effective_gas_price,
            contract_address: r.contract_address,
            logs,
        }
    }
}

pub(crate) fn parse_quantity(raw: &str) -> Result<u64, String> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| format!("quantity without 0x prefix: {raw:?}"))?;
    if digits.is_empty() {
        return Err("empty quantity".to_string());
    }
    u64::from_str_radix(digits, 16).map_err(|e| format!("bad quantity {raw:?}: {e}"))
}

fn quantity<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    let raw = String::deserialize(d)?;
    parse_quantity(&raw).map_err(serde::de::Error::custom)
}

fn opt_quantity<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    match Option::<String>::deserialize(d)? {
        Some(raw) => parse_quantity(&raw).map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantities_parse_hex() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x1b4").unwrap(), 436);
        assert!(parse_quantity("1b4").is_err());
        assert!(parse_quantity("0x").is_err());
    }

    #[test]
    fn receipt_without_status_counts_as_success() {
        let raw = json!({
            "blockNumber": "0x10",
            "gasUsed": "0x5208",
            "logs": [{
                "address": "0x00000000000000000000000000000000000000aa",
                "topics": [],
                "data": "0x"
            }]
        });
        let wire: RpcReceipt = serde_json::from_value(raw).unwrap();
        let receipt = Receipt::from(wire);
        assert!(receipt.status);
        assert_eq!(receipt.block_number, 16);
        assert_eq!(receipt.gas_used, 21_000);
        assert_eq!(receipt.logs[0].log_index, 0);
    }
}

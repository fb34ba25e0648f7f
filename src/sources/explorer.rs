//! Etherscan v2 style block-explorer adapter.
//!
//! All requests share one semaphore so a run never has more than
//! `max_in_flight` explorer requests outstanding.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Semaphore;

use super::{ExplorerService, SourceError};
use crate::chain::{ContractSource, InternalTx, TokenInfo};

const DEFAULT_MAX_IN_FLIGHT: usize = 4;

#[derive(Debug, Clone)]
pub struct EtherscanExplorer {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    chain_id: u64,
    permits: Arc<Semaphore>,
}

impl EtherscanExplorer {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        chain_id: u64,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .gzip(true)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
            chain_id,
            permits: Arc::new(Semaphore::new(DEFAULT_MAX_IN_FLIGHT)),
        })
    }

    /// Issue one request and return the envelope's `result`.
    ///
    /// `Ok(None)` covers the explorer's "nothing here" answers (unverified
    /// contract, no internal transactions).
    async fn get(&self, params: &[(&str, String)]) -> Result<Option<Value>, SourceError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SourceError::Api("explorer semaphore closed".into()))?;

        let mut query: Vec<(&str, String)> = vec![("chainid", self.chain_id.to_string())];
        query.extend(params.iter().cloned());
        if let Some(key) = &self.api_key {
            query.push(("apikey", key.clone()));
        }

        let response = self.client.get(self.base_url.as_str()).query(&query).send().await?;
        if response.status().as_u16() == 429 {
            return Err(SourceError::RateLimited("HTTP 429".into()));
        }
        let envelope: Envelope = response.error_for_status()?.json().await?;
        envelope.into_result()
    }
}

#[derive(Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: Value,
}

impl Envelope {
    fn into_result(self) -> Result<Option<Value>, SourceError> {
        if self.status == "1" {
            return Ok(Some(self.result));
        }
        let detail = match &self.result {
            Value::String(s) => s.clone(),
            _ => self.message.clone(),
        };
        let lowered = format!("{} {}", self.message, detail).to_lowercase();
        if lowered.contains("rate limit") {
            return Err(SourceError::RateLimited(detail));
        }
        if lowered.contains("no transactions found")
            || lowered.contains("not verified")
            || lowered.contains("no records found")
        {
            return Ok(None);
        }
        Err(SourceError::Api(detail))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InternalTxRow {
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    contract_address: String,
    value: String,
    #[serde(default)]
    input: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    is_error: String,
}

impl InternalTxRow {
    fn into_internal_tx(self) -> Result<InternalTx, SourceError> {
        let to = match (self.to.trim(), self.contract_address.trim()) {
            ("", "") => None,
            ("", created) => Some(parse_address(created)?),
            (to, _) => Some(parse_address(to)?),
        };
        let input = match self.input.trim() {
            "" | "0x" => Bytes::new(),
            hex => hex
                .parse::<Bytes>()
                .map_err(|e| SourceError::decode(format!("internal tx input: {e}")))?,
        };
        Ok(InternalTx {
            kind: if self.kind.is_empty() {
                "call".to_string()
            } else {
                self.kind
            },
            from: parse_address(&self.from)?,
            to,
            value: parse_decimal_u256(&self.value)?,
            input,
            is_error: self.is_error == "1",
        })
    }
}

#[derive(Deserialize)]
struct SourceRow {
    #[serde(rename = "SourceCode", default)]
    source_code: String,
    #[serde(rename = "ContractName", default)]
    contract_name: String,
    #[serde(rename = "CompilerVersion", default)]
    compiler_version: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenInfoRow {
    #[serde(default)]
    token_name: String,
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    divisor: String,
}

#[derive(Deserialize)]
struct GasOracle {
    #[serde(rename = "ProposeGasPrice")]
    propose_gas_price: String,
}

fn parse_address(raw: &str) -> Result<Address, SourceError> {
    raw.trim()
        .parse()
        .map_err(|e| SourceError::decode(format!("address {raw:?}: {e}")))
}

fn parse_decimal_u256(raw: &str) -> Result<U256, SourceError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(raw, 10).map_err(|e| SourceError::decode(format!("amount {raw:?}: {e}")))
}

/// Convert a decimal gwei string such as "12.5" to wei.
pub(crate) fn gwei_to_wei(raw: &str) -> Result<U256, SourceError> {
    let raw = raw.trim();
    let (whole, frac) = raw.split_once('.').unwrap_or((raw, ""));
    if frac.len() > 9 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(SourceError::decode(format!("gas price {raw:?}")));
    }
    let padded = format!("{}{:0<9}", if whole.is_empty() { "0" } else { whole }, frac);
    parse_decimal_u256(&padded)
}

fn first_row<T: for<'de> Deserialize<'de>>(value: Value) -> Result<Option<T>, SourceError> {
    let rows: Vec<T> =
        serde_json::from_value(value).map_err(|e| SourceError::decode(e.to_string()))?;
    Ok(rows.into_iter().next())
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[async_trait]
impl ExplorerService for EtherscanExplorer {
    async fn internal_transactions(&self, hash: B256) -> Result<Vec<InternalTx>, SourceError> {
        let result = self
            .get(&[
                ("module", "account".into()),
                ("action", "txlistinternal".into()),
                ("txhash", hash.to_string()),
            ])
            .await?;
        let Some(result) = result else {
            return Ok(Vec::new());
        };
        let rows: Vec<InternalTxRow> =
            serde_json::from_value(result).map_err(|e| SourceError::decode(e.to_string()))?;
        rows.into_iter().map(InternalTxRow::into_internal_tx).collect()
    }

    async fn contract_abi(&self, address: Address) -> Result<Option<String>, SourceError> {
        let result = self
            .get(&[
                ("module", "contract".into()),
                ("action", "getabi".into()),
                ("address", address.to_string()),
            ])
            .await?;
        Ok(result.and_then(|v| match v {
            Value::String(abi) => non_empty(abi),
            _ => None,
        }))
    }

    async fn contract_source(
        &self,
        address: Address,
    ) -> Result<Option<ContractSource>, SourceError> {
        let result = self
            .get(&[
                ("module", "contract".into()),
                ("action", "getsourcecode".into()),
                ("address", address.to_string()),
            ])
            .await?;
        let Some(result) = result else {
            return Ok(None);
        };
        let Some(row) = first_row::<SourceRow>(result)? else {
            return Ok(None);
        };
        // Unverified contracts come back as a row with empty source.
        let Some(source) = non_empty(row.source_code) else {
            return Ok(None);
        };
        Ok(Some(ContractSource {
            contract_name: row.contract_name,
            compiler_version: non_empty(row.compiler_version),
            source,
        }))
    }

    async fn token_info(&self, address: Address) -> Result<Option<TokenInfo>, SourceError> {
        let result = self
            .get(&[
                ("module", "token".into()),
                ("action", "tokeninfo".into()),
                ("contractaddress", address.to_string()),
            ])
            .await?;
        let Some(result) = result else {
            return Ok(None);
        };
        let Some(row) = first_row::<TokenInfoRow>(result)? else {
            return Ok(None);
        };
        let info = TokenInfo {
            name: non_empty(row.token_name),
            symbol: non_empty(row.symbol),
            decimals: row.divisor.trim().parse().ok(),
        };
        Ok((!info.is_empty()).then_some(info))
    }

    /// The gas oracle only reports current prices; `block` is not sent.
    async fn gas_price_reference(&self, _block: u64) -> Result<Option<U256>, SourceError> {
        let result = self
            .get(&[
                ("module", "gastracker".into()),
                ("action", "gasoracle".into()),
            ])
            .await?;
        let Some(result) = result else {
            return Ok(None);
        };
        let oracle: GasOracle =
            serde_json::from_value(result).map_err(|e| SourceError::decode(e.to_string()))?;
        gwei_to_wei(&oracle.propose_gas_price).map(Some)
    }
}

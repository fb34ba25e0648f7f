//! Extract stage: the mandatory ledger fetch, then every optional source
//! probed concurrently and fused into one view.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::chain::{RawTransaction, Receipt, TokenInfo};
use crate::config::{AnalyzerConfig, GasPolicy};
use crate::context::{ContextUpdate, RunContext};
use crate::decode::{decode_call, DecodedCall};
use crate::error::AnalysisError;
use crate::flows::{extract_token_flows, token_contracts};
use crate::pipeline::Stage;
use crate::progress::{ProgressEvent, ProgressHandle};
use crate::sources::selectors::selector_for;
use crate::sources::{
    probe, probe_optional, SourceError, SourceKind, Sourced, Sources, Unavailable,
};

// =============================================================================
// GAS CONTEXT
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GasFlag {
    Normal,
    High,
    Low,
    /// No reference price to compare against.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GasContext {
    pub effective_gas_price: Option<U256>,
    pub reference_gas_price: Option<U256>,
    pub ratio: Option<f64>,
    pub flag: GasFlag,
}

impl GasContext {
    pub fn is_abnormal(&self) -> bool {
        matches!(self.flag, GasFlag::High | GasFlag::Low)
    }

    pub fn describe(&self) -> String {
        let gwei = |wei: &U256| crate::flows::format_units(*wei, 9);
        let effective = self
            .effective_gas_price
            .as_ref()
            .map(|p| format!("{} gwei", gwei(p)))
            .unwrap_or_else(|| "unknown".to_string());
        let reference = self
            .reference_gas_price
            .as_ref()
            .map(|p| format!("{} gwei", gwei(p)))
            .unwrap_or_else(|| "unknown".to_string());
        let flag = match self.flag {
            GasFlag::Normal => "normal",
            GasFlag::High => "abnormally high",
            GasFlag::Low => "abnormally low",
            GasFlag::Unknown => "unknown",
        };
        match self.ratio {
            Some(ratio) => format!(
                "effective price {effective}, reference {reference}, ratio {ratio:.2} ({flag})"
            ),
            None => format!("effective price {effective}, reference {reference} ({flag})"),
        }
    }
}

fn to_f64(value: U256) -> f64 {
    value.to_string().parse().unwrap_or(f64::NAN)
}

/// Compare the paid price with the reference under `policy`.
pub fn classify_gas(
    effective: Option<U256>,
    reference: Option<U256>,
    policy: &GasPolicy,
) -> GasContext {
    let ratio = match (effective, reference) {
        (Some(paid), Some(reference)) if reference > U256::ZERO => {
            Some(to_f64(paid) / to_f64(reference))
        }
        _ => None,
    };
    let flag = match ratio {
        Some(r) if r > policy.high_ratio => GasFlag::High,
        Some(r) if r < policy.low_ratio => GasFlag::Low,
        Some(r) if r.is_finite() => GasFlag::Normal,
        _ => GasFlag::Unknown,
    };
    GasContext {
        effective_gas_price: effective,
        reference_gas_price: reference,
        ratio,
        flag,
    }
}

// =============================================================================
// TOKEN METADATA
// =============================================================================

fn decode_string_result(data: &[u8]) -> Option<String> {
    if let Ok(DynSolValue::String(s)) = DynSolType::String.abi_decode(data) {
        let s = s.trim();
        if !s.is_empty() {
            return Some(s.to_string());
        }
    }
    // Some older tokens return bytes32 instead of string. A bytes32 word can
    // also pass as an empty ABI string, so a blank decode falls through.
    if data.len() == 32 {
        let end = data.iter().position(|b| *b == 0).unwrap_or(32);
        let s = std::str::from_utf8(&data[..end]).ok()?.trim().to_string();
        return (!s.is_empty()).then_some(s);
    }
    None
}

fn decode_decimals(data: &[u8]) -> Option<u8> {
    match DynSolType::Uint(8).abi_decode(data) {
        Ok(DynSolValue::Uint(value, _)) => u8::try_from(value).ok(),
        _ => None,
    }
}

// =============================================================================
// STAGE
// =============================================================================

pub struct ExtractStage {
    sources: Sources,
    source_timeout: Duration,
    ledger_timeout: Duration,
    max_token_contracts: usize,
    token_concurrency: usize,
    gas_policy: GasPolicy,
}

/// Output of the concurrent optional phase, before it is folded into an update.
struct OptionalFacts {
    decoded_call: Option<DecodedCall>,
    abi_verified: bool,
    explorer_internal: Sourced<Vec<crate::chain::InternalTx>>,
    trace: Sourced<crate::calltrace::CallTraceNode>,
    token_metadata: BTreeMap<Address, TokenInfo>,
    gas_reference: Sourced<Option<U256>>,
    unavailable: Vec<Unavailable>,
}

impl ExtractStage {
    pub fn new(sources: Sources, config: &AnalyzerConfig) -> Self {
        Self {
            sources,
            source_timeout: config.source_timeout,
            ledger_timeout: config.ledger_timeout,
            max_token_contracts: config.max_token_contracts,
            token_concurrency: config.token_concurrency,
            gas_policy: config.gas_policy,
        }
    }

    async fn fetch_mandatory(
        &self,
        hash: B256,
    ) -> Result<(RawTransaction, Receipt), AnalysisError> {
        let ledger = &self.sources.ledger;
        let fetch = async {
            tokio::try_join!(ledger.get_transaction(hash), ledger.get_receipt(hash))
        };
        let (tx, receipt) = match tokio::time::timeout(self.ledger_timeout, fetch).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(err)) => {
                return Err(AnalysisError::mandatory_fetch(format!("ledger: {err}")));
            }
            Err(_) => {
                return Err(AnalysisError::mandatory_fetch(format!(
                    "ledger: {}",
                    SourceError::Timeout(self.ledger_timeout)
                )));
            }
        };
        match (tx, receipt) {
            (Some(tx), Some(receipt)) => Ok((tx, receipt)),
            (None, _) => Err(AnalysisError::mandatory_fetch(format!(
                "transaction {hash} not found"
            ))),
            (Some(_), None) => Err(AnalysisError::mandatory_fetch(format!(
                "receipt for {hash} not found"
            ))),
        }
    }

    /// Verified ABI first, selector database second. Creation and empty
    /// calldata have nothing to decode.
    async fn decode_top_level(
        &self,
        tx: &RawTransaction,
    ) -> (Option<DecodedCall>, bool, Vec<Unavailable>) {
        let mut unavailable = Vec::new();
        let Some(to) = tx.to else {
            return (None, false, unavailable);
        };
        if tx.input.len() < 4 {
            return (None, false, unavailable);
        }

        let ledger = Arc::clone(&self.sources.ledger);
        let code = probe(SourceKind::Ledger, "get_bytecode", self.source_timeout, async move {
            ledger.get_bytecode(to).await
        })
        .await;
        let has_code = match code {
            Sourced::Available(code) => !code.is_empty(),
            Sourced::Unavailable(u) => {
                unavailable.push(u);
                false
            }
        };

        let mut abi = None;
        if has_code {
            if let Some(explorer) = &self.sources.explorer {
                let explorer = Arc::clone(explorer);
                match probe(SourceKind::Explorer, "contract_abi", self.source_timeout, async move {
                    explorer.contract_abi(to).await
                })
                .await
                {
                    Sourced::Available(found) => abi = found,
                    Sourced::Unavailable(u) => unavailable.push(u),
                }
            }
        }

        let decoded = decode_call(&tx.input, abi.as_deref(), &self.sources.selectors);
        let abi_verified = decoded
            .as_ref()
            .is_some_and(|c| c.source == crate::decode::DecodeSource::Abi);
        (decoded, abi_verified, unavailable)
    }

    async fn token_call(&self, token: Address, signature: &'static str) -> Sourced<Bytes> {
        let ledger = Arc::clone(&self.sources.ledger);
        let selector = selector_for(signature);
        probe(SourceKind::Ledger, "call", self.source_timeout, async move {
            ledger.call(token, selector).await
        })
        .await
    }

    /// On-chain read first; the explorer only when that yields nothing.
    async fn token_info(&self, token: Address) -> (TokenInfo, Vec<Unavailable>) {
        let mut unavailable = Vec::new();
        let (name, symbol, decimals) = tokio::join!(
            self.token_call(token, "name()"),
            self.token_call(token, "symbol()"),
            self.token_call(token, "decimals()"),
        );
        let mut take = |sourced: Sourced<Bytes>| -> Option<Bytes> {
            let (value, diag) = sourced.split();
            unavailable.extend(diag);
            value
        };
        let info = TokenInfo {
            name: take(name).and_then(|b| decode_string_result(&b)),
            symbol: take(symbol).and_then(|b| decode_string_result(&b)),
            decimals: take(decimals).and_then(|b| decode_decimals(&b)),
        };
        if !info.is_empty() {
            return (info, unavailable);
        }

        let Some(explorer) = &self.sources.explorer else {
            return (info, unavailable);
        };
        let explorer = Arc::clone(explorer);
        match probe(SourceKind::Explorer, "token_info", self.source_timeout, async move {
            explorer.token_info(token).await
        })
        .await
        {
            Sourced::Available(Some(found)) => (found, unavailable),
            Sourced::Available(None) => (info, unavailable),
            Sourced::Unavailable(u) => {
                unavailable.push(u);
                (info, unavailable)
            }
        }
    }

    async fn token_metadata(
        &self,
        tokens: &[Address],
    ) -> (BTreeMap<Address, TokenInfo>, Vec<Unavailable>) {
        // `buffered` keeps input order, so diagnostics stay deterministic.
        let results: Vec<(Address, TokenInfo, Vec<Unavailable>)> =
            stream::iter(tokens.iter().copied())
                .map(|token| async move {
                    let (info, unavailable) = self.token_info(token).await;
                    (token, info, unavailable)
                })
                .buffered(self.token_concurrency.max(1))
                .collect()
                .await;

        let mut metadata = BTreeMap::new();
        let mut unavailable = Vec::new();
        for (token, info, diag) in results {
            unavailable.extend(diag);
            if !info.is_empty() {
                metadata.insert(token, info);
            }
        }
        (metadata, unavailable)
    }

    async fn optional_facts(
        &self,
        tx: &RawTransaction,
        receipt: &Receipt,
        tokens: &[Address],
    ) -> OptionalFacts {
        let hash = tx.hash;
        let block = receipt.block_number;
        let timeout = self.source_timeout;

        let explorer_internal = probe_optional(
            self.sources.explorer.as_ref(),
            SourceKind::Explorer,
            "internal_transactions",
            timeout,
            |explorer| async move { explorer.internal_transactions(hash).await },
        );
        let trace = probe_optional(
            self.sources.trace.as_ref(),
            SourceKind::Trace,
            "trace_transaction",
            timeout,
            |service| async move { service.trace_transaction(hash).await },
        );
        let gas_reference = async {
            match &self.sources.explorer {
                Some(explorer) => {
                    let explorer = Arc::clone(explorer);
                    probe(SourceKind::Explorer, "gas_price_reference", timeout, async move {
                        explorer.gas_price_reference(block).await
                    })
                    .await
                }
                None => Sourced::Available(None),
            }
        };

        let (
            (decoded_call, abi_verified, mut unavailable),
            explorer_internal,
            trace,
            (token_metadata, token_unavailable),
            gas_reference,
        ) = tokio::join!(
            self.decode_top_level(tx),
            explorer_internal,
            trace,
            self.token_metadata(tokens),
            gas_reference,
        );
        unavailable.extend(token_unavailable);

        OptionalFacts {
            decoded_call,
            abi_verified,
            explorer_internal,
            trace,
            token_metadata,
            gas_reference,
            unavailable,
        }
    }

    fn collect_labels(
        &self,
        addresses: impl IntoIterator<Item = Address>,
    ) -> BTreeMap<Address, String> {
        addresses
            .into_iter()
            .filter_map(|address| {
                self.sources
                    .labels
                    .lookup_label(address, self.sources.chain_id)
                    .map(|label| (address, label))
            })
            .collect()
    }
}

#[async_trait]
impl Stage for ExtractStage {
    fn name(&self) -> &'static str {
        "extract"
    }

    async fn run(&self, ctx: &RunContext, progress: &ProgressHandle<'_>) -> ContextUpdate {
        let (tx, receipt) = match self.fetch_mandatory(ctx.tx_hash).await {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(run_id = %ctx.run_id, error = %err, "mandatory fetch failed");
                return ContextUpdate::failed(err);
            }
        };
        progress.emit(ProgressEvent::RpcDone {
            block_number: receipt.block_number,
            logs: receipt.logs.len(),
        });

        let flows = extract_token_flows(&receipt.logs);
        let tokens = token_contracts(&flows, self.max_token_contracts);

        progress.emit(ProgressEvent::EtherscanStart);
        let facts = self.optional_facts(&tx, &receipt, &tokens).await;
        let mut unavailable = facts.unavailable;

        let (explorer_internal, diag) = facts.explorer_internal.split();
        unavailable.extend(diag);
        progress.emit(ProgressEvent::EtherscanDone {
            internal_txs: explorer_internal.as_ref().map_or(0, Vec::len),
            abi_verified: facts.abi_verified,
        });

        // The trace probe already ran in the join above; this pair reports its result.
        progress.emit(ProgressEvent::TenderlyStart);
        let (trace, diag) = facts.trace.split();
        unavailable.extend(diag);
        progress.emit(ProgressEvent::TenderlyDone {
            trace_available: trace.is_some(),
            calls: trace.as_ref().map_or(0, |t| t.node_count()),
        });

        let (gas_reference, diag) = facts.gas_reference.split();
        unavailable.extend(diag);
        let effective = receipt.effective_gas_price.or(tx.gas_price);
        let gas_context = classify_gas(effective, gas_reference.flatten(), &self.gas_policy);

        let labels = self.collect_labels(
            std::iter::once(tx.from)
                .chain(tx.to)
                .chain(receipt.contract_address)
                .chain(tokens.iter().copied())
                .chain(flows.iter().flat_map(|f| [f.from, f.to]))
                .chain(
                    explorer_internal
                        .iter()
                        .flatten()
                        .flat_map(|i| std::iter::once(i.from).chain(i.to)),
                ),
        );

        tracing::debug!(
            run_id = %ctx.run_id,
            flows = flows.len(),
            tokens = facts.token_metadata.len(),
            unavailable = unavailable.len(),
            "extract finished"
        );

        ContextUpdate {
            transaction: Some(tx),
            receipt: Some(receipt),
            decoded_call: facts.decoded_call,
            token_flows: Some(flows),
            token_metadata: Some(facts.token_metadata),
            labels: Some(labels),
            gas_context: Some(gas_context),
            simulation_trace: trace,
            explorer_internal_txs: explorer_internal,
            unavailable,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gwei(n: u64) -> Option<U256> {
        Some(U256::from(n) * U256::from(1_000_000_000u64))
    }

    #[test]
    fn gas_flags_follow_policy() {
        let policy = GasPolicy::default();
        assert_eq!(classify_gas(gwei(20), gwei(20), &policy).flag, GasFlag::Normal);
        assert_eq!(classify_gas(gwei(61), gwei(20), &policy).flag, GasFlag::High);
        assert_eq!(classify_gas(gwei(1), gwei(20), &policy).flag, GasFlag::Low);
        assert_eq!(classify_gas(gwei(20), None, &policy).flag, GasFlag::Unknown);
        assert_eq!(classify_gas(gwei(20), Some(U256::ZERO), &policy).flag, GasFlag::Unknown);
    }

    #[test]
    fn gas_ratio_is_reported() {
        let ctx = classify_gas(gwei(30), gwei(10), &GasPolicy::default());
        assert_eq!(ctx.ratio, Some(3.0));
        // Exactly at the threshold is still normal.
        assert_eq!(ctx.flag, GasFlag::Normal);
        assert!(!ctx.is_abnormal());
        assert!(ctx.describe().contains("30 gwei"));
    }

    #[test]
    fn token_strings_decode_both_layouts() {
        let encoded = DynSolValue::String("Wrapped Ether".into()).abi_encode();
        assert_eq!(decode_string_result(&encoded).as_deref(), Some("Wrapped Ether"));

        let mut word = [0u8; 32];
        word[..3].copy_from_slice(b"MKR");
        assert_eq!(decode_string_result(&word).as_deref(), Some("MKR"));
        assert_eq!(decode_string_result(&[]), None);
    }

    #[test]
    fn bytes32_symbol_survives_a_blank_string_decode() {
        // A padded word never decodes to the symbol as an ABI string.
        let mut word = [0u8; 32];
        word[..5].copy_from_slice(b"Maker");
        assert_eq!(decode_string_result(&word).as_deref(), Some("Maker"));

        let blank = DynSolValue::String("   ".into()).abi_encode();
        assert_eq!(decode_string_result(&blank), None);
    }

    #[test]
    fn decimals_decode_from_uint_word() {
        let word = U256::from(18u8).to_be_bytes::<32>();
        assert_eq!(decode_decimals(&word), Some(18));
        let too_big = U256::from(300u16).to_be_bytes::<32>();
        assert_eq!(decode_decimals(&too_big), None);
    }
}

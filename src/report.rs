//! The report every run ends in, successful or not.

use std::collections::BTreeMap;

use alloy_primitives::{Address, B256, U256};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::calltrace::AddressInfo;
use crate::classify::PatternType;
use crate::context::{InternalCallOrigin, RunContext};
use crate::decode::DecodedCall;
use crate::error::ErrorDetail;
use crate::extract::GasContext;
use crate::flows::{format_amount, TokenStandard};
use crate::sources::Unavailable;
use crate::verify::VerificationResult;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTokenFlow {
    pub token: Address,
    pub symbol: Option<String>,
    pub from: Address,
    pub to: Address,
    /// Raw amount, or token id for ERC-721.
    pub amount: U256,
    /// Amount scaled by decimals when known.
    pub display_amount: String,
    pub standard: TokenStandard,
    pub log_index: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TechnicalDetails {
    pub run_id: Uuid,
    pub tx_hash: B256,
    pub chain_id: u64,
    pub block_number: Option<u64>,
    pub status: Option<bool>,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub contract_address: Option<Address>,
    pub value: Option<U256>,
    pub gas_used: Option<u64>,
    pub decoded_call: Option<DecodedCall>,
    pub gas: Option<GasContext>,
    pub internal_call_origin: InternalCallOrigin,
    pub internal_calls: usize,
    pub labels: BTreeMap<Address, String>,
    pub addresses: BTreeMap<Address, AddressInfo>,
    pub unavailable_sources: Vec<Unavailable>,
    pub draft_prompt_hash: Option<String>,
    pub error: Option<ErrorDetail>,
    pub generated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalReport {
    pub summary: String,
    pub pattern_type: PatternType,
    pub steps: Vec<String>,
    pub token_flows: Vec<ReportTokenFlow>,
    pub technical_details: TechnicalDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_trace_explanation: Option<String>,
}

impl FinalReport {
    pub fn is_success(&self) -> bool {
        self.technical_details.error.is_none()
    }
}

fn report_flows(ctx: &RunContext) -> Vec<ReportTokenFlow> {
    ctx.token_flows
        .iter()
        .map(|flow| {
            let info = ctx.token_metadata.get(&flow.token);
            let display_amount = match flow.standard {
                TokenStandard::Erc20 => format_amount(flow.amount, info.and_then(|i| i.decimals)),
                TokenStandard::Erc721 => format!("#{}", flow.amount),
            };
            ReportTokenFlow {
                token: flow.token,
                symbol: info.and_then(|i| i.symbol.clone()),
                from: flow.from,
                to: flow.to,
                amount: flow.amount,
                display_amount,
                standard: flow.standard,
                log_index: flow.log_index,
            }
        })
        .collect()
}

/// Assemble the report from whatever the run gathered. Never fails.
pub fn build_report(ctx: &RunContext) -> FinalReport {
    let tx = ctx.transaction();
    let receipt = ctx.receipt.as_ref();

    let (summary, steps) = match (&ctx.error, &ctx.draft) {
        (Some(err), _) => (format!("Analysis failed: {err}"), Vec::new()),
        (None, Some(draft)) => (draft.summary.clone(), draft.steps.clone()),
        (None, None) => (
            format!("No narrative was produced for {}.", ctx.tx_hash),
            Vec::new(),
        ),
    };

    let technical_details = TechnicalDetails {
        run_id: ctx.run_id,
        tx_hash: ctx.tx_hash,
        chain_id: ctx.chain_id,
        block_number: receipt
            .map(|r| r.block_number)
            .or_else(|| tx.and_then(|t| t.block_number)),
        status: receipt.map(|r| r.status),
        from: tx.map(|t| t.from),
        to: tx.and_then(|t| t.to),
        contract_address: receipt.and_then(|r| r.contract_address),
        value: tx.map(|t| t.value),
        gas_used: receipt.map(|r| r.gas_used),
        decoded_call: ctx.decoded_call.clone(),
        gas: ctx.gas_context.clone(),
        internal_call_origin: ctx.internal_calls().origin,
        internal_calls: ctx.internal_calls().calls.len(),
        labels: ctx.labels.clone(),
        addresses: ctx.address_info.clone(),
        unavailable_sources: ctx.unavailable.clone(),
        draft_prompt_hash: ctx.draft_prompt_hash.clone(),
        error: ctx.error.as_ref().map(|e| e.detail()),
        generated_at: Utc::now().to_rfc3339(),
    };

    FinalReport {
        summary,
        pattern_type: ctx.pattern,
        steps,
        token_flows: report_flows(ctx),
        technical_details,
        verification: ctx.verification.clone(),
        call_trace_explanation: ctx.call_trace_explanation.clone(),
    }
}

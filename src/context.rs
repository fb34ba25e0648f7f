//! Per-run accumulator and the partial updates stages hand back.

use std::collections::BTreeMap;

use alloy_primitives::{Address, B256};
use serde::Serialize;
use uuid::Uuid;

use crate::calltrace::{flatten, flatten_internal, AddressInfo, CallTraceNode, FlattenedCall};
use crate::chain::{InternalTx, RawTransaction, Receipt, TokenInfo};
use crate::classify::PatternType;
use crate::decode::DecodedCall;
use crate::error::AnalysisError;
use crate::extract::GasContext;
use crate::flows::TokenFlow;
use crate::narrative::NarrativeDraft;
use crate::sources::Unavailable;
use crate::verify::VerificationResult;

/// Which source the unified internal-call view came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalCallOrigin {
    Trace,
    Explorer,
    #[default]
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FusedCalls {
    pub origin: InternalCallOrigin,
    pub calls: Vec<FlattenedCall>,
}

/// The trace-derived view wins whenever it has any entry; otherwise the explorer
/// list is used as is. The two are never mixed.
pub fn fuse(simulation: &[FlattenedCall], explorer: &[InternalTx]) -> FusedCalls {
    if !simulation.is_empty() {
        FusedCalls {
            origin: InternalCallOrigin::Trace,
            calls: simulation.to_vec(),
        }
    } else if !explorer.is_empty() {
        FusedCalls {
            origin: InternalCallOrigin::Explorer,
            calls: flatten_internal(explorer),
        }
    } else {
        FusedCalls::default()
    }
}

#[derive(Debug)]
pub struct RunContext {
    pub run_id: Uuid,
    pub tx_hash: B256,
    pub chain_id: u64,
    transaction: Option<RawTransaction>,
    pub receipt: Option<Receipt>,
    pub decoded_call: Option<DecodedCall>,
    pub token_flows: Vec<TokenFlow>,
    pub token_metadata: BTreeMap<Address, TokenInfo>,
    pub labels: BTreeMap<Address, String>,
    pub gas_context: Option<GasContext>,
    simulation_trace: Option<CallTraceNode>,
    simulation_calls: Vec<FlattenedCall>,
    explorer_internal_txs: Vec<InternalTx>,
    internal_calls: FusedCalls,
    pub address_info: BTreeMap<Address, AddressInfo>,
    pub pattern: PatternType,
    pub call_trace_explanation: Option<String>,
    pub draft: Option<NarrativeDraft>,
    pub draft_prompt_hash: Option<String>,
    pub verification: Option<VerificationResult>,
    pub error: Option<AnalysisError>,
    pub unavailable: Vec<Unavailable>,
}

impl RunContext {
    pub fn new(run_id: Uuid, tx_hash: B256, chain_id: u64) -> Self {
        Self {
            run_id,
            tx_hash,
            chain_id,
            transaction: None,
            receipt: None,
            decoded_call: None,
            token_flows: Vec::new(),
            token_metadata: BTreeMap::new(),
            labels: BTreeMap::new(),
            gas_context: None,
            simulation_trace: None,
            simulation_calls: Vec::new(),
            explorer_internal_txs: Vec::new(),
            internal_calls: FusedCalls::default(),
            address_info: BTreeMap::new(),
            pattern: PatternType::Unknown,
            call_trace_explanation: None,
            draft: None,
            draft_prompt_hash: None,
            verification: None,
            error: None,
            unavailable: Vec::new(),
        }
    }

    pub fn transaction(&self) -> Option<&RawTransaction> {
        self.transaction.as_ref()
    }

    pub fn simulation_trace(&self) -> Option<&CallTraceNode> {
        self.simulation_trace.as_ref()
    }

    /// Simulation-derived internal-call view.
    pub fn simulation_calls(&self) -> &[FlattenedCall] {
        &self.simulation_calls
    }

    /// Explorer-derived internal-transaction list, as reported.
    pub fn explorer_internal_txs(&self) -> &[InternalTx] {
        &self.explorer_internal_txs
    }

    /// Unified internal-call view.
    pub fn internal_calls(&self) -> &FusedCalls {
        &self.internal_calls
    }

    pub fn label(&self, address: &Address) -> Option<&str> {
        self.labels.get(address).map(String::as_str)
    }

    pub fn apply(&mut self, update: ContextUpdate) {
        if let Some(tx) = update.transaction {
            if self.transaction.is_some() {
                tracing::warn!(run_id = %self.run_id, "ignoring second transaction update");
            } else {
                self.transaction = Some(tx);
            }
        }
        if let Some(receipt) = update.receipt {
            self.receipt = Some(receipt);
        }
        if let Some(call) = update.decoded_call {
            self.decoded_call = Some(call);
        }
        if let Some(flows) = update.token_flows {
            self.token_flows = flows;
        }
        if let Some(metadata) = update.token_metadata {
            self.token_metadata.extend(metadata);
        }
        if let Some(labels) = update.labels {
            self.labels.extend(labels);
        }
        if let Some(gas) = update.gas_context {
            self.gas_context = Some(gas);
        }

        let mut refuse = false;
        if let Some(trace) = update.simulation_trace {
            self.simulation_calls = flatten(&trace);
            self.simulation_trace = Some(trace);
            refuse = true;
        }
        if let Some(list) = update.explorer_internal_txs {
            self.explorer_internal_txs = list;
            refuse = true;
        }
        if refuse {
            self.internal_calls = fuse(&self.simulation_calls, &self.explorer_internal_txs);
        }

        if let Some(info) = update.address_info {
            self.address_info.extend(info);
        }
        if let Some(pattern) = update.pattern {
            self.pattern = pattern;
        }
        if let Some(explanation) = update.call_trace_explanation {
            self.call_trace_explanation = Some(explanation);
        }
        if let Some(draft) = update.draft {
            self.draft = Some(draft);
        }
        if let Some(hash) = update.draft_prompt_hash {
            self.draft_prompt_hash = Some(hash);
        }
        if let Some(verification) = update.verification {
            self.verification = Some(verification);
        }
        if let Some(error) = update.error {
            // The first fatal error is the one reported.
            if self.error.is_none() {
                self.error = Some(error);
            }
        }
        self.unavailable.extend(update.unavailable);
    }
}

/// Partial update returned by a stage. `None` fields leave the context alone.
#[derive(Debug, Default)]
pub struct ContextUpdate {
    pub transaction: Option<RawTransaction>,
    pub receipt: Option<Receipt>,
    pub decoded_call: Option<DecodedCall>,
    pub token_flows: Option<Vec<TokenFlow>>,
    pub token_metadata: Option<BTreeMap<Address, TokenInfo>>,
    pub labels: Option<BTreeMap<Address, String>>,
    pub gas_context: Option<GasContext>,
    pub simulation_trace: Option<CallTraceNode>,
    pub explorer_internal_txs: Option<Vec<InternalTx>>,
    pub address_info: Option<BTreeMap<Address, AddressInfo>>,
    pub pattern: Option<PatternType>,
    pub call_trace_explanation: Option<String>,
    pub draft: Option<NarrativeDraft>,
    pub draft_prompt_hash: Option<String>,
    pub verification: Option<VerificationResult>,
    pub error: Option<AnalysisError>,
    pub unavailable: Vec<Unavailable>,
}

impl ContextUpdate {
    pub fn failed(error: AnalysisError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }
}

//! In-memory collaborators shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use alloy_primitives::{Address, Bytes, Selector, B256, U256};
use async_trait::async_trait;

use txlens::calltrace::{CallKind, CallTraceNode};
use txlens::chain::{ContractSource, InternalTx, Log, RawTransaction, Receipt, TokenInfo};
use txlens::flows::TRANSFER_TOPIC;
use txlens::narrative::{GenerationError, GenerationRequest, NarrativeGenerator, Purpose};
use txlens::sources::selectors::selector_for;
use txlens::sources::{ExplorerService, LedgerQuery, SourceError, Sources, TraceService};

pub const SENDER: u8 = 0xa1;
pub const ROUTER: u8 = 0xb2;
pub const PAIR: u8 = 0xc3;
pub const TOKEN_IN: u8 = 0xd4;
pub const TOKEN_OUT: u8 = 0xe5;

pub fn addr(n: u8) -> Address {
    Address::with_last_byte(n)
}

pub fn tx_hash() -> String {
    format!("0x{}", "11".repeat(32))
}

pub fn tx_hash_b256() -> B256 {
    B256::repeat_byte(0x11)
}

pub fn transfer_log(token: u8, from: u8, to: u8, amount: u64, index: u64) -> Log {
    Log {
        address: addr(token),
        topics: vec![
            *TRANSFER_TOPIC,
            addr(from).into_word(),
            addr(to).into_word(),
        ],
        data: Bytes::from(U256::from(amount).to_be_bytes::<32>().to_vec()),
        log_index: index,
    }
}

/// Sender swaps TOKEN_IN for TOKEN_OUT through ROUTER and PAIR.
pub fn swap_transaction() -> RawTransaction {
    let selector =
        selector_for("swapExactTokensForTokens(uint256,uint256,address[],address,uint256)");
    RawTransaction {
        hash: tx_hash_b256(),
        from: addr(SENDER),
        to: Some(addr(ROUTER)),
        value: U256::ZERO,
        input: Bytes::copy_from_slice(selector.as_slice()),
        nonce: 7,
        block_number: Some(19_000_000),
        gas_limit: 250_000,
        gas_price: Some(U256::from(30_000_000_000u64)),
        max_fee_per_gas: None,
        max_priority_fee_per_gas: None,
    }
}

pub fn swap_receipt() -> Receipt {
    Receipt {
        status: true,
        block_number: 19_000_000,
        gas_used: 142_000,
        effective_gas_price: Some(U256::from(25_000_000_000u64)),
        contract_address: None,
        logs: vec![
            transfer_log(TOKEN_IN, SENDER, PAIR, 1_000, 0),
            transfer_log(TOKEN_OUT, PAIR, SENDER, 2_000, 1),
        ],
    }
}

pub fn swap_trace() -> CallTraceNode {
    CallTraceNode::new(CallKind::Call, addr(SENDER), Some(addr(ROUTER)))
        .with_child(CallTraceNode::new(
            CallKind::Call,
            addr(ROUTER),
            Some(addr(TOKEN_IN)),
        ))
        .with_child(
            CallTraceNode::new(CallKind::Call, addr(ROUTER), Some(addr(PAIR))).with_child(
                CallTraceNode::new(CallKind::Call, addr(PAIR), Some(addr(TOKEN_OUT))),
            ),
        )
}

// =============================================================================
// Ledger
// =============================================================================

#[derive(Default)]
pub struct FakeLedger {
    pub transaction: Option<RawTransaction>,
    pub receipt: Option<Receipt>,
    pub code: HashMap<Address, Bytes>,
    pub call_results: HashMap<(Address, Selector), Bytes>,
    pub fail_mandatory: bool,
    pub fail_optional: bool,
    /// Never answer the transaction or receipt fetch.
    pub hang_mandatory: bool,
    /// Never answer bytecode or `eth_call` reads.
    pub hang_optional: bool,
    pub requests: AtomicUsize,
}

impl FakeLedger {
    pub fn new(transaction: RawTransaction, receipt: Receipt) -> Self {
        Self {
            transaction: Some(transaction),
            receipt: Some(receipt),
            ..Default::default()
        }
    }

    pub fn with_code(mut self, address: Address) -> Self {
        self.code.insert(address, Bytes::from_static(&[0x60, 0x80, 0x60, 0x40]));
        self
    }

    pub fn with_call(mut self, address: Address, signature: &str, result: Vec<u8>) -> Self {
        self.call_results
            .insert((address, selector_for(signature)), Bytes::from(result));
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerQuery for FakeLedger {
    async fn get_transaction(&self, _hash: B256) -> Result<Option<RawTransaction>, SourceError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.hang_mandatory {
            std::future::pending::<()>().await;
        }
        if self.fail_mandatory {
            return Err(SourceError::Rpc {
                code: -32603,
                message: "internal error".into(),
            });
        }
        Ok(self.transaction.clone())
    }

    async fn get_receipt(&self, _hash: B256) -> Result<Option<Receipt>, SourceError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.hang_mandatory {
            std::future::pending::<()>().await;
        }
        if self.fail_mandatory {
            return Err(SourceError::Rpc {
                code: -32603,
                message: "internal error".into(),
            });
        }
        Ok(self.receipt.clone())
    }

    async fn get_bytecode(&self, address: Address) -> Result<Bytes, SourceError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.hang_optional {
            std::future::pending::<()>().await;
        }
        if self.fail_optional {
            return Err(SourceError::Api("node overloaded".into()));
        }
        Ok(self.code.get(&address).cloned().unwrap_or_default())
    }

    async fn call(&self, address: Address, selector: Selector) -> Result<Bytes, SourceError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.hang_optional {
            std::future::pending::<()>().await;
        }
        if self.fail_optional {
            return Err(SourceError::Api("node overloaded".into()));
        }
        self.call_results
            .get(&(address, selector))
            .cloned()
            .ok_or(SourceError::Rpc {
                code: 3,
                message: "execution reverted".into(),
            })
    }
}

// =============================================================================
// Trace and explorer
// =============================================================================

pub struct FakeTrace {
    pub root: Option<CallTraceNode>,
}

#[async_trait]
impl TraceService for FakeTrace {
    async fn trace_transaction(&self, _hash: B256) -> Result<CallTraceNode, SourceError> {
        self.root.clone().ok_or(SourceError::Rpc {
            code: -32000,
            message: "transaction not found".into(),
        })
    }
}

pub struct HangingTrace;

#[async_trait]
impl TraceService for HangingTrace {
    async fn trace_transaction(&self, _hash: B256) -> Result<CallTraceNode, SourceError> {
        std::future::pending().await
    }
}

#[derive(Default)]
pub struct FakeExplorer {
    pub internal: Vec<InternalTx>,
    pub abis: HashMap<Address, String>,
    pub sources: HashMap<Address, ContractSource>,
    pub tokens: HashMap<Address, TokenInfo>,
    pub gas_reference: Option<U256>,
    pub fail: bool,
}

impl FakeExplorer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn check(&self) -> Result<(), SourceError> {
        if self.fail {
            Err(SourceError::RateLimited("Max rate limit reached".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ExplorerService for FakeExplorer {
    async fn internal_transactions(&self, _hash: B256) -> Result<Vec<InternalTx>, SourceError> {
        self.check()?;
        Ok(self.internal.clone())
    }

    async fn contract_abi(&self, address: Address) -> Result<Option<String>, SourceError> {
        self.check()?;
        Ok(self.abis.get(&address).cloned())
    }

    async fn contract_source(
        &self,
        address: Address,
    ) -> Result<Option<ContractSource>, SourceError> {
        self.check()?;
        Ok(self.sources.get(&address).cloned())
    }

    async fn token_info(&self, address: Address) -> Result<Option<TokenInfo>, SourceError> {
        self.check()?;
        Ok(self.tokens.get(&address).cloned())
    }

    async fn gas_price_reference(&self, _block: u64) -> Result<Option<U256>, SourceError> {
        self.check()?;
        Ok(self.gas_reference)
    }
}

// =============================================================================
// Text generation
// =============================================================================

pub const DRAFT_REPLY: &str = "SUMMARY: The sender swapped 1000 of one token for 2000 of another.\n\
1. The sender called the router.\n\
2. The pair sent the output token back.";

/// Scripted replies per purpose. A purpose listed in `failing` errors instead.
pub struct FakeGenerator {
    pub draft: String,
    pub explain: String,
    pub verify: String,
    pub failing: Vec<Purpose>,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl Default for FakeGenerator {
    fn default() -> Self {
        Self {
            draft: DRAFT_REPLY.to_string(),
            explain: "The router pulled the input token and swapped through the pair.".into(),
            verify: "OK".into(),
            failing: Vec::new(),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl FakeGenerator {
    pub fn failing(purposes: &[Purpose]) -> Self {
        Self {
            failing: purposes.to_vec(),
            ..Default::default()
        }
    }

    pub fn purposes(&self) -> Vec<Purpose> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.purpose)
            .collect()
    }
}

#[async_trait]
impl NarrativeGenerator for FakeGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.failing.contains(&request.purpose) {
            return Err(GenerationError::Other("model unavailable".into()));
        }
        Ok(match request.purpose {
            Purpose::Draft => self.draft.clone(),
            Purpose::CallTraceExplain => self.explain.clone(),
            Purpose::Verify => self.verify.clone(),
        })
    }
}

// =============================================================================
// Wiring
// =============================================================================

pub fn full_sources(ledger: Arc<FakeLedger>) -> Sources {
    let explorer = FakeExplorer {
        gas_reference: Some(U256::from(20_000_000_000u64)),
        ..Default::default()
    };
    Sources::new(1, ledger)
        .with_trace(Arc::new(FakeTrace {
            root: Some(swap_trace()),
        }))
        .with_explorer(Arc::new(explorer))
}

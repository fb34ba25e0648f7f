//! Data-source collaborators and the boundary where their failures are absorbed.
//!
//! Every adapter returns `Result<_, SourceError>`. The extract and enrichment
//! stages never see those errors directly: optional calls go through [`probe`],
//! which turns a failure or timeout into [`Sourced::Unavailable`].

pub mod explorer;
pub mod labels;
pub mod rpc;
pub mod selectors;
pub mod simulation;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, Selector, B256};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::calltrace::CallTraceNode;
use crate::chain::{ContractSource, InternalTx, RawTransaction, Receipt, TokenInfo};

pub use explorer::EtherscanExplorer;
pub use labels::OfflineLabelStore;
pub use rpc::JsonRpcLedger;
pub use selectors::SelectorDatabase;
pub use simulation::RpcTraceService;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("explorer error: {0}")]
    Api(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("not configured")]
    NotConfigured,
}

impl SourceError {
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }
}

// =============================================================================
// SOURCED
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Ledger,
    Trace,
    Explorer,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Ledger => "ledger",
            SourceKind::Trace => "trace",
            SourceKind::Explorer => "explorer",
        }
    }
}

/// Diagnostic left behind when an optional source could not answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unavailable {
    pub source: SourceKind,
    pub operation: &'static str,
    pub reason: String,
}

impl Unavailable {
    pub fn not_configured(source: SourceKind, operation: &'static str) -> Self {
        Self {
            source,
            operation,
            reason: SourceError::NotConfigured.to_string(),
        }
    }
}

/// Result of an optional source call.
#[derive(Debug, Clone, PartialEq)]
pub enum Sourced<T> {
    Available(T),
    Unavailable(Unavailable),
}

impl<T> Sourced<T> {
    /// Split into the value and, on failure, its diagnostic.
    pub fn split(self) -> (Option<T>, Option<Unavailable>) {
        match self {
            Sourced::Available(v) => (Some(v), None),
            Sourced::Unavailable(u) => (None, Some(u)),
        }
    }
}

/// Run an optional source call under a timeout, absorbing any failure.
pub async fn probe<T, F>(
    source: SourceKind,
    operation: &'static str,
    limit: Duration,
    call: F,
) -> Sourced<T>
where
    F: Future<Output = Result<T, SourceError>>,
{
    let err = match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => return Sourced::Available(value),
        Ok(Err(err)) => err,
        Err(_) => SourceError::Timeout(limit),
    };
    tracing::warn!(
        source = source.as_str(),
        operation,
        error = %err,
        "source unavailable"
    );
    Sourced::Unavailable(Unavailable {
        source,
        operation,
        reason: err.to_string(),
    })
}

/// Like [`probe`] for an optional collaborator that may not be wired at all.
pub async fn probe_optional<S: ?Sized, T, F, Fut>(
    service: Option<&Arc<S>>,
    source: SourceKind,
    operation: &'static str,
    limit: Duration,
    call: F,
) -> Sourced<T>
where
    F: FnOnce(Arc<S>) -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    match service {
        Some(service) => probe(source, operation, limit, call(Arc::clone(service))).await,
        None => Sourced::Unavailable(Unavailable::not_configured(source, operation)),
    }
}

// =============================================================================
// TRAITS
// =============================================================================

#[async_trait]
pub trait LedgerQuery: Send + Sync {
    /// `Ok(None)` when the node does not know the hash.
    async fn get_transaction(&self, hash: B256) -> Result<Option<RawTransaction>, SourceError>;

    async fn get_receipt(&self, hash: B256) -> Result<Option<Receipt>, SourceError>;

    /// Deployed bytecode; empty for externally owned accounts.
    async fn get_bytecode(&self, address: Address) -> Result<Bytes, SourceError>;

    /// Read-only call of a zero-argument function identified by `selector`.
    async fn call(&self, address: Address, selector: Selector) -> Result<Bytes, SourceError>;
}

#[async_trait]
pub trait TraceService: Send + Sync {
    async fn trace_transaction(&self, hash: B256) -> Result<CallTraceNode, SourceError>;
}

#[async_trait]
pub trait ExplorerService: Send + Sync {
    async fn internal_transactions(&self, hash: B256) -> Result<Vec<InternalTx>, SourceError>;

    /// Verified ABI as raw JSON, `None` when the contract is not verified.
    async fn contract_abi(&self, address: Address) -> Result<Option<String>, SourceError>;

    async fn contract_source(&self, address: Address)
        -> Result<Option<ContractSource>, SourceError>;

    async fn token_info(&self, address: Address) -> Result<Option<TokenInfo>, SourceError>;

    /// Reference gas price in wei around `block`.
    async fn gas_price_reference(
        &self,
        block: u64,
    ) -> Result<Option<alloy_primitives::U256>, SourceError>;
}

/// Offline address labels. Lookups never touch the network.
pub trait LabelStore: Send + Sync {
    fn lookup_label(&self, address: Address, chain_id: u64) -> Option<String>;
}

/// The full set of data collaborators for one chain.
#[derive(Clone)]
pub struct Sources {
    pub chain_id: u64,
    pub ledger: Arc<dyn LedgerQuery>,
    pub trace: Option<Arc<dyn TraceService>>,
    pub explorer: Option<Arc<dyn ExplorerService>>,
    pub labels: Arc<dyn LabelStore>,
    pub selectors: Arc<SelectorDatabase>,
}

impl Sources {
    pub fn new(chain_id: u64, ledger: Arc<dyn LedgerQuery>) -> Self {
        Self {
            chain_id,
            ledger,
            trace: None,
            explorer: None,
            labels: Arc::new(OfflineLabelStore::builtin()),
            selectors: Arc::new(SelectorDatabase::builtin()),
        }
    }

    pub fn with_trace(mut self, trace: Arc<dyn TraceService>) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn with_explorer(mut self, explorer: Arc<dyn ExplorerService>) -> Self {
        self.explorer = Some(explorer);
        self
    }

    pub fn with_labels(mut self, labels: Arc<dyn LabelStore>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_selectors(mut self, selectors: Arc<SelectorDatabase>) -> Self {
        self.selectors = selectors;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_turns_errors_into_unavailable() {
        let sourced: Sourced<u32> = probe(
            SourceKind::Explorer,
            "token_info",
            Duration::from_secs(1),
            async { Err(SourceError::RateLimited("Max rate limit reached".into())) },
        )
        .await;
        let (value, diag) = sourced.split();
        assert!(value.is_none());
        let diag = diag.unwrap();
        assert_eq!(diag.operation, "token_info");
        assert!(diag.reason.contains("rate limited"));
    }

    #[tokio::test(start_paused = true)]
    async fn probe_times_out() {
        let sourced: Sourced<u32> = probe(
            SourceKind::Trace,
            "trace_transaction",
            Duration::from_millis(50),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(1)
            },
        )
        .await;
        match sourced {
            Sourced::Unavailable(u) => assert!(u.reason.starts_with("timed out")),
            Sourced::Available(_) => panic!("expected timeout"),
        }
    }

    #[tokio::test]
    async fn probe_optional_without_service_is_not_configured() {
        let missing: Option<&Arc<dyn TraceService>> = None;
        let sourced = probe_optional(
            missing,
            SourceKind::Trace,
            "trace_transaction",
            Duration::from_secs(1),
            |svc| async move { svc.trace_transaction(B256::ZERO).await },
        )
        .await;
        assert_eq!(
            sourced,
            Sourced::Unavailable(Unavailable::not_configured(
                SourceKind::Trace,
                "trace_transaction"
            ))
        );
    }
}

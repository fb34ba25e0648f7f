#![forbid(unsafe_code)]

//! # txlens
//!
//! Explain a blockchain transaction in plain language.
//!
//! A run fetches the transaction and receipt from a ledger node, then probes
//! the optional sources (an execution-trace node, a block explorer, offline
//! label and selector tables) concurrently. Anything an optional source cannot
//! deliver is recorded as unavailable and the run carries on with less detail.
//! The facts are fused into one view, the internal calls are enriched and
//! explained, and a text-generation model drafts a narrative that is then
//! fact-checked against numbers taken straight from the ledger.
//!
//! Every run ends in a [`FinalReport`], with progress reported through an
//! optional [`ProgressSink`].

pub mod calltrace;
pub mod chain;
pub mod classify;
pub mod config;
pub mod context;
pub mod decode;
pub mod error;
pub mod extract;
pub mod flows;
pub mod gateway;
pub mod narrative;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod report;
pub mod sources;
pub mod verify;

pub use classify::{HeuristicClassifier, PatternClassifier, PatternType};
pub use config::{AnalyzerConfig, NarratorConfig, SourceEndpoints};
pub use error::AnalysisError;
pub use gateway::{Attribution, ChatGateway, ProviderGateway, UsageSink};
pub use narrative::{GatewayNarrator, GenerationError, GenerationRequest, NarrativeGenerator};
pub use pipeline::{parse_tx_hash, Analyzer, RunState, Stage};
pub use progress::{
    JsonlProgressSink, ProgressError, ProgressEvent, ProgressHandle, ProgressSink,
    ProgressWorker, RecordingSink,
};
pub use report::FinalReport;
pub use sources::{
    EtherscanExplorer, JsonRpcLedger, OfflineLabelStore, RpcTraceService, SelectorDatabase,
    Sources,
};

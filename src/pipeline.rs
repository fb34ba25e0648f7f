//! Staged analysis orchestrator.
//!
//! One run walks Extract → call-trace enrichment → Draft → Verify, merging each
//! stage's partial update into the run context. A stage that records a fatal
//! error sends the run straight to finalizing. Every path ends in a
//! [`FinalReport`] and exactly one terminal progress event.

use std::sync::Arc;
use std::time::Instant;

use alloy_primitives::B256;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::calltrace::CallTraceStage;
use crate::classify::{HeuristicClassifier, PatternClassifier};
use crate::config::AnalyzerConfig;
use crate::context::{ContextUpdate, RunContext};
use crate::error::AnalysisError;
use crate::extract::ExtractStage;
use crate::narrative::{DraftStage, NarrativeGenerator};
use crate::progress::{ProgressEvent, ProgressHandle, ProgressSink};
use crate::report::{build_report, FinalReport};
use crate::sources::Sources;
use crate::verify::VerifyStage;

static TX_HASH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("Invalid tx hash regex"));

// =============================================================================
// Stage seam
// =============================================================================

/// One step of a run. Stages read the context and hand back a partial update;
/// they never fail past their own boundary.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &RunContext, progress: &ProgressHandle<'_>) -> ContextUpdate;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Extracting,
    Enriching,
    Drafting,
    Verifying,
    Finalizing,
    Done { success: bool },
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Extracting => "extracting",
            RunState::Enriching => "enriching",
            RunState::Drafting => "drafting",
            RunState::Verifying => "verifying",
            RunState::Finalizing => "finalizing",
            RunState::Done { success: true } => "done",
            RunState::Done { success: false } => "done_with_error",
        }
    }
}

fn transition(state: &mut RunState, next: RunState, run_id: Uuid) {
    tracing::debug!(%run_id, from = state.as_str(), to = next.as_str(), "run state");
    *state = next;
}

/// Parse `0x` + 64 hex characters.
pub fn parse_tx_hash(input: &str) -> Result<B256, AnalysisError> {
    let trimmed = input.trim();
    if !TX_HASH.is_match(trimmed) {
        return Err(AnalysisError::input(format!(
            "transaction hash must be 0x followed by 64 hex characters, got {input:?}"
        )));
    }
    trimmed
        .parse::<B256>()
        .map_err(|e| AnalysisError::input(format!("invalid transaction hash: {e}")))
}

// =============================================================================
// Analyzer
// =============================================================================

pub struct Analyzer {
    sources: Sources,
    generator: Arc<dyn NarrativeGenerator>,
    classifier: Arc<dyn PatternClassifier>,
    config: AnalyzerConfig,
}

impl Analyzer {
    pub fn new(
        sources: Sources,
        generator: Arc<dyn NarrativeGenerator>,
        config: AnalyzerConfig,
    ) -> Self {
        Self {
            sources,
            generator,
            classifier: Arc::new(HeuristicClassifier),
            config,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn PatternClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    fn validate(&self, tx_hash: &str, chain_id: u64) -> Result<B256, AnalysisError> {
        let hash = parse_tx_hash(tx_hash)?;
        if !self.config.supports_chain(chain_id) {
            return Err(AnalysisError::input(format!(
                "unsupported chain id {chain_id}"
            )));
        }
        if chain_id != self.sources.chain_id {
            return Err(AnalysisError::input(format!(
                "chain id {chain_id} does not match the configured sources (chain {})",
                self.sources.chain_id
            )));
        }
        Ok(hash)
    }

    fn stages(&self) -> Vec<(RunState, Box<dyn Stage>)> {
        vec![
            (
                RunState::Extracting,
                Box::new(ExtractStage::new(self.sources.clone(), &self.config)),
            ),
            (
                RunState::Enriching,
                Box::new(CallTraceStage::new(
                    &self.sources,
                    Arc::clone(&self.generator),
                    &self.config,
                )),
            ),
            (
                RunState::Drafting,
                Box::new(DraftStage::new(
                    Arc::clone(&self.generator),
                    Arc::clone(&self.classifier),
                    self.config.stream_draft,
                )),
            ),
            (
                RunState::Verifying,
                Box::new(VerifyStage::new(
                    Arc::clone(&self.generator),
                    self.config.verification_enabled,
                )),
            ),
        ]
    }

    /// Analyze one transaction. Always returns a report; failures are carried in
    /// `technical_details.error`.
    pub async fn run(
        &self,
        tx_hash: &str,
        chain_id: u64,
        sink: Option<&dyn ProgressSink>,
    ) -> FinalReport {
        let run_id = Uuid::new_v4();
        let progress = ProgressHandle::new(run_id, sink);
        let started = Instant::now();
        let mut state = RunState::Idle;

        // Malformed input never reaches a source.
        let hash = match self.validate(tx_hash, chain_id) {
            Ok(hash) => hash,
            Err(err) => {
                let mut ctx = RunContext::new(run_id, B256::ZERO, chain_id);
                ctx.apply(ContextUpdate::failed(err));
                transition(&mut state, RunState::Finalizing, run_id);
                return self.finish(ctx, &progress, state, started);
            }
        };

        let mut ctx = RunContext::new(run_id, hash, chain_id);
        for (next, stage) in self.stages() {
            transition(&mut state, next, run_id);
            let update = stage.run(&ctx, &progress).await;
            ctx.apply(update);
            if let Some(err) = &ctx.error {
                tracing::debug!(%run_id, stage = stage.name(), code = err.code(), "stage failed");
                break;
            }
        }

        transition(&mut state, RunState::Finalizing, run_id);
        self.finish(ctx, &progress, state, started)
    }

    fn finish(
        &self,
        ctx: RunContext,
        progress: &ProgressHandle<'_>,
        mut state: RunState,
        started: Instant,
    ) -> FinalReport {
        let report = build_report(&ctx);
        match &ctx.error {
            Some(err) => progress.emit(ProgressEvent::Failed {
                code: err.code().to_string(),
                message: err.message().to_string(),
            }),
            None => progress.emit(ProgressEvent::Done {
                pattern: ctx.pattern,
            }),
        }
        transition(
            &mut state,
            RunState::Done {
                success: ctx.error.is_none(),
            },
            ctx.run_id,
        );

        tracing::info!(
            run_id = %ctx.run_id,
            tx_hash = %ctx.tx_hash,
            chain_id = ctx.chain_id,
            pattern = ctx.pattern.as_str(),
            error = ctx.error.as_ref().map(AnalysisError::code),
            unavailable = ctx.unavailable.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "analysis finished"
        );
        report
    }
}

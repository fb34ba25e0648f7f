use std::sync::Arc;

use async_trait::async_trait;

use super::enrich::{candidate_addresses, enrich_addresses, EnrichLimits, EnrichSources};
use super::explain::explain_calls;
use crate::config::AnalyzerConfig;
use crate::context::{ContextUpdate, RunContext};
use crate::narrative::NarrativeGenerator;
use crate::pipeline::Stage;
use crate::progress::{ProgressEvent, ProgressHandle};
use crate::sources::Sources;

/// Enrich every address in the unified call view, then ask for an explanation.
pub struct CallTraceStage {
    sources: EnrichSources,
    selectors: Arc<crate::sources::SelectorDatabase>,
    generator: Arc<dyn NarrativeGenerator>,
    limits: EnrichLimits,
}

impl CallTraceStage {
    pub fn new(
        sources: &Sources,
        generator: Arc<dyn NarrativeGenerator>,
        config: &AnalyzerConfig,
    ) -> Self {
        Self {
            sources: EnrichSources {
                chain_id: sources.chain_id,
                ledger: Arc::clone(&sources.ledger),
                explorer: sources.explorer.clone(),
                labels: Arc::clone(&sources.labels),
            },
            selectors: Arc::clone(&sources.selectors),
            generator,
            limits: EnrichLimits {
                max_addresses: config.max_enriched_addresses,
                concurrency: config.enrich_concurrency,
                source_char_budget: config.source_char_budget,
                timeout: config.source_timeout,
            },
        }
    }
}

#[async_trait]
impl Stage for CallTraceStage {
    fn name(&self) -> &'static str {
        "calltrace"
    }

    async fn run(&self, ctx: &RunContext, progress: &ProgressHandle<'_>) -> ContextUpdate {
        let calls = &ctx.internal_calls().calls;

        let candidates = candidate_addresses(calls, self.limits.max_addresses);
        progress.emit(ProgressEvent::CalltraceEnrichStart {
            candidates: candidates.len(),
        });
        let enrichment = enrich_addresses(&candidates, &self.sources, self.limits).await;
        let info = enrichment.info;
        let unknown = info.values().filter(|i| i.is_unknown()).count();
        progress.emit(ProgressEvent::CalltraceEnrichDone {
            enriched: info.len() - unknown,
            unknown,
        });

        progress.emit(ProgressEvent::CalltraceExplainStart);
        let explanation =
            explain_calls(self.generator.as_ref(), calls, &info, &self.selectors, ctx.run_id)
                .await;
        progress.emit(ProgressEvent::CalltraceExplainDone {
            explained: explanation.is_some(),
        });

        tracing::debug!(
            run_id = %ctx.run_id,
            origin = ?ctx.internal_calls().origin,
            calls = calls.len(),
            enriched = info.len(),
            unavailable = enrichment.unavailable.len(),
            "call trace stage finished"
        );

        ContextUpdate {
            address_info: Some(info),
            call_trace_explanation: explanation,
            unavailable: enrichment.unavailable,
            ..Default::default()
        }
    }
}

//! Advisory fact-check of the drafted narrative.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::context::{ContextUpdate, RunContext};
use crate::flows::{account_deltas, format_amount, format_units, TokenStandard};
use crate::narrative::{GenerationRequest, NarrativeGenerator, Purpose};
use crate::pipeline::Stage;
use crate::progress::{ProgressEvent, ProgressHandle};
use crate::prompts::VERIFY_TEMPLATE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub passed: bool,
    pub issues: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
}

impl VerificationResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            issues: Vec::new(),
            skipped_reason: None,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            skipped_reason: Some(reason.into()),
            ..Self::pass()
        }
    }
}

/// Bullet lines (`- ` or `* `) are issues. Anything else counts as a pass.
pub fn parse_verification(reply: &str) -> VerificationResult {
    let issues: Vec<String> = reply
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")))
        .map(str::trim)
        .filter(|issue| !issue.is_empty())
        .map(str::to_string)
        .collect();
    VerificationResult {
        passed: issues.is_empty(),
        issues,
        skipped_reason: None,
    }
}

/// Facts taken straight from the ledger data, never from the draft.
pub fn ground_truth_digest(ctx: &RunContext) -> String {
    let mut out = String::new();
    if let Some(receipt) = &ctx.receipt {
        let _ = writeln!(out, "block number: {}", receipt.block_number);
        let _ = writeln!(out, "gas used: {}", receipt.gas_used);
        let _ = writeln!(
            out,
            "status: {}",
            if receipt.status { "success" } else { "reverted" }
        );
    }
    let Some(tx) = ctx.transaction() else {
        return out;
    };
    let _ = writeln!(out, "sender: {}", tx.from);
    match tx.to {
        Some(to) => {
            let _ = writeln!(out, "recipient: {to}");
        }
        None => {
            let _ = writeln!(out, "recipient: none (contract creation)");
        }
    }
    let _ = writeln!(out, "value: {} ETH", format_units(tx.value, 18));

    let deltas = account_deltas(&ctx.token_flows, tx.from, &ctx.token_metadata);
    for delta in deltas {
        let decimals = match delta.standard {
            TokenStandard::Erc20 => ctx.token_metadata.get(&delta.token).and_then(|i| i.decimals),
            TokenStandard::Erc721 => None,
        };
        let token = match &delta.symbol {
            Some(symbol) => format!("{symbol} ({})", delta.token),
            None => delta.token.to_string(),
        };
        let _ = writeln!(
            out,
            "sender {token}: sent {}, received {}, net {}",
            format_amount(delta.sent, decimals),
            format_amount(delta.received, decimals),
            delta.net
        );
    }
    out
}

pub struct VerifyStage {
    generator: Arc<dyn NarrativeGenerator>,
    enabled: bool,
}

impl VerifyStage {
    pub fn new(generator: Arc<dyn NarrativeGenerator>, enabled: bool) -> Self {
        Self { generator, enabled }
    }

    async fn check(&self, ctx: &RunContext) -> VerificationResult {
        if !self.enabled {
            return VerificationResult::pass();
        }
        let Some(draft) = &ctx.draft else {
            return VerificationResult::skipped("no draft");
        };

        let digest = ground_truth_digest(ctx);
        let call_trace = ctx
            .call_trace_explanation
            .as_deref()
            .unwrap_or("not available");
        let prompt = VERIFY_TEMPLATE.render(&[
            ("ground_truth", digest.as_str()),
            ("call_trace", call_trace),
            ("draft", draft.text.as_str()),
        ]);
        let request = GenerationRequest::new(Purpose::Verify, prompt).with_run(ctx.run_id);

        match self.generator.generate(&request).await {
            Ok(reply) => parse_verification(&reply),
            Err(err) => {
                tracing::warn!(run_id = %ctx.run_id, error = %err, "verification skipped");
                VerificationResult::skipped(err.to_string())
            }
        }
    }
}

#[async_trait]
impl Stage for VerifyStage {
    fn name(&self) -> &'static str {
        "verify"
    }

    async fn run(&self, ctx: &RunContext, progress: &ProgressHandle<'_>) -> ContextUpdate {
        progress.emit(ProgressEvent::VerifyStart);
        let result = self.check(ctx).await;
        progress.emit(ProgressEvent::VerifyDone {
            passed: result.passed,
            issues: result.issues.len(),
        });
        ContextUpdate {
            verification: Some(result),
            ..Default::default()
        }
    }
}

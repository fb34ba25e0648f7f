//! Narrative drafting: prompt context assembly, the text-generation seam, and
//! reply parsing.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::classify::{ClassifierInput, PatternClassifier, PatternType};
use crate::config::{chain_name, NarratorConfig};
use crate::context::{ContextUpdate, RunContext};
use crate::error::AnalysisError;
use crate::flows::{account_deltas, format_amount, format_units};
use crate::gateway::{Attribution, ChatGateway, ChatModel, ChatRequest, ProviderError};
use crate::pipeline::Stage;
use crate::progress::{ProgressEvent, ProgressHandle};
use crate::prompts::{PromptInstance, DRAFT_TEMPLATE};

// =============================================================================
// GENERATOR SEAM
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Draft,
    CallTraceExplain,
    Verify,
}

impl Purpose {
    pub fn caller(&self) -> &'static str {
        match self {
            Purpose::Draft => "analysis::draft",
            Purpose::CallTraceExplain => "analysis::calltrace_explain",
            Purpose::Verify => "analysis::verify",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub purpose: Purpose,
    pub prompt: PromptInstance,
    pub run_id: Option<Uuid>,
}

impl GenerationRequest {
    pub fn new(purpose: Purpose, prompt: PromptInstance) -> Self {
        Self {
            purpose,
            prompt,
            run_id: None,
        }
    }

    pub fn with_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("empty reply")]
    Empty,
    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;

    /// Streamed generation. The default delivers the whole reply as one token.
    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<String, GenerationError> {
        let text = self.generate(request).await?;
        on_token(&text);
        Ok(text)
    }
}

/// [`NarrativeGenerator`] over the chat gateway.
pub struct GatewayNarrator {
    gateway: Arc<dyn ChatGateway>,
    config: NarratorConfig,
}

impl GatewayNarrator {
    pub fn new(gateway: Arc<dyn ChatGateway>, config: NarratorConfig) -> Self {
        Self { gateway, config }
    }

    fn chat_request(&self, request: &GenerationRequest) -> ChatRequest {
        let (model, temperature) = match request.purpose {
            Purpose::Verify => (&self.config.verify_model, 0.0),
            Purpose::Draft | Purpose::CallTraceExplain => {
                (&self.config.draft_model, self.config.temperature)
            }
        };
        let attribution = match request.run_id {
            Some(run_id) => Attribution::new(request.purpose.caller()).with_run(run_id),
            None => Attribution::new(request.purpose.caller()),
        };
        ChatRequest::new(
            ChatModel::openrouter(model.clone()),
            request.prompt.to_messages(),
            attribution,
        )
        .temperature(temperature)
        .max_tokens(self.config.max_tokens)
    }
}

#[async_trait]
impl NarrativeGenerator for GatewayNarrator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let resp = self.gateway.chat(self.chat_request(request)).await?;
        if resp.content.trim().is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(resp.content)
    }

    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<String, GenerationError> {
        let resp = self
            .gateway
            .chat_stream(self.chat_request(request), on_token)
            .await?;
        if resp.content.trim().is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(resp.content)
    }
}

// =============================================================================
// REPLY PARSING
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NarrativeDraft {
    pub summary: String,
    pub steps: Vec<String>,
    /// Raw reply, kept for the fact-check pass.
    pub text: String,
}

fn numbered_step(line: &str) -> Option<&str> {
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let rest = &line[digits..];
    let rest = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')'))?;
    rest.starts_with(char::is_whitespace).then(|| rest.trim())
}

/// Parse a `SUMMARY:` line plus numbered steps. Without the marker the whole
/// reply becomes the summary.
pub fn parse_narrative(text: &str) -> NarrativeDraft {
    let mut summary: Option<String> = None;
    let mut steps: Vec<String> = Vec::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let marker = line
            .get(..8)
            .filter(|head| head.eq_ignore_ascii_case("summary:"));
        if marker.is_some() {
            summary = Some(line[8..].trim().to_string());
        } else if let Some(step) = numbered_step(line) {
            steps.push(step.to_string());
        } else if let Some(last) = steps.last_mut() {
            // Wrapped step text.
            last.push(' ');
            last.push_str(line);
        } else if let Some(s) = summary.as_mut() {
            if !s.is_empty() {
                s.push(' ');
            }
            s.push_str(line);
        }
    }

    match summary {
        Some(summary) if !summary.is_empty() => NarrativeDraft {
            summary,
            steps,
            text: text.to_string(),
        },
        _ => NarrativeDraft {
            summary: text.trim().to_string(),
            steps: Vec::new(),
            text: text.to_string(),
        },
    }
}

// =============================================================================
// PROMPT CONTEXT
// =============================================================================

fn named(ctx: &RunContext, address: &alloy_primitives::Address) -> String {
    match ctx.label(address) {
        Some(label) => format!("{address} ({label})"),
        None => address.to_string(),
    }
}

fn render_transaction(ctx: &RunContext) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "hash: {}", ctx.tx_hash);
    let _ = writeln!(
        out,
        "chain: {} ({})",
        ctx.chain_id,
        chain_name(ctx.chain_id).unwrap_or("unknown")
    );
    if let Some(receipt) = &ctx.receipt {
        let _ = writeln!(out, "block: {}", receipt.block_number);
        let _ = writeln!(
            out,
            "status: {}",
            if receipt.status { "success" } else { "reverted" }
        );
        let _ = writeln!(out, "gas used: {}", receipt.gas_used);
    }
    if let Some(tx) = ctx.transaction() {
        let _ = writeln!(out, "from: {}", named(ctx, &tx.from));
        match (&tx.to, ctx.receipt.as_ref().and_then(|r| r.contract_address)) {
            (Some(to), _) => {
                let _ = writeln!(out, "to: {}", named(ctx, to));
            }
            (None, Some(created)) => {
                let _ = writeln!(out, "to: none (contract creation, deployed {created})");
            }
            (None, None) => {
                let _ = writeln!(out, "to: none (contract creation)");
            }
        }
        let _ = writeln!(out, "value: {} ETH", format_units(tx.value, 18));
    }
    out
}

fn render_decoded_call(ctx: &RunContext) -> String {
    let Some(call) = &ctx.decoded_call else {
        return match ctx.transaction() {
            Some(tx) if tx.is_contract_creation() => "none (contract creation)".to_string(),
            _ => "none (no calldata)".to_string(),
        };
    };
    let mut out = String::new();
    let _ = writeln!(
        out,
        "method: {}",
        call.signature.clone().unwrap_or_else(|| call.display_name())
    );
    for (i, arg) in call.arguments.iter().enumerate() {
        let name = arg.name.clone().unwrap_or_else(|| format!("arg{i}"));
        let _ = writeln!(out, "  {name} ({}): {}", arg.ty, arg.value);
    }
    out
}

fn render_token_flows(ctx: &RunContext) -> String {
    if ctx.token_flows.is_empty() {
        return "none".to_string();
    }
    let mut out = String::new();
    for flow in &ctx.token_flows {
        let info = ctx.token_metadata.get(&flow.token);
        let symbol = info
            .and_then(|i| i.symbol.clone())
            .or_else(|| ctx.label(&flow.token).map(str::to_string))
            .unwrap_or_else(|| flow.token.to_string());
        let amount = match flow.standard {
            crate::flows::TokenStandard::Erc20 => {
                format_amount(flow.amount, info.and_then(|i| i.decimals))
            }
            crate::flows::TokenStandard::Erc721 => format!("#{}", flow.amount),
        };
        let _ = writeln!(
            out,
            "{amount} {symbol} from {} to {}",
            named(ctx, &flow.from),
            named(ctx, &flow.to)
        );
    }
    if let Some(tx) = ctx.transaction() {
        let deltas = account_deltas(&ctx.token_flows, tx.from, &ctx.token_metadata);
        if !deltas.is_empty() {
            let _ = writeln!(out, "net for sender:");
            for delta in deltas {
                let symbol = delta.symbol.unwrap_or_else(|| delta.token.to_string());
                let _ = writeln!(out, "  {symbol}: {}", delta.net);
            }
        }
    }
    out
}

fn render_gas(ctx: &RunContext) -> String {
    match &ctx.gas_context {
        Some(gas) => gas.describe(),
        None => "not available".to_string(),
    }
}

/// Assemble the draft prompt from everything gathered so far.
pub fn draft_prompt(ctx: &RunContext, pattern: PatternType) -> PromptInstance {
    let transaction = render_transaction(ctx);
    let decoded = render_decoded_call(ctx);
    let flows = render_token_flows(ctx);
    let call_trace = ctx
        .call_trace_explanation
        .clone()
        .unwrap_or_else(|| "not available".to_string());
    let gas = render_gas(ctx);
    DRAFT_TEMPLATE.render(&[
        ("transaction", transaction.as_str()),
        ("decoded_call", decoded.as_str()),
        ("token_flows", flows.as_str()),
        ("call_trace", call_trace.as_str()),
        ("pattern", pattern.as_str()),
        ("gas", gas.as_str()),
    ])
}

// =============================================================================
// STAGE
// =============================================================================

pub struct DraftStage {
    generator: Arc<dyn NarrativeGenerator>,
    classifier: Arc<dyn PatternClassifier>,
    stream: bool,
}

impl DraftStage {
    pub fn new(
        generator: Arc<dyn NarrativeGenerator>,
        classifier: Arc<dyn PatternClassifier>,
        stream: bool,
    ) -> Self {
        Self {
            generator,
            classifier,
            stream,
        }
    }
}

#[async_trait]
impl Stage for DraftStage {
    fn name(&self) -> &'static str {
        "draft"
    }

    async fn run(&self, ctx: &RunContext, progress: &ProgressHandle<'_>) -> ContextUpdate {
        let mut update = ContextUpdate::default();

        let pattern = ctx.transaction().map(|tx| {
            self.classifier.classify(&ClassifierInput {
                transaction: tx,
                decoded_call: ctx.decoded_call.as_ref(),
                token_flows: &ctx.token_flows,
                internal_calls: &ctx.internal_calls().calls,
            })
        });

        let prompt = draft_prompt(ctx, pattern.unwrap_or(ctx.pattern));
        update.pattern = pattern;
        update.draft_prompt_hash = Some(prompt.fingerprint());

        progress.emit(ProgressEvent::DraftStart);
        let request = GenerationRequest::new(Purpose::Draft, prompt).with_run(ctx.run_id);
        let result = if self.stream {
            let mut on_token = |token: &str| {
                progress.emit(ProgressEvent::DraftToken {
                    text: token.to_string(),
                });
            };
            self.generator
                .generate_streaming(&request, &mut on_token)
                .await
        } else {
            self.generator.generate(&request).await
        };

        match result {
            Ok(text) if !text.trim().is_empty() => {
                let draft = parse_narrative(&text);
                progress.emit(ProgressEvent::DraftDone {
                    chars: text.chars().count(),
                });
                update.draft = Some(draft);
            }
            Ok(_) => {
                update.error = Some(AnalysisError::narrative(GenerationError::Empty.to_string()));
            }
            Err(err) => {
                tracing::warn!(run_id = %ctx.run_id, error = %err, "draft generation failed");
                update.error = Some(AnalysisError::narrative(err.to_string()));
            }
        }
        update
    }
}

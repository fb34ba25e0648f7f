//! Ask the text-generation collaborator to explain a call sequence.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use alloy_primitives::{hex, Address, U256};
use uuid::Uuid;

use super::{AddressInfo, FlattenedCall};
use crate::narrative::{GenerationRequest, NarrativeGenerator, Purpose};
use crate::prompts::EXPLAIN_TEMPLATE;
use crate::sources::SelectorDatabase;

/// Calls listed verbatim in the prompt; the rest are summarised by count.
const MAX_LISTED_CALLS: usize = 200;

fn name_of(address: &Address, info: &BTreeMap<Address, AddressInfo>) -> String {
    match info.get(address).and_then(AddressInfo::display_name) {
        Some(name) => format!("{name} ({address})"),
        None => address.to_string(),
    }
}

pub fn render_calls(
    calls: &[FlattenedCall],
    info: &BTreeMap<Address, AddressInfo>,
    selectors: &SelectorDatabase,
) -> String {
    let mut out = String::new();
    for call in calls.iter().take(MAX_LISTED_CALLS) {
        let to = match &call.to {
            Some(to) => name_of(to, info),
            None => "(new contract)".to_string(),
        };
        let function = call
            .selector
            .map(|s| match selectors.lookup(s) {
                Some(sig) => sig.to_string(),
                None => hex::encode_prefixed(s),
            })
            .unwrap_or_else(|| "-".to_string());
        let _ = write!(
            out,
            "{:>3} {}{} {} -> {} fn={}",
            call.index,
            "  ".repeat(call.depth),
            call.kind.as_str(),
            name_of(&call.from, info),
            to,
            function,
        );
        if call.value > U256::ZERO {
            let _ = write!(out, " value={}wei", call.value);
        }
        if call.failed {
            out.push_str(" FAILED");
        }
        out.push('\n');
    }
    if calls.len() > MAX_LISTED_CALLS {
        let _ = writeln!(out, "... {} more calls", calls.len() - MAX_LISTED_CALLS);
    }
    out
}

pub fn render_addresses(info: &BTreeMap<Address, AddressInfo>) -> String {
    let mut out = String::new();
    for (address, entry) in info {
        let _ = write!(out, "{address}:");
        if entry.is_unknown() {
            let _ = write!(out, " unknown");
        } else {
            let _ = write!(
                out,
                " {}",
                if entry.is_contract { "contract" } else { "account" }
            );
        }
        if let Some(label) = &entry.label {
            let _ = write!(out, " label=\"{label}\"");
        }
        if let Some(name) = &entry.contract_name {
            let _ = write!(out, " name=\"{name}\"");
        }
        if entry.abi.is_some() {
            out.push_str(" abi=verified");
        }
        out.push('\n');
        if let Some(source) = &entry.source {
            let _ = writeln!(out, "source:\n{source}");
        }
    }
    out
}

/// Returns `None` when there is nothing to explain or the collaborator fails.
pub async fn explain_calls(
    generator: &dyn NarrativeGenerator,
    calls: &[FlattenedCall],
    info: &BTreeMap<Address, AddressInfo>,
    selectors: &SelectorDatabase,
    run_id: Uuid,
) -> Option<String> {
    if calls.is_empty() {
        return None;
    }
    let calls_text = render_calls(calls, info, selectors);
    let addresses_text = render_addresses(info);
    let prompt = EXPLAIN_TEMPLATE.render(&[
        ("calls", calls_text.as_str()),
        ("addresses", addresses_text.as_str()),
    ]);
    let request = GenerationRequest::new(Purpose::CallTraceExplain, prompt).with_run(run_id);

    match generator.generate(&request).await {
        Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Ok(_) => None,
        Err(err) => {
            tracing::warn!(run_id = %run_id, error = %err, "call-trace explanation failed");
            None
        }
    }
}

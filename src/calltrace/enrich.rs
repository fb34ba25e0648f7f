//! Address enrichment for the flattened call list.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use futures::stream::{self, StreamExt};
use serde::Serialize;

use super::FlattenedCall;
use crate::sources::{
    probe, ExplorerService, LabelStore, LedgerQuery, SourceKind, Sourced, Unavailable,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    Resolved,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressInfo {
    pub label: Option<String>,
    pub is_contract: bool,
    pub contract_name: Option<String>,
    pub abi: Option<String>,
    pub source: Option<String>,
    pub status: EnrichmentStatus,
}

impl AddressInfo {
    /// Placeholder for an address whose lookup failed.
    pub fn unknown() -> Self {
        Self {
            label: None,
            is_contract: false,
            contract_name: None,
            abi: None,
            source: None,
            status: EnrichmentStatus::Unknown,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.status == EnrichmentStatus::Unknown
    }

    /// Label, else verified contract name.
    pub fn display_name(&self) -> Option<&str> {
        self.label.as_deref().or(self.contract_name.as_deref())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnrichLimits {
    pub max_addresses: usize,
    pub concurrency: usize,
    pub source_char_budget: usize,
    pub timeout: Duration,
}

/// Unique `from`/`to` addresses in first-seen order, capped.
pub fn candidate_addresses(calls: &[FlattenedCall], cap: usize) -> Vec<Address> {
    let mut out: Vec<Address> = Vec::new();
    let addresses = calls
        .iter()
        .flat_map(|c| std::iter::once(c.from).chain(c.to));
    for address in addresses {
        if out.len() >= cap {
            break;
        }
        if !out.contains(&address) {
            out.push(address);
        }
    }
    out
}

/// Cut `source` to at most `budget` characters with an explicit marker.
pub fn truncate_source(source: &str, budget: usize) -> String {
    let total = source.chars().count();
    if total <= budget {
        return source.to_string();
    }
    let kept: String = source.chars().take(budget).collect();
    format!("{kept}\n[truncated: {budget} of {total} chars]")
}

/// Collaborators the enrichment step reads from.
#[derive(Clone)]
pub struct EnrichSources {
    pub chain_id: u64,
    pub ledger: Arc<dyn LedgerQuery>,
    pub explorer: Option<Arc<dyn ExplorerService>>,
    pub labels: Arc<dyn LabelStore>,
}

/// Result of one enrichment pass.
#[derive(Debug, Default)]
pub struct Enrichment {
    pub info: BTreeMap<Address, AddressInfo>,
    /// Lookups that failed, in address order.
    pub unavailable: Vec<Unavailable>,
}

/// Resolve every candidate concurrently. The result has exactly one entry per
/// candidate; failed lookups get [`AddressInfo::unknown`].
pub async fn enrich_addresses(
    candidates: &[Address],
    sources: &EnrichSources,
    limits: EnrichLimits,
) -> Enrichment {
    let tasks = candidates.iter().copied().map(|address| {
        let sources = sources.clone();
        async move {
            let resolved = enrich_one(address, &sources, limits).await;
            (address, resolved)
        }
    });

    let resolved: BTreeMap<Address, (AddressInfo, Vec<Unavailable>)> = stream::iter(tasks)
        .buffer_unordered(limits.concurrency.max(1))
        .collect()
        .await;

    let mut enrichment = Enrichment::default();
    for (address, (info, diag)) in resolved {
        enrichment.unavailable.extend(diag);
        enrichment.info.insert(address, info);
    }
    enrichment
}

async fn enrich_one(
    address: Address,
    sources: &EnrichSources,
    limits: EnrichLimits,
) -> (AddressInfo, Vec<Unavailable>) {
    let label = sources.labels.lookup_label(address, sources.chain_id);

    let ledger = Arc::clone(&sources.ledger);
    let code = probe(SourceKind::Ledger, "get_bytecode", limits.timeout, async move {
        ledger.get_bytecode(address).await
    })
    .await;
    let code = match code {
        Sourced::Available(code) => code,
        Sourced::Unavailable(u) => {
            // Offline labels cannot fail, so keep them.
            let info = AddressInfo {
                label,
                ..AddressInfo::unknown()
            };
            return (info, vec![u]);
        }
    };

    if code.is_empty() {
        let info = AddressInfo {
            label,
            is_contract: false,
            contract_name: None,
            abi: None,
            source: None,
            status: EnrichmentStatus::Resolved,
        };
        return (info, Vec::new());
    }

    let (abi, source) = match &sources.explorer {
        Some(explorer) => {
            let abi_explorer = Arc::clone(explorer);
            let source_explorer = Arc::clone(explorer);
            tokio::join!(
                probe(SourceKind::Explorer, "contract_abi", limits.timeout, async move {
                    abi_explorer.contract_abi(address).await
                }),
                probe(SourceKind::Explorer, "contract_source", limits.timeout, async move {
                    source_explorer.contract_source(address).await
                }),
            )
        }
        None => (Sourced::Available(None), Sourced::Available(None)),
    };
    let (abi, abi_diag) = abi.split();
    let (source, source_diag) = source.split();
    let source = source.flatten();

    let info = AddressInfo {
        label,
        is_contract: true,
        contract_name: source.as_ref().map(|s| s.contract_name.clone()),
        abi: abi.flatten(),
        source: source.map(|s| truncate_source(&s.source, limits.source_char_budget)),
        status: EnrichmentStatus::Resolved,
    };
    (info, abi_diag.into_iter().chain(source_diag).collect())
}

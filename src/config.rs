//! Runtime configuration.
//!
//! Everything has a default; `from_env` overrides from `TXLENS_*` variables the
//! same way the OpenRouter adapter reads `OPENROUTER_*`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Chains with known explorer and label coverage.
pub const KNOWN_CHAINS: &[(u64, &str)] = &[
    (1, "ethereum"),
    (10, "optimism"),
    (56, "bsc"),
    (137, "polygon"),
    (8453, "base"),
    (42161, "arbitrum"),
    (11155111, "sepolia"),
];

pub fn chain_name(chain_id: u64) -> Option<&'static str> {
    KNOWN_CHAINS
        .iter()
        .find(|(id, _)| *id == chain_id)
        .map(|(_, name)| *name)
}

/// Thresholds for flagging an effective gas price against the reference price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GasPolicy {
    /// Ratios strictly above this are flagged high.
    pub high_ratio: f64,
    /// Ratios strictly below this are flagged near-zero.
    pub low_ratio: f64,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            high_ratio: 3.0,
            low_ratio: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Per-call timeout for optional sources.
    pub source_timeout: Duration,
    /// Timeout for the mandatory transaction and receipt fetch.
    pub ledger_timeout: Duration,
    pub max_token_contracts: usize,
    pub token_concurrency: usize,
    /// Cap on the enrichment map (C).
    pub max_enriched_addresses: usize,
    pub enrich_concurrency: usize,
    /// Contract source is cut to this many characters before it reaches a prompt.
    pub source_char_budget: usize,
    pub gas_policy: GasPolicy,
    pub verification_enabled: bool,
    pub stream_draft: bool,
    pub supported_chains: Vec<u64>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            source_timeout: Duration::from_secs(10),
            ledger_timeout: Duration::from_secs(20),
            max_token_contracts: 8,
            token_concurrency: 4,
            max_enriched_addresses: 10,
            enrich_concurrency: 4,
            source_char_budget: 6_000,
            gas_policy: GasPolicy::default(),
            verification_enabled: true,
            stream_draft: false,
            supported_chains: KNOWN_CHAINS.iter().map(|(id, _)| *id).collect(),
        }
    }
}

impl AnalyzerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            source_timeout: Duration::from_secs(env_or(
                "TXLENS_SOURCE_TIMEOUT_SECONDS",
                defaults.source_timeout.as_secs(),
            )?),
            ledger_timeout: Duration::from_secs(env_or(
                "TXLENS_LEDGER_TIMEOUT_SECONDS",
                defaults.ledger_timeout.as_secs(),
            )?),
            max_token_contracts: env_or("TXLENS_MAX_TOKEN_CONTRACTS", defaults.max_token_contracts)?,
            token_concurrency: defaults.token_concurrency,
            max_enriched_addresses: env_or(
                "TXLENS_MAX_ENRICHED_ADDRESSES",
                defaults.max_enriched_addresses,
            )?,
            enrich_concurrency: env_or("TXLENS_ENRICH_CONCURRENCY", defaults.enrich_concurrency)?,
            source_char_budget: env_or("TXLENS_SOURCE_CHAR_BUDGET", defaults.source_char_budget)?,
            gas_policy: GasPolicy {
                high_ratio: env_or("TXLENS_GAS_HIGH_RATIO", defaults.gas_policy.high_ratio)?,
                low_ratio: env_or("TXLENS_GAS_LOW_RATIO", defaults.gas_policy.low_ratio)?,
            },
            verification_enabled: env_or("TXLENS_VERIFY", defaults.verification_enabled)?,
            stream_draft: env_or("TXLENS_STREAM_DRAFT", defaults.stream_draft)?,
            supported_chains: defaults.supported_chains,
        })
    }

    pub fn supports_chain(&self, chain_id: u64) -> bool {
        chain_id > 0 && self.supported_chains.contains(&chain_id)
    }
}

/// Model selection for the text-generation collaborator.
#[derive(Debug, Clone)]
pub struct NarratorConfig {
    pub draft_model: String,
    pub verify_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            draft_model: "openai/gpt-5-mini".to_string(),
            verify_model: "openai/gpt-4o-mini".to_string(),
            temperature: 0.2,
            max_tokens: 1_200,
        }
    }
}

impl NarratorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            draft_model: std::env::var("TXLENS_NARRATIVE_MODEL").unwrap_or(defaults.draft_model),
            verify_model: std::env::var("TXLENS_VERIFY_MODEL").unwrap_or(defaults.verify_model),
            temperature: env_or("TXLENS_TEMPERATURE", defaults.temperature)?,
            max_tokens: env_or("TXLENS_MAX_TOKENS", defaults.max_tokens)?,
        })
    }
}

/// Where the data adapters point.
#[derive(Debug, Clone)]
pub struct SourceEndpoints {
    pub chain_id: u64,
    pub rpc_url: String,
    pub trace_rpc_url: Option<String>,
    pub explorer_url: String,
    pub explorer_api_key: Option<String>,
    pub labels_path: Option<PathBuf>,
    pub selectors_path: Option<PathBuf>,
}

pub const DEFAULT_EXPLORER_URL: &str = "https://api.etherscan.io/v2/api";

impl SourceEndpoints {
    pub fn from_env(chain_id: u64) -> Result<Self, ConfigError> {
        let rpc_url = std::env::var("TXLENS_RPC_URL").map_err(|_| ConfigError::Missing("TXLENS_RPC_URL"))?;
        Ok(Self {
            chain_id,
            rpc_url,
            trace_rpc_url: non_empty_var("TXLENS_TRACE_RPC_URL"),
            explorer_url: non_empty_var("TXLENS_EXPLORER_URL")
                .unwrap_or_else(|| DEFAULT_EXPLORER_URL.to_string()),
            explorer_api_key: non_empty_var("ETHERSCAN_API_KEY"),
            labels_path: non_empty_var("TXLENS_LABELS_PATH").map(PathBuf::from),
            selectors_path: non_empty_var("TXLENS_SELECTORS_PATH").map(PathBuf::from),
        })
    }
}

fn non_empty_var(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn env_or<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
        _ => Ok(default),
    }
}

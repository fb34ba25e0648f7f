//! Offline address labels.

use std::collections::HashMap;
use std::path::Path;

use alloy_primitives::{address, Address};

use super::{LabelStore, SourceError};

/// Well-known mainnet addresses.
const BUILTIN: &[(u64, Address, &str)] = &[
    (1, address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"), "WETH"),
    (1, address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"), "USDC"),
    (1, address!("dac17f958d2ee523a2206206994597c13d831ec7"), "USDT"),
    (1, address!("6b175474e89094c44da98b954eedeac495271d0f"), "DAI"),
    (1, address!("7a250d5630b4cf539739df2c5dacb4c659f2488d"), "Uniswap V2: Router 2"),
    (1, address!("e592427a0aece92de3edee1f18e0157c05861564"), "Uniswap V3: Router"),
    (1, address!("68b3465833fb72a70ecdf485e0e4c7bd8665fc45"), "Uniswap V3: Router 2"),
    (1, address!("3fc91a3afd70395cd496c647d5a6cc9d4b2b7fad"), "Uniswap: Universal Router"),
    (1, address!("000000000022d473030f116ddee9f6b43ac78ba3"), "Uniswap: Permit2"),
    (1, address!("1111111254eeb25477b68fb85ed929f73a960582"), "1inch v5: Aggregation Router"),
    (1, address!("def1c0ded9bec7f1a1670819833240f027b25eff"), "0x: Exchange Proxy"),
    (1, address!("00000000000000adc04c56bf30ac9d3c0aaf14dc"), "Seaport 1.5"),
    (1, address!("0000000000000000000000000000000000000000"), "Null Address"),
];

#[derive(Debug, Clone, Default)]
pub struct OfflineLabelStore {
    labels: HashMap<(u64, Address), String>,
}

impl OfflineLabelStore {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut store = Self::empty();
        for (chain_id, address, label) in BUILTIN {
            store.insert(*chain_id, *address, *label);
        }
        store
    }

    pub fn insert(&mut self, chain_id: u64, address: Address, label: impl Into<String>) {
        self.labels.insert((chain_id, address), label.into());
    }

    /// Merge labels from a JSON file shaped `{"<chain id>": {"<address>": "<label>"}}`.
    /// File entries win over built-ins.
    pub fn load_json(&mut self, path: impl AsRef<Path>) -> Result<usize, SourceError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SourceError::decode(format!("{}: {e}", path.as_ref().display())))?;
        self.merge_json(&raw)
    }

    pub fn merge_json(&mut self, raw: &str) -> Result<usize, SourceError> {
        let parsed: HashMap<String, HashMap<Address, String>> =
            serde_json::from_str(raw).map_err(|e| SourceError::decode(e.to_string()))?;
        let mut added = 0;
        for (chain, entries) in parsed {
            let chain_id: u64 = chain
                .parse()
                .map_err(|_| SourceError::decode(format!("bad chain id {chain:?}")))?;
            for (address, label) in entries {
                self.insert(chain_id, address, label);
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl LabelStore for OfflineLabelStore {
    fn lookup_label(&self, address: Address, chain_id: u64) -> Option<String> {
        self.labels.get(&(chain_id, address)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_labels_are_chain_scoped() {
        let store = OfflineLabelStore::builtin();
        let weth = address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");
        assert_eq!(store.lookup_label(weth, 1).as_deref(), Some("WETH"));
        assert_eq!(store.lookup_label(weth, 137), None);
    }

    #[test]
    fn json_entries_override_builtins_case_insensitively() {
        let mut store = OfflineLabelStore::builtin();
        let added = store
            .merge_json(
                r#"{"1": {"0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2": "Wrapped Ether"},
                    "8453": {"0x4200000000000000000000000000000000000006": "WETH"}}"#,
            )
            .unwrap();
        assert_eq!(added, 2);
        let weth = address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");
        assert_eq!(store.lookup_label(weth, 1).as_deref(), Some("Wrapped Ether"));
        let base_weth = address!("4200000000000000000000000000000000000006");
        assert_eq!(store.lookup_label(base_weth, 8453).as_deref(), Some("WETH"));
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let mut store = OfflineLabelStore::empty();
        assert!(store.merge_json(r#"{"mainnet": {}}"#).is_err());
        assert!(store.merge_json("not json").is_err());
    }
}

//! 4-byte selector database.
//!
//! Built-in signatures are hashed once at first use; an optional JSON file can
//! add more.

use std::collections::HashMap;
use std::path::Path;

use alloy_primitives::{keccak256, Selector};
use once_cell::sync::Lazy;

use super::SourceError;

const BUILTIN_SIGNATURES: &[&str] = &[
    // ERC-20
    "transfer(address,uint256)",
    "transferFrom(address,address,uint256)",
    "approve(address,uint256)",
    "increaseAllowance(address,uint256)",
    "decreaseAllowance(address,uint256)",
    "name()",
    "symbol()",
    "decimals()",
    "totalSupply()",
    "balanceOf(address)",
    "permit(address,address,uint256,uint256,uint8,bytes32,bytes32)",
    // ERC-721 / ERC-1155
    "safeTransferFrom(address,address,uint256)",
    "safeTransferFrom(address,address,uint256,bytes)",
    "setApprovalForAll(address,bool)",
    "safeTransferFrom(address,address,uint256,uint256,bytes)",
    "safeBatchTransferFrom(address,address,uint256[],uint256[],bytes)",
    // WETH
    "deposit()",
    "withdraw(uint256)",
    // Uniswap V2 router
    "swapExactTokensForTokens(uint256,uint256,address[],address,uint256)",
    "swapTokensForExactTokens(uint256,uint256,address[],address,uint256)",
    "swapExactETHForTokens(uint256,address[],address,uint256)",
    "swapETHForExactTokens(uint256,address[],address,uint256)",
    "swapExactTokensForETH(uint256,uint256,address[],address,uint256)",
    "swapTokensForExactETH(uint256,uint256,address[],address,uint256)",
    "swapExactETHForTokensSupportingFeeOnTransferTokens(uint256,address[],address,uint256)",
    "swapExactTokensForETHSupportingFeeOnTransferTokens(uint256,uint256,address[],address,uint256)",
    "swapExactTokensForTokensSupportingFeeOnTransferTokens(uint256,uint256,address[],address,uint256)",
    "addLiquidity(address,address,uint256,uint256,uint256,uint256,address,uint256)",
    "addLiquidityETH(address,uint256,uint256,uint256,address,uint256)",
    "removeLiquidity(address,address,uint256,uint256,uint256,address,uint256)",
    "removeLiquidityETH(address,uint256,uint256,uint256,address,uint256)",
    // Uniswap V2 pair
    "swap(uint256,uint256,address,bytes)",
    "getReserves()",
    // Uniswap V3 / universal router
    "exactInputSingle((address,address,uint24,address,uint256,uint256,uint256,uint160))",
    "exactInput((bytes,address,uint256,uint256,uint256))",
    "exactOutputSingle((address,address,uint24,address,uint256,uint256,uint256,uint160))",
    "multicall(bytes[])",
    "multicall(uint256,bytes[])",
    "execute(bytes,bytes[])",
    "execute(bytes,bytes[],uint256)",
];

static BUILTIN: Lazy<HashMap<Selector, String>> = Lazy::new(|| {
    BUILTIN_SIGNATURES
        .iter()
        .map(|sig| (selector_for(sig), (*sig).to_string()))
        .collect()
});

/// First four bytes of the keccak-256 hash of a canonical signature.
pub fn selector_for(signature: &str) -> Selector {
    Selector::from_slice(&keccak256(signature.as_bytes())[..4])
}

#[derive(Debug, Clone)]
pub struct SelectorDatabase {
    signatures: HashMap<Selector, String>,
}

impl SelectorDatabase {
    pub fn builtin() -> Self {
        Self {
            signatures: BUILTIN.clone(),
        }
    }

    pub fn empty() -> Self {
        Self {
            signatures: HashMap::new(),
        }
    }

    pub fn insert_signature(&mut self, signature: impl Into<String>) -> Selector {
        let signature = signature.into();
        let selector = selector_for(&signature);
        self.signatures.insert(selector, signature);
        selector
    }

    /// Merge a JSON array of signatures, e.g. `["foo(uint256)", "bar()"]`.
    pub fn load_json(&mut self, path: impl AsRef<Path>) -> Result<usize, SourceError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SourceError::decode(format!("{}: {e}", path.as_ref().display())))?;
        let signatures: Vec<String> =
            serde_json::from_str(&raw).map_err(|e| SourceError::decode(e.to_string()))?;
        let count = signatures.len();
        for sig in signatures {
            self.insert_signature(sig);
        }
        Ok(count)
    }

    pub fn lookup(&self, selector: Selector) -> Option<&str> {
        self.signatures.get(&selector).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

impl Default for SelectorDatabase {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_selectors_resolve() {
        let db = SelectorDatabase::builtin();
        let transfer = Selector::from([0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(db.lookup(transfer), Some("transfer(address,uint256)"));
        let approve = Selector::from([0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(db.lookup(approve), Some("approve(address,uint256)"));
        assert_eq!(db.lookup(Selector::from([0xde, 0xad, 0xbe, 0xef])), None);
    }

    #[test]
    fn inserted_signatures_are_hashed() {
        let mut db = SelectorDatabase::empty();
        let sel = db.insert_signature("balanceOf(address)");
        assert_eq!(sel, Selector::from([0x70, 0xa0, 0x82, 0x31]));
        assert_eq!(db.len(), 1);
    }
}

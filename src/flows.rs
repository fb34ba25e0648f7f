//! Token transfers decoded from receipt logs.

use std::collections::BTreeMap;

use alloy_primitives::{keccak256, Address, B256, U256};
use once_cell::sync::Lazy;
use serde::Serialize;

use crate::chain::{Log, TokenInfo};

/// `Transfer(address,address,uint256)`, shared by ERC-20 and ERC-721.
pub static TRANSFER_TOPIC: Lazy<B256> =
    Lazy::new(|| keccak256("Transfer(address,address,uint256)"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStandard {
    Erc20,
    Erc721,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenFlow {
    pub token: Address,
    pub from: Address,
    pub to: Address,
    /// Raw amount for ERC-20, token id for ERC-721.
    pub amount: U256,
    pub standard: TokenStandard,
    pub log_index: u64,
}

/// Decode every transfer-style log. Logs that do not fit either layout are
/// skipped.
pub fn extract_token_flows(logs: &[Log]) -> Vec<TokenFlow> {
    logs.iter().filter_map(decode_transfer).collect()
}

fn decode_transfer(log: &Log) -> Option<TokenFlow> {
    if log.topics.first() != Some(&*TRANSFER_TOPIC) {
        return None;
    }
    let (standard, amount) = match log.topics.len() {
        // ERC-20: value in data.
        3 if log.data.len() >= 32 => (
            TokenStandard::Erc20,
            U256::try_from_be_slice(&log.data[..32])?,
        ),
        // ERC-721: token id indexed.
        4 => (
            TokenStandard::Erc721,
            U256::from_be_bytes(log.topics[3].0),
        ),
        _ => return None,
    };
    Some(TokenFlow {
        token: log.address,
        from: Address::from_word(log.topics[1]),
        to: Address::from_word(log.topics[2]),
        amount,
        standard,
        log_index: log.log_index,
    })
}

/// Unique token contracts in first-seen order, at most `cap`.
pub fn token_contracts(flows: &[TokenFlow], cap: usize) -> Vec<Address> {
    let mut seen = Vec::new();
    for flow in flows {
        if seen.len() >= cap {
            break;
        }
        if !seen.contains(&flow.token) {
            seen.push(flow.token);
        }
    }
    seen
}

/// Per-token movement for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDelta {
    pub token: Address,
    pub symbol: Option<String>,
    pub standard: TokenStandard,
    pub sent: U256,
    pub received: U256,
    /// Human-readable net change, signed and scaled by decimals when known.
    pub net: String,
}

/// Sent, received and net amounts for `account`, one entry per token it touched.
pub fn account_deltas(
    flows: &[TokenFlow],
    account: Address,
    metadata: &BTreeMap<Address, TokenInfo>,
) -> Vec<TokenDelta> {
    let mut order: Vec<Address> = Vec::new();
    let mut totals: BTreeMap<Address, (TokenStandard, U256, U256)> = BTreeMap::new();

    for flow in flows {
        let sent = flow.from == account;
        let received = flow.to == account;
        if !sent && !received {
            continue;
        }
        // ERC-721 deltas count tokens, not ids.
        let amount = match flow.standard {
            TokenStandard::Erc20 => flow.amount,
            TokenStandard::Erc721 => U256::from(1u8),
        };
        let entry = totals.entry(flow.token).or_insert_with(|| {
            order.push(flow.token);
            (flow.standard, U256::ZERO, U256::ZERO)
        });
        if sent {
            entry.1 = entry.1.saturating_add(amount);
        }
        if received {
            entry.2 = entry.2.saturating_add(amount);
        }
    }

    order
        .into_iter()
        .filter_map(|token| {
            let (standard, sent, received) = totals.remove(&token)?;
            let info = metadata.get(&token);
            let decimals = match standard {
                TokenStandard::Erc20 => info.and_then(|i| i.decimals),
                TokenStandard::Erc721 => Some(0),
            };
            Some(TokenDelta {
                token,
                symbol: info.and_then(|i| i.symbol.clone()),
                standard,
                sent,
                received,
                net: format_signed(received, sent, decimals),
            })
        })
        .collect()
}

fn format_signed(received: U256, sent: U256, decimals: Option<u8>) -> String {
    let (sign, magnitude) = if received >= sent {
        ("+", received - sent)
    } else {
        ("-", sent - received)
    };
    format!("{sign}{}", format_amount(magnitude, decimals))
}

/// Render a raw amount; unknown decimals leave it unscaled.
pub fn format_amount(amount: U256, decimals: Option<u8>) -> String {
    match decimals {
        Some(d) if d > 0 => format_units(amount, d),
        _ => amount.to_string(),
    }
}

/// Scale `amount` down by `10^decimals`, trimming trailing zeros.
pub fn format_units(amount: U256, decimals: u8) -> String {
    let digits = amount.to_string();
    let decimals = decimals as usize;
    let (whole, frac) = if digits.len() > decimals {
        let split = digits.len() - decimals;
        (digits[..split].to_string(), digits[split..].to_string())
    } else {
        ("0".to_string(), format!("{digits:0>decimals$}"))
    };
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        whole
    } else {
        format!("{whole}.{frac}")
    }
}

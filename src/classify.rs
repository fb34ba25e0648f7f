//! Economic pattern classification.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::calltrace::FlattenedCall;
use crate::chain::RawTransaction;
use crate::decode::DecodedCall;
use crate::flows::TokenFlow;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Swap,
    Approval,
    TokenTransfer,
    NativeTransfer,
    /// Batched calls through a multicall-style entry point.
    Multicall,
    ContractInteraction,
    #[default]
    Unknown,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Swap => "swap",
            PatternType::Approval => "approval",
            PatternType::TokenTransfer => "token_transfer",
            PatternType::NativeTransfer => "native_transfer",
            PatternType::Multicall => "multicall",
            PatternType::ContractInteraction => "contract_interaction",
            PatternType::Unknown => "unknown",
        }
    }
}

/// What a classifier gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierInput<'a> {
    pub transaction: &'a RawTransaction,
    pub decoded_call: Option<&'a DecodedCall>,
    pub token_flows: &'a [TokenFlow],
    pub internal_calls: &'a [FlattenedCall],
}

pub trait PatternClassifier: Send + Sync {
    fn classify(&self, input: &ClassifierInput<'_>) -> PatternType;
}

/// Rule-based classifier over method names and the sender's token movements.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

const APPROVAL_METHODS: &[&str] = &[
    "approve",
    "setapprovalforall",
    "increaseallowance",
    "decreaseallowance",
    "permit",
];

const MULTICALL_METHODS: &[&str] = &["multicall", "aggregate", "aggregate3", "trycall"];

const TRANSFER_METHODS: &[&str] = &[
    "transfer",
    "transferfrom",
    "safetransferfrom",
    "safebatchtransferfrom",
];

impl PatternClassifier for HeuristicClassifier {
    fn classify(&self, input: &ClassifierInput<'_>) -> PatternType {
        let tx = input.transaction;
        if tx.is_contract_creation() {
            return PatternType::Unknown;
        }
        let method = input
            .decoded_call
            .and_then(|c| c.method.as_deref())
            .map(str::to_ascii_lowercase);

        if let Some(m) = method.as_deref() {
            if APPROVAL_METHODS.contains(&m) {
                return PatternType::Approval;
            }
        }
        if method.as_deref().is_some_and(|m| m.contains("swap"))
            || sender_swapped(tx.from, tx.value, input.token_flows, input.internal_calls)
        {
            return PatternType::Swap;
        }
        if tx.input.is_empty() {
            return if tx.value > U256::ZERO {
                PatternType::NativeTransfer
            } else {
                PatternType::Unknown
            };
        }
        if method
            .as_deref()
            .is_some_and(|m| MULTICALL_METHODS.iter().any(|prefix| m.starts_with(prefix)))
        {
            return PatternType::Multicall;
        }
        if method.as_deref().is_some_and(|m| TRANSFER_METHODS.contains(&m))
            || only_outgoing(tx.from, input.token_flows)
        {
            return PatternType::TokenTransfer;
        }
        PatternType::ContractInteraction
    }
}

/// The sender gave up one asset and received a different one.
fn sender_swapped(
    sender: Address,
    native_in: U256,
    flows: &[TokenFlow],
    calls: &[FlattenedCall],
) -> bool {
    let sent: Vec<Address> = flows
        .iter()
        .filter(|f| f.from == sender)
        .map(|f| f.token)
        .collect();
    let received: Vec<Address> = flows
        .iter()
        .filter(|f| f.to == sender)
        .map(|f| f.token)
        .collect();

    let token_for_token = sent
        .iter()
        .any(|s| received.iter().any(|r| r != s));
    let native_for_token = native_in > U256::ZERO && !received.is_empty();
    let native_back = calls
        .iter()
        .any(|c| c.to == Some(sender) && c.value > U256::ZERO && c.depth > 0);
    let token_for_native = !sent.is_empty() && native_back;

    token_for_token || native_for_token || token_for_native
}

fn only_outgoing(sender: Address, flows: &[TokenFlow]) -> bool {
    !flows.is_empty() && flows.iter().all(|f| f.from == sender)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calltrace::CallKind;
    use crate::decode::DecodeSource;
    use crate::flows::TokenStandard;
    use alloy_primitives::{Bytes, Selector, B256};

    fn addr(n: u8) -> Address {
        Address::with_last_byte(n)
    }

    fn tx(to: Option<Address>, value: u64, input: &[u8]) -> RawTransaction {
        RawTransaction {
            hash: B256::ZERO,
            from: addr(1),
            to,
            value: U256::from(value),
            input: Bytes::copy_from_slice(input),
            nonce: 0,
            block_number: Some(1),
            gas_limit: 100_000,
            gas_price: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
        }
    }

    fn call(method: &str) -> DecodedCall {
        DecodedCall {
            selector: Selector::ZERO,
            method: Some(method.to_string()),
            signature: None,
            arguments: Vec::new(),
            source: DecodeSource::SelectorDatabase,
        }
    }

    fn flow(token: u8, from: u8, to: u8) -> TokenFlow {
        TokenFlow {
            token: addr(token),
            from: addr(from),
            to: addr(to),
            amount: U256::from(1u8),
            standard: TokenStandard::Erc20,
            log_index: 0,
        }
    }

    fn classify(tx: &RawTransaction, decoded: Option<&DecodedCall>, flows: &[TokenFlow]) -> PatternType {
        HeuristicClassifier.classify(&ClassifierInput {
            transaction: tx,
            decoded_call: decoded,
            token_flows: flows,
            internal_calls: &[],
        })
    }

    #[test]
    fn contract_creation_is_unknown() {
        let t = tx(None, 0, &[0x60, 0x80]);
        assert_eq!(classify(&t, None, &[flow(5, 0, 1)]), PatternType::Unknown);
    }

    #[test]
    fn plain_value_transfer() {
        let t = tx(Some(addr(2)), 10, &[]);
        assert_eq!(classify(&t, None, &[]), PatternType::NativeTransfer);
    }

    #[test]
    fn approval_by_method_name() {
        let t = tx(Some(addr(5)), 0, &[0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(classify(&t, Some(&call("approve")), &[]), PatternType::Approval);
    }

    #[test]
    fn swap_from_token_movements_without_method() {
        let t = tx(Some(addr(9)), 0, &[0x12, 0x34, 0x56, 0x78]);
        let flows = [flow(5, 1, 9), flow(6, 9, 1)];
        assert_eq!(classify(&t, None, &flows), PatternType::Swap);
    }

    #[test]
    fn token_for_native_detected_via_internal_calls() {
        let t = tx(Some(addr(9)), 0, &[0x12, 0x34, 0x56, 0x78]);
        let flows = [flow(5, 1, 9)];
        let calls = [FlattenedCall {
            depth: 1,
            index: 1,
            kind: CallKind::Call,
            from: addr(9),
            to: Some(addr(1)),
            value: U256::from(7u8),
            selector: None,
            failed: false,
        }];
        let pattern = HeuristicClassifier.classify(&ClassifierInput {
            transaction: &t,
            decoded_call: None,
            token_flows: &flows,
            internal_calls: &calls,
        });
        assert_eq!(pattern, PatternType::Swap);
    }

    #[test]
    fn token_transfer_and_generic_interaction() {
        let t = tx(Some(addr(5)), 0, &[0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(
            classify(&t, Some(&call("transfer")), &[flow(5, 1, 2)]),
            PatternType::TokenTransfer
        );
        assert_eq!(
            classify(&t, Some(&call("deposit")), &[]),
            PatternType::ContractInteraction
        );
    }

    #[test]
    fn multicall_unless_the_sender_swapped() {
        let t = tx(Some(addr(9)), 0, &[0xac, 0x96, 0x50, 0xd8]);
        assert_eq!(classify(&t, Some(&call("multicall")), &[]), PatternType::Multicall);
        assert_eq!(classify(&t, Some(&call("aggregate3")), &[]), PatternType::Multicall);

        let flows = [flow(5, 1, 9), flow(6, 9, 1)];
        assert_eq!(classify(&t, Some(&call("multicall")), &flows), PatternType::Swap);
    }
}

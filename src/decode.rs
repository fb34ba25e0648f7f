//! Top-level calldata decoding: verified ABI first, selector database second.

use alloy_dyn_abi::{DynSolValue, JsonAbiExt};
use alloy_json_abi::{Function, JsonAbi};
use alloy_primitives::{hex, Selector};
use serde::Serialize;
use thiserror::Error;

use crate::sources::SelectorDatabase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeSource {
    Abi,
    SelectorDatabase,
    /// Selector not found anywhere.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedArgument {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub ty: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedCall {
    pub selector: Selector,
    pub method: Option<String>,
    pub signature: Option<String>,
    pub arguments: Vec<DecodedArgument>,
    pub source: DecodeSource,
}

impl DecodedCall {
    /// Method name, or the hex selector when unknown.
    pub fn display_name(&self) -> String {
        self.method
            .clone()
            .unwrap_or_else(|| hex::encode_prefixed(self.selector))
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("calldata shorter than a selector")]
    TooShort,
    #[error("invalid abi json: {0}")]
    Abi(String),
    #[error("selector {0} not in abi")]
    UnknownSelector(Selector),
    #[error("arguments do not match {signature}: {message}")]
    Arguments { signature: String, message: String },
}

/// Decode `input` against the verified ABI if there is one, otherwise (or when
/// the ABI does not fit) identify it by selector. Empty calldata has no call.
pub fn decode_call(
    input: &[u8],
    abi: Option<&str>,
    selectors: &SelectorDatabase,
) -> Option<DecodedCall> {
    if input.len() < 4 {
        return None;
    }
    if let Some(abi) = abi {
        match decode_with_abi(abi, input) {
            Ok(call) => return Some(call),
            Err(err) => tracing::debug!(error = %err, "abi decode failed, using selector lookup"),
        }
    }
    Some(decode_with_selectors(input, selectors))
}

pub fn decode_with_abi(abi_json: &str, input: &[u8]) -> Result<DecodedCall, DecodeError> {
    if input.len() < 4 {
        return Err(DecodeError::TooShort);
    }
    let abi: JsonAbi =
        serde_json::from_str(abi_json).map_err(|e| DecodeError::Abi(e.to_string()))?;
    let selector = Selector::from_slice(&input[..4]);
    let function = abi
        .functions()
        .find(|f| f.selector() == selector)
        .ok_or(DecodeError::UnknownSelector(selector))?;
    let arguments = decode_arguments(function, &input[4..])?;
    Ok(DecodedCall {
        selector,
        method: Some(function.name.clone()),
        signature: Some(function.signature()),
        arguments,
        source: DecodeSource::Abi,
    })
}

pub fn decode_with_selectors(input: &[u8], selectors: &SelectorDatabase) -> DecodedCall {
    let selector = Selector::from_slice(&input[..4.min(input.len())]);
    let Some(signature) = selectors.lookup(selector) else {
        return DecodedCall {
            selector,
            method: None,
            signature: None,
            arguments: Vec::new(),
            source: DecodeSource::Unknown,
        };
    };
    // Argument decoding is best effort here: the signature may be ambiguous.
    let arguments = Function::parse(signature)
        .ok()
        .and_then(|f| decode_arguments(&f, &input[4..]).ok())
        .unwrap_or_default();
    DecodedCall {
        selector,
        method: signature.split('(').next().map(str::to_string),
        signature: Some(signature.to_string()),
        arguments,
        source: DecodeSource::SelectorDatabase,
    }
}

fn decode_arguments(function: &Function, data: &[u8]) -> Result<Vec<DecodedArgument>, DecodeError> {
    let values = function
        .abi_decode_input(data, true)
        .map_err(|e| DecodeError::Arguments {
            signature: function.signature(),
            message: e.to_string(),
        })?;
    Ok(function
        .inputs
        .iter()
        .zip(values.iter())
        .map(|(param, value)| DecodedArgument {
            name: (!param.name.is_empty()).then(|| param.name.clone()),
            ty: param.ty.clone(),
            value: render_value(value),
        })
        .collect())
}

/// Compact human-readable rendering of a decoded value.
pub fn render_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Int(i, _) => i.to_string(),
        DynSolValue::Uint(u, _) => u.to_string(),
        DynSolValue::Address(a) => a.to_string(),
        DynSolValue::FixedBytes(word, size) => hex::encode_prefixed(&word[..*size]),
        DynSolValue::Bytes(b) => hex::encode_prefixed(b),
        DynSolValue::String(s) => format!("{s:?}"),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => {
            let inner: Vec<String> = items.iter().map(render_value).collect();
            format!("[{}]", inner.join(", "))
        }
        DynSolValue::Tuple(items) => {
            let inner: Vec<String> = items.iter().map(render_value).collect();
            format!("({})", inner.join(", "))
        }
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, U256};

    const ERC20_ABI: &str = r#"[
        {"type":"function","name":"transfer","stateMutability":"nonpayable",
         "inputs":[{"name":"to","type":"address"},{"name":"amount","type":"uint256"}],
         "outputs":[{"name":"","type":"bool"}]}
    ]"#;

    fn transfer_calldata(to: Address, amount: u64) -> Vec<u8> {
        let mut data = vec![0xa9, 0x05, 0x9c, 0xbb];
        data.extend_from_slice(to.into_word().as_slice());
        data.extend_from_slice(&U256::from(amount).to_be_bytes::<32>());
        data
    }

    #[test]
    fn abi_decoding_names_arguments() {
        let to = Address::with_last_byte(0x42);
        let call = decode_with_abi(ERC20_ABI, &transfer_calldata(to, 7)).unwrap();
        assert_eq!(call.source, DecodeSource::Abi);
        assert_eq!(call.method.as_deref(), Some("transfer"));
        assert_eq!(call.arguments[0].name.as_deref(), Some("to"));
        assert_eq!(call.arguments[0].value, to.to_string());
        assert_eq!(call.arguments[1].value, "7");
    }

    #[test]
    fn abi_mismatch_falls_back_to_selectors() {
        // approve(address,uint256) is not in the ABI.
        let mut data = transfer_calldata(Address::with_last_byte(1), 1);
        data[..4].copy_from_slice(&[0x09, 0x5e, 0xa7, 0xb3]);
        let call = decode_call(&data, Some(ERC20_ABI), &SelectorDatabase::builtin()).unwrap();
        assert_eq!(call.source, DecodeSource::SelectorDatabase);
        assert_eq!(call.method.as_deref(), Some("approve"));
        assert_eq!(call.arguments.len(), 2);
        assert_eq!(call.arguments[0].name, None);
    }

    #[test]
    fn unknown_selector_and_empty_input() {
        let db = SelectorDatabase::builtin();
        let call = decode_call(&[0xde, 0xad, 0xbe, 0xef], None, &db).unwrap();
        assert_eq!(call.source, DecodeSource::Unknown);
        assert_eq!(call.display_name(), "0xdeadbeef");
        assert!(decode_call(&[], None, &db).is_none());
        assert!(decode_call(&[0x01, 0x02], None, &db).is_none());
    }

    #[test]
    fn broken_abi_json_is_an_error() {
        assert!(matches!(
            decode_with_abi("{not json", &[0, 0, 0, 0]),
            Err(DecodeError::Abi(_))
        ));
    }
}

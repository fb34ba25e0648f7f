//! Nested execution traces from a simulation node via `debug_traceTransaction`.

use std::sync::atomic::AtomicU64;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::rpc::{parse_quantity, rpc_request};
use super::{SourceError, TraceService};
use crate::calltrace::{CallKind, CallTraceNode};

#[derive(Debug)]
pub struct RpcTraceService {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl RpcTraceService {
    pub fn new(url: impl Into<String>) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .gzip(true)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl TraceService for RpcTraceService {
    async fn trace_transaction(&self, hash: B256) -> Result<CallTraceNode, SourceError> {
        let frame: Option<CallFrame> = rpc_request(
            &self.client,
            &self.url,
            &self.next_id,
            "debug_traceTransaction",
            json!([hash, { "tracer": "callTracer" }]),
        )
        .await?;
        let frame = frame.ok_or_else(|| SourceError::decode("empty trace result"))?;
        frame.into_node()
    }
}

/// One `callTracer` frame as returned over the wire.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    #[serde(rename = "type")]
    kind: String,
    from: Address,
    #[serde(default)]
    to: Option<Address>,
    #[serde(default)]
    value: Option<U256>,
    #[serde(default)]
    gas: Option<String>,
    #[serde(default)]
    gas_used: Option<String>,
    #[serde(default)]
    input: Bytes,
    #[serde(default)]
    output: Option<Bytes>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    calls: Vec<CallFrame>,
}

impl CallFrame {
    /// Convert into the owned tree. Frames are consumed with an explicit stack.
    pub fn into_node(self) -> Result<CallTraceNode, SourceError> {
        // Each entry is a frame whose children are still wire frames; once all
        // of a frame's children are converted it is attached to its parent.
        let mut stack: Vec<(CallTraceNode, std::vec::IntoIter<CallFrame>)> = Vec::new();
        let (root, calls) = self.split()?;
        stack.push((root, calls.into_iter()));

        loop {
            let next_child = match stack.last_mut() {
                Some((_, pending)) => pending.next(),
                None => return Err(SourceError::decode("trace conversion lost its root")),
            };
            match next_child {
                Some(frame) => {
                    let (node, calls) = frame.split()?;
                    stack.push((node, calls.into_iter()));
                }
                None => {
                    let Some((done, _)) = stack.pop() else {
                        return Err(SourceError::decode("trace conversion lost its root"));
                    };
                    match stack.last_mut() {
                        Some((parent, _)) => parent.children.push(done),
                        None => return Ok(done),
                    }
                }
            }
        }
    }

    fn split(self) -> Result<(CallTraceNode, Vec<CallFrame>), SourceError> {
        let gas = opt_quantity(self.gas.as_deref())?;
        let gas_used = opt_quantity(self.gas_used.as_deref())?;
        let mut node = CallTraceNode::new(CallKind::parse(&self.kind), self.from, self.to)
            .with_input(self.input)
            .with_value(self.value.unwrap_or_default());
        node.gas = gas;
        node.gas_used = gas_used;
        node.output = self.output.unwrap_or_default();
        node.error = self.error;
        Ok((node, self.calls))
    }
}

fn opt_quantity(raw: Option<&str>) -> Result<u64, SourceError> {
    raw.map(parse_quantity)
        .transpose()
        .map(Option::unwrap_or_default)
        .map_err(SourceError::decode)
}

/// Parse a saved `callTracer` result (the JSON object, not the RPC envelope).
pub fn parse_call_frame_json(raw: &str) -> Result<CallTraceNode, SourceError> {
    let frame: CallFrame =
        serde_json::from_str(raw).map_err(|e| SourceError::decode(e.to_string()))?;
    frame.into_node()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calltrace::flatten;

    const TRACE: &str = r#"{
        "type": "CALL",
        "from": "0x00000000000000000000000000000000000000a1",
        "to": "0x00000000000000000000000000000000000000b2",
        "value": "0xde0b6b3a7640000",
        "gas": "0x30d40",
        "gasUsed": "0x1d4c0",
        "input": "0x7ff36ab5",
        "calls": [
            {
                "type": "STATICCALL",
                "from": "0x00000000000000000000000000000000000000b2",
                "to": "0x00000000000000000000000000000000000000c3",
                "input": "0x0902f1ac",
                "output": "0x01"
            },
            {
                "type": "DELEGATECALL",
                "from": "0x00000000000000000000000000000000000000b2",
                "to": "0x00000000000000000000000000000000000000d4",
                "input": "0x",
                "error": "execution reverted",
                "calls": [
                    {
                        "type": "CALL",
                        "from": "0x00000000000000000000000000000000000000d4",
                        "to": "0x00000000000000000000000000000000000000e5",
                        "input": "0xa9059cbb"
                    }
                ]
            }
        ]
    }"#;

    #[test]
    fn converts_nested_frames_in_order() {
        let root = parse_call_frame_json(TRACE).unwrap();
        assert_eq!(root.node_count(), 4);
        assert_eq!(root.gas, 200_000);
        assert_eq!(root.gas_used, 120_000);
        assert_eq!(root.value, U256::from(1_000_000_000_000_000_000u128));
        assert_eq!(root.children[0].kind, CallKind::StaticCall);
        assert_eq!(root.children[1].error.as_deref(), Some("execution reverted"));

        let flat = flatten(&root);
        let depths: Vec<usize> = flat.iter().map(|c| c.depth).collect();
        assert_eq!(depths, vec![0, 1, 1, 2]);
        assert!(flat[2].failed);
    }

    #[test]
    fn rejects_bad_quantities() {
        let raw = r#"{"type":"CALL","from":"0x00000000000000000000000000000000000000a1","gas":"12"}"#;
        assert!(matches!(
            parse_call_frame_json(raw),
            Err(SourceError::Decode(_))
        ));
    }
}

//! Call traces: the owned execution tree, its pre-order flattening, and the
//! inverse rebuild.
//!
//! Traversal is always iterative so deeply nested traces cannot exhaust the
//! stack.

pub mod enrich;
pub mod explain;
pub mod stage;

use alloy_primitives::{Address, Bytes, Selector, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chain::InternalTx;

pub use enrich::{
    candidate_addresses, enrich_addresses, AddressInfo, Enrichment, EnrichmentStatus,
};
pub use explain::explain_calls;
pub use stage::CallTraceStage;

// =============================================================================
// TREE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallKind {
    Call,
    StaticCall,
    DelegateCall,
    CallCode,
    Create,
    Create2,
    SelfDestruct,
    Unknown,
}

impl CallKind {
    /// Accepts tracer ("CALL") and explorer ("call", "delegatecall") spellings.
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "CALL" => CallKind::Call,
            "STATICCALL" => CallKind::StaticCall,
            "DELEGATECALL" => CallKind::DelegateCall,
            "CALLCODE" => CallKind::CallCode,
            "CREATE" => CallKind::Create,
            "CREATE2" => CallKind::Create2,
            "SELFDESTRUCT" | "SUICIDE" => CallKind::SelfDestruct,
            _ => CallKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Call => "CALL",
            CallKind::StaticCall => "STATICCALL",
            CallKind::DelegateCall => "DELEGATECALL",
            CallKind::CallCode => "CALLCODE",
            CallKind::Create => "CREATE",
            CallKind::Create2 => "CREATE2",
            CallKind::SelfDestruct => "SELFDESTRUCT",
            CallKind::Unknown => "UNKNOWN",
        }
    }
}

/// One frame of an execution trace. Children are owned and ordered by execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallTraceNode {
    pub kind: CallKind,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub gas: u64,
    pub gas_used: u64,
    pub input: Bytes,
    pub output: Bytes,
    pub error: Option<String>,
    pub children: Vec<CallTraceNode>,
}

impl CallTraceNode {
    pub fn new(kind: CallKind, from: Address, to: Option<Address>) -> Self {
        Self {
            kind,
            from,
            to,
            value: U256::ZERO,
            gas: 0,
            gas_used: 0,
            input: Bytes::new(),
            output: Bytes::new(),
            error: None,
            children: Vec::new(),
        }
    }

    pub fn with_input(mut self, input: impl Into<Bytes>) -> Self {
        self.input = input.into();
        self
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_child(mut self, child: CallTraceNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }

    pub fn shape(&self) -> Shape {
        // Post-order over an explicit stack: children are built before parents.
        let mut stack: Vec<(&CallTraceNode, bool)> = vec![(self, false)];
        let mut built: Vec<Shape> = Vec::new();
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                let children = built.split_off(built.len() - node.children.len());
                built.push(Shape(children));
            } else {
                stack.push((node, true));
                stack.extend(node.children.iter().rev().map(|c| (c, false)));
            }
        }
        built.pop().unwrap_or_default()
    }
}

impl Drop for CallTraceNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

/// Tree shape without payload, used to compare a tree with its rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Shape(pub Vec<Shape>);

// =============================================================================
// FLATTEN
// =============================================================================

/// One row of a flattened call trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlattenedCall {
    pub depth: usize,
    pub index: usize,
    pub kind: CallKind,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub selector: Option<Selector>,
    pub failed: bool,
}

fn selector_of(input: &[u8]) -> Option<Selector> {
    (input.len() >= 4).then(|| Selector::from_slice(&input[..4]))
}

/// Pre-order depth-first flattening with an explicit stack.
pub fn flatten(root: &CallTraceNode) -> Vec<FlattenedCall> {
    let mut out = Vec::with_capacity(root.node_count());
    let mut stack: Vec<(&CallTraceNode, usize)> = vec![(root, 0)];
    while let Some((node, depth)) = stack.pop() {
        out.push(FlattenedCall {
            depth,
            index: out.len(),
            kind: node.kind,
            from: node.from,
            to: node.to,
            value: node.value,
            selector: selector_of(&node.input),
            failed: node.error.is_some(),
        });
        stack.extend(node.children.iter().rev().map(|c| (c, depth + 1)));
    }
    out
}

/// Wrap an explorer's flat internal-transaction list as depth-0 calls.
pub fn flatten_internal(list: &[InternalTx]) -> Vec<FlattenedCall> {
    list.iter()
        .enumerate()
        .map(|(index, tx)| FlattenedCall {
            depth: 0,
            index,
            kind: CallKind::parse(&tx.kind),
            from: tx.from,
            to: tx.to,
            value: tx.value,
            selector: selector_of(&tx.input),
            failed: tx.is_error,
        })
        .collect()
}

// =============================================================================
// REBUILD
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RebuildError {
    #[error("first call must be at depth 0, found {0}")]
    NonZeroStart(usize),
    #[error("call {index} jumps from depth {from} to {to}")]
    DepthJump { index: usize, from: usize, to: usize },
    #[error("call index {index} does not follow {previous}")]
    IndexOrder { index: usize, previous: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuiltCall {
    pub call: FlattenedCall,
    pub children: Vec<RebuiltCall>,
}

impl RebuiltCall {
    pub fn shape(&self) -> Shape {
        let mut stack: Vec<(&RebuiltCall, bool)> = vec![(self, false)];
        let mut built: Vec<Shape> = Vec::new();
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                let children = built.split_off(built.len() - node.children.len());
                built.push(Shape(children));
            } else {
                stack.push((node, true));
                stack.extend(node.children.iter().rev().map(|c| (c, false)));
            }
        }
        built.pop().unwrap_or_default()
    }
}

impl Drop for RebuiltCall {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

/// Rebuild the forest described by a (depth, index) sequence.
///
/// A flattened tree yields exactly one root; a wrapped flat list yields one root
/// per entry.
pub fn rebuild(calls: &[FlattenedCall]) -> Result<Vec<RebuiltCall>, RebuildError> {
    let mut roots: Vec<RebuiltCall> = Vec::new();
    let mut open: Vec<RebuiltCall> = Vec::new();
    let mut previous: Option<usize> = None;

    for call in calls {
        if let Some(prev) = previous {
            if call.index <= prev {
                return Err(RebuildError::IndexOrder {
                    index: call.index,
                    previous: prev,
                });
            }
        } else if call.depth != 0 {
            return Err(RebuildError::NonZeroStart(call.depth));
        }
        if call.depth > open.len() {
            return Err(RebuildError::DepthJump {
                index: call.index,
                from: open.len().saturating_sub(1),
                to: call.depth,
            });
        }
        while open.len() > call.depth {
            close_top(&mut open, &mut roots);
        }
        open.push(RebuiltCall {
            call: call.clone(),
            children: Vec::new(),
        });
        previous = Some(call.index);
    }
    while !open.is_empty() {
        close_top(&mut open, &mut roots);
    }
    Ok(roots)
}

fn close_top(open: &mut Vec<RebuiltCall>, roots: &mut Vec<RebuiltCall>) {
    if let Some(done) = open.pop() {
        match open.last_mut() {
            Some(parent) => parent.children.push(done),
            None => roots.push(done),
        }
    }
}

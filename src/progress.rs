//! Ordered progress events for one analysis run.
//!
//! A run binds at most one [`ProgressSink`] to a [`ProgressHandle`] before the
//! first stage starts. Delivery is fire-and-forget: sinks cannot fail the run.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use uuid::Uuid;

use crate::classify::PatternType;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    RpcDone { block_number: u64, logs: usize },
    EtherscanStart,
    EtherscanDone { internal_txs: usize, abi_verified: bool },
    TenderlyStart,
    TenderlyDone { trace_available: bool, calls: usize },
    CalltraceEnrichStart { candidates: usize },
    CalltraceEnrichDone { enriched: usize, unknown: usize },
    CalltraceExplainStart,
    CalltraceExplainDone { explained: bool },
    DraftStart,
    DraftToken { text: String },
    DraftDone { chars: usize },
    VerifyStart,
    VerifyDone { passed: bool, issues: usize },
    Done { pattern: PatternType },
    Failed { code: String, message: String },
}

impl ProgressEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RpcDone { .. } => "rpc_done",
            Self::EtherscanStart => "etherscan_start",
            Self::EtherscanDone { .. } => "etherscan_done",
            Self::TenderlyStart => "tenderly_start",
            Self::TenderlyDone { .. } => "tenderly_done",
            Self::CalltraceEnrichStart { .. } => "calltrace_enrich_start",
            Self::CalltraceEnrichDone { .. } => "calltrace_enrich_done",
            Self::CalltraceExplainStart => "calltrace_explain_start",
            Self::CalltraceExplainDone { .. } => "calltrace_explain_done",
            Self::DraftStart => "draft_start",
            Self::DraftToken { .. } => "draft_token",
            Self::DraftDone { .. } => "draft_done",
            Self::VerifyStart => "verify_start",
            Self::VerifyDone { .. } => "verify_done",
            Self::Done { .. } => "done",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Failed { .. })
    }
}

pub trait ProgressSink: Send + Sync {
    fn deliver(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn deliver(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Run-scoped emitter. Without a sink every emission is a no-op.
pub struct ProgressHandle<'a> {
    sink: Option<&'a dyn ProgressSink>,
    run_id: Uuid,
    emitted: AtomicU64,
    finished: AtomicBool,
}

impl<'a> ProgressHandle<'a> {
    pub fn new(run_id: Uuid, sink: Option<&'a dyn ProgressSink>) -> Self {
        Self {
            sink,
            run_id,
            emitted: AtomicU64::new(0),
            finished: AtomicBool::new(false),
        }
    }

    pub fn detached(run_id: Uuid) -> Self {
        Self::new(run_id, None)
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn is_attached(&self) -> bool {
        self.sink.is_some()
    }

    pub fn emit(&self, event: ProgressEvent) {
        if self.finished.load(Ordering::Acquire) {
            tracing::debug!(run_id = %self.run_id, event = event.name(), "event after terminal dropped");
            return;
        }
        if event.is_terminal() {
            self.finished.store(true, Ordering::Release);
        }
        let Some(sink) = self.sink else {
            return;
        };
        self.emitted.fetch_add(1, Ordering::Relaxed);
        sink.deliver(&event);
    }

    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(ProgressEvent::name).collect()
    }
}

impl ProgressSink for RecordingSink {
    fn deliver(&self, event: &ProgressEvent) {
        let mut events = match self.events.lock() {
            Ok(events) => events,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.push(event.clone());
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("progress worker failed: {0}")]
    Join(String),
}

#[derive(Debug, Serialize)]
struct ProgressRecord {
    timestamp_ms: i64,
    seq: u64,
    #[serde(flatten)]
    event: ProgressEvent,
}

/// Writes one JSON line per event from a background thread.
#[derive(Debug)]
pub struct JsonlProgressSink {
    sender: Mutex<mpsc::Sender<ProgressRecord>>,
    seq: AtomicU64,
}

pub struct ProgressWorker {
    handle: Option<std::thread::JoinHandle<Result<(), ProgressError>>>,
}

impl ProgressWorker {
    /// Wait for the writer to drain. Drop the sink first or this blocks.
    pub fn join(mut self) -> Result<(), ProgressError> {
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(ProgressError::Join("progress worker panicked".to_string())),
            },
            None => Ok(()),
        }
    }
}

impl JsonlProgressSink {
    pub fn new(path: impl AsRef<Path>) -> Result<(Self, ProgressWorker), ProgressError> {
        let file = std::fs::File::create(path)?;
        let (sender, receiver) = mpsc::channel::<ProgressRecord>();
        let handle = std::thread::spawn(move || write_progress_loop(file, receiver));
        Ok((
            Self {
                sender: Mutex::new(sender),
                seq: AtomicU64::new(0),
            },
            ProgressWorker {
                handle: Some(handle),
            },
        ))
    }
}

impl ProgressSink for JsonlProgressSink {
    fn deliver(&self, event: &ProgressEvent) {
        let record = ProgressRecord {
            timestamp_ms: now_epoch_ms(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            event: event.clone(),
        };
        let sent = match self.sender.lock() {
            Ok(sender) => sender.send(record).is_ok(),
            Err(_) => false,
        };
        if !sent {
            tracing::warn!(event = event.name(), "progress writer closed, event dropped");
        }
    }
}

fn write_progress_loop(
    file: std::fs::File,
    receiver: mpsc::Receiver<ProgressRecord>,
) -> Result<(), ProgressError> {
    let mut writer = BufWriter::new(file);
    for record in receiver {
        let line =
            serde_json::to_string(&record).map_err(|e| ProgressError::Serde(e.to_string()))?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

//! Cooperative cancellation and the progress-event channel (spec §3, §5).

use crate::core::types::ProgressEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared observable cancel flag, checked at defined suspension points
/// (before each scheduled send, after each response, before each
/// rate-limit wait). Setting it is idempotent and safe from any thread.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Single-producer-single-consumer sink for [`ProgressEvent`]s, not a
/// callback graph: the orchestrator is the only producer for a given run,
/// and delivery order within a run is the channel's FIFO order.
pub trait ProgressSink: Send + Sync {
    fn send(&self, event: ProgressEvent);
}

/// In-process sink backed by a standard mpsc channel. The production CLI
/// and tests both just drain the receiver half.
pub struct ChannelProgressSink {
    tx: std::sync::mpsc::Sender<ProgressEvent>,
}

impl ChannelProgressSink {
    pub fn channel() -> (Self, std::sync::mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = std::sync::mpsc::channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelProgressSink {
    fn send(&self, event: ProgressEvent) {
        // The consumer going away mid-run is not the engine's problem: per
        // spec §4.8, events are simply dropped once the channel is closed.
        let _ = self.tx.send(event);
    }
}

/// Sink that discards everything; useful when a caller only wants the
/// final `SyncResult` via the orchestrator's return value.
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn send(&self, _event: ProgressEvent) {}
}

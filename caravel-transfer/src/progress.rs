//! Progress events for embedding applications
//!
//! The engine never talks to a UI. It publishes events through a
//! caller-supplied [`ProgressSink`]; a UI shell forwards them wherever it
//! likes, a headless driver renders a progress bar, tests collect them in
//! a channel, and [`NullSink`] drops them.

use std::time::Duration;

use crate::stats::StatsSnapshot;

/// One observable step of a transfer batch.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A batch of files is about to start.
    BatchStarted {
        /// Files in the batch.
        total_files: u64,
        /// Decompressed bytes the batch is expected to produce.
        total_bytes: u64,
    },
    /// One file began downloading.
    FileStarted {
        /// Manifest path of the file.
        path: String,
        /// Its decompressed size in bytes.
        size: u64,
    },
    /// More bytes of one file arrived.
    FileProgress {
        /// Manifest path of the file.
        path: String,
        /// Bytes received since the previous event for this file.
        bytes: u64,
    },
    /// A failed attempt will be retried after a delay.
    FileRetrying {
        /// Manifest path of the file.
        path: String,
        /// Attempts consumed so far.
        attempt: u32,
        /// Attempt budget for this failure class.
        max_attempts: u32,
        /// Pause before the next attempt.
        delay: Duration,
        /// Human-readable failure description.
        reason: String,
    },
    /// The file was already present and correct; nothing was downloaded.
    FileSkipped {
        /// Manifest path of the file.
        path: String,
    },
    /// The file landed and verified.
    FileCompleted {
        /// Manifest path of the file.
        path: String,
    },
    /// The file failed permanently.
    FileFailed {
        /// Manifest path of the file.
        path: String,
        /// Human-readable failure description.
        reason: String,
    },
    /// Periodic aggregate report from the stats reporter.
    BatchProgress {
        /// Point-in-time counters and rates.
        snapshot: StatsSnapshot,
    },
    /// The batch finished, successfully or not.
    BatchCompleted {
        /// Files that downloaded and verified.
        completed: u64,
        /// Files skipped because they were already correct.
        skipped: u64,
        /// Files that failed permanently.
        failed: u64,
    },
}

/// Receives progress events. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    /// Publish one event.
    fn publish(&self, event: ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn publish(&self, _event: ProgressEvent) {}
}

/// Forward events into an unbounded channel. A dropped receiver is fine;
/// late events are discarded.
impl ProgressSink for tokio::sync::mpsc::UnboundedSender<ProgressEvent> {
    fn publish(&self, event: ProgressEvent) {
        let _ = self.send(event);
    }
}

//! Shared transfer counters
//!
//! One [`GlobalTransferStats`] instance spans a whole orchestrated
//! operation, across every batch and repair pass it runs. The engine's
//! transfer tasks bump the atomic counters from many tasks at once; a
//! reporter task polls [`GlobalTransferStats::snapshot`] to derive percent
//! and throughput for the UI.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Counters for the operation currently running. Shared via `Arc`.
#[derive(Debug)]
pub struct GlobalTransferStats {
    expected_bytes: AtomicU64,
    transferred_bytes: AtomicU64,
    completed_files: AtomicU64,
    skipped_files: AtomicU64,
    failed_files: AtomicU64,
    timing: Mutex<Timing>,
}

#[derive(Debug)]
struct Timing {
    started: Instant,
    last_poll: Instant,
    last_poll_bytes: u64,
}

/// Point-in-time view derived from the counters.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    /// Bytes the operation expects to account for in total.
    pub expected_bytes: u64,
    /// Bytes accounted for so far (downloaded, or skipped as present).
    pub transferred_bytes: u64,
    /// Completion in percent, clamped to 100.
    pub percent: f64,
    /// Mean throughput since the operation started, bytes per second.
    pub average_bps: f64,
    /// Throughput since the previous snapshot, bytes per second.
    pub recent_bps: f64,
    /// Files fully downloaded and verified.
    pub completed_files: u64,
    /// Files skipped because they were already correct.
    pub skipped_files: u64,
    /// Files failed permanently.
    pub failed_files: u64,
    /// Time since the operation started.
    pub elapsed: Duration,
}

impl Default for GlobalTransferStats {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalTransferStats {
    /// Fresh, zeroed counters.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            expected_bytes: AtomicU64::new(0),
            transferred_bytes: AtomicU64::new(0),
            completed_files: AtomicU64::new(0),
            skipped_files: AtomicU64::new(0),
            failed_files: AtomicU64::new(0),
            timing: Mutex::new(Timing {
                started: now,
                last_poll: now,
                last_poll_bytes: 0,
            }),
        }
    }

    /// Zero everything and set the expected volume. Called at the start of
    /// each orchestrated operation.
    pub fn reset(&self, expected_bytes: u64) {
        self.expected_bytes.store(expected_bytes, Ordering::Relaxed);
        self.transferred_bytes.store(0, Ordering::Relaxed);
        self.completed_files.store(0, Ordering::Relaxed);
        self.skipped_files.store(0, Ordering::Relaxed);
        self.failed_files.store(0, Ordering::Relaxed);
        let now = Instant::now();
        let mut timing = self.timing.lock();
        timing.started = now;
        timing.last_poll = now;
        timing.last_poll_bytes = 0;
    }

    /// Grow the expected volume, for work discovered mid-operation
    /// (repair passes re-queueing bad files).
    pub fn add_expected(&self, bytes: u64) {
        self.expected_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Account bytes that arrived or were found already present.
    pub fn add_transferred(&self, bytes: u64) {
        self.transferred_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Roll back bytes counted for an attempt that failed and will rerun.
    pub fn retract_transferred(&self, bytes: u64) {
        let mut current = self.transferred_bytes.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(bytes);
            match self.transferred_bytes.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Record one file finished.
    pub fn file_completed(&self) {
        self.completed_files.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one file skipped as already correct.
    pub fn file_skipped(&self) {
        self.skipped_files.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one file failed permanently.
    pub fn file_failed(&self) {
        self.failed_files.fetch_add(1, Ordering::Relaxed);
    }

    /// Bytes accounted for so far.
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    /// Derive percent and throughput. Each call also advances the window
    /// used for the recent-rate figure, so one poller should own calling
    /// this.
    pub fn snapshot(&self) -> StatsSnapshot {
        let expected = self.expected_bytes.load(Ordering::Relaxed);
        let transferred = self.transferred_bytes.load(Ordering::Relaxed);
        let now = Instant::now();

        let mut timing = self.timing.lock();
        let elapsed = now.duration_since(timing.started);
        let window = now.duration_since(timing.last_poll);
        let window_bytes = transferred.saturating_sub(timing.last_poll_bytes);
        timing.last_poll = now;
        timing.last_poll_bytes = transferred;
        drop(timing);

        let percent = if expected == 0 {
            100.0
        } else {
            ((transferred as f64 / expected as f64) * 100.0).min(100.0)
        };
        let average_bps = if elapsed.as_secs_f64() > 0.0 {
            transferred as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let recent_bps = if window.as_secs_f64() > 0.0 {
            window_bytes as f64 / window.as_secs_f64()
        } else {
            average_bps
        };

        StatsSnapshot {
            expected_bytes: expected,
            transferred_bytes: transferred,
            percent,
            average_bps,
            recent_bps,
            completed_files: self.completed_files.load(Ordering::Relaxed),
            skipped_files: self.skipped_files.load(Ordering::Relaxed),
            failed_files: self.failed_files.load(Ordering::Relaxed),
            elapsed,
        }
    }
}

/// Render a byte count for humans.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

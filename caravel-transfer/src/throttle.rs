//! Coarse token-bucket bandwidth throttling
//!
//! The throttler hands out byte budget in one-second windows. Each window
//! the budget refills toward the configured limit; callers take budget per
//! chunk before writing it to disk. A caller may overdraw the current
//! window (a single chunk larger than the limit must still make progress),
//! leaving the bucket in debt that later windows repay. Over any T seconds
//! the admitted volume stays within `limit * ceil(T)` plus one chunk.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

/// Window length for budget refills.
const WINDOW: Duration = Duration::from_secs(1);

/// Shared token-bucket limiter. Cheap to clone.
#[derive(Clone)]
pub struct BandwidthThrottler {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    limit_changed: Notify,
}

struct State {
    /// Bytes per second. Zero disables throttling.
    limit: u64,
    /// Remaining budget in the current window. Negative when in debt.
    available: i64,
    window_start: Instant,
}

impl State {
    /// Refill the budget once per elapsed window second.
    fn roll(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.window_start);
        if elapsed < WINDOW {
            return;
        }
        let windows = i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX);
        let limit = i64::try_from(self.limit).unwrap_or(i64::MAX);
        self.available = self
            .available
            .saturating_add(limit.saturating_mul(windows))
            .min(limit);
        self.window_start = now;
    }
}

impl BandwidthThrottler {
    /// Create a limiter. A limit of 0 bytes per second means unlimited.
    pub fn new(limit_bytes_per_sec: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    limit: limit_bytes_per_sec,
                    available: i64::try_from(limit_bytes_per_sec).unwrap_or(i64::MAX),
                    window_start: Instant::now(),
                }),
                limit_changed: Notify::new(),
            }),
        }
    }

    /// An unlimited throttler.
    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Current limit in bytes per second (0 = unlimited).
    pub fn limit(&self) -> u64 {
        self.inner.state.lock().limit
    }

    /// Change the limit. Applies to subsequent windows; bytes already
    /// admitted are never revoked. Setting 0 releases all waiters.
    pub fn set_limit(&self, limit_bytes_per_sec: u64) {
        {
            let mut state = self.inner.state.lock();
            state.limit = limit_bytes_per_sec;
        }
        debug!(limit = limit_bytes_per_sec, "bandwidth limit changed");
        self.inner.limit_changed.notify_waiters();
    }

    /// Take `bytes` of budget, waiting for window refills as needed.
    ///
    /// Returns immediately when unlimited or when `bytes` is 0. The last
    /// admission of a window may overdraw it; the resulting debt delays
    /// later windows, which keeps long-run throughput at the limit even
    /// for chunks larger than one second of budget.
    pub async fn acquire(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        loop {
            let wait = {
                let mut state = self.inner.state.lock();
                if state.limit == 0 {
                    return;
                }
                let now = Instant::now();
                state.roll(now);
                if state.available > 0 {
                    state.available -= i64::try_from(bytes).unwrap_or(i64::MAX);
                    return;
                }
                (state.window_start + WINDOW).duration_since(now)
            };
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = self.inner.limit_changed.notified() => {}
            }
        }
    }
}

impl std::fmt::Debug for BandwidthThrottler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("BandwidthThrottler")
            .field("limit", &state.limit)
            .field("available", &state.available)
            .finish()
    }
}

//! Verified file transfer for Caravel channels
//!
//! This crate moves manifest entries from an HTTP channel onto disk and
//! proves every byte before it lands:
//!
//! - Batched downloads with bounded concurrency and per-file retry budgets
//! - SHA-256 verification of every file against its manifest entry
//! - Ranged multi-part transfers for very large objects, with part reuse
//!   across interrupted runs
//! - Optional zstd-compressed forms with transparent plain fallback
//! - A shared bandwidth throttler that can be retuned mid-transfer
//! - Operation-wide statistics and a pluggable progress event sink
//!
//! # Example
//!
//! ```no_run
//! use caravel_transfer::{Fetcher, TransferEngine, TransferJob, TransferOptions};
//! use std::path::Path;
//!
//! # async fn example(entries: Vec<caravel_manifest::ManifestEntry>) -> caravel_transfer::Result<()> {
//! let engine = TransferEngine::new(Fetcher::new()?, TransferOptions::default());
//! let jobs = entries
//!     .into_iter()
//!     .map(|e| TransferJob::from_entry("https://cdn.example.com/live", Path::new("/games/live"), e))
//!     .collect();
//! let outcome = engine.run(jobs).await;
//! assert!(outcome.is_success());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod engine;
mod error;
mod fetch;
mod progress;
mod stats;
mod throttle;

pub use engine::{
    BatchOutcome, COMPRESSED_SUFFIX, DEFAULT_DECOMPRESS_ATTEMPTS, DEFAULT_MULTIPART_THRESHOLD,
    DEFAULT_NETWORK_ATTEMPTS, DEFAULT_PART_SIZE, DEFAULT_RETRY_DELAY, DEFAULT_STALL_TIMEOUT,
    MAX_CONCURRENT_TRANSFERS, TransferEngine, TransferJob, TransferOptions,
};
pub use error::{Error, Result};
pub use fetch::{CONNECT_TIMEOUT, Fetcher, StreamRequest, join_url};
pub use progress::{NullSink, ProgressEvent, ProgressSink};
pub use stats::{GlobalTransferStats, StatsSnapshot, format_bytes};
pub use throttle::BandwidthThrottler;

//! Error types for transfer operations

use std::time::Duration;

use thiserror::Error;

/// Errors produced while fetching, verifying and landing files.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Object does not exist on the channel
    #[error("content not found: {url}")]
    NotFound {
        /// URL that returned 404
        url: String,
    },

    /// Server answered with a status the transfer cannot use
    #[error("unexpected HTTP status {status} for {url}")]
    UnexpectedStatus {
        /// The HTTP status code
        status: u16,
        /// URL that was requested
        url: String,
    },

    /// Server ignored a byte-range request
    #[error("server ignored range request for {url}")]
    RangeNotSupported {
        /// URL that was requested
        url: String,
    },

    /// No bytes arrived within the stall window
    #[error("no bytes received for {} seconds", stall.as_secs())]
    Stalled {
        /// How long the connection was silent
        stall: Duration,
    },

    /// Response carried no Content-Length header
    #[error("missing Content-Length for {url}")]
    MissingLength {
        /// URL that was probed
        url: String,
    },

    /// Downloaded content does not hash to the manifest checksum
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Manifest path of the file
        path: String,
        /// Checksum the manifest promises
        expected: String,
        /// Checksum the downloaded bytes produced
        actual: String,
    },

    /// Downloaded content has the wrong length
    #[error("size mismatch for {path}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Manifest path of the file
        path: String,
        /// Size the manifest promises
        expected: u64,
        /// Size found on disk
        actual: u64,
    },

    /// Compressed payload would not decompress
    #[error("decompression failed for {path}: {reason}")]
    Decompress {
        /// Manifest path of the file
        path: String,
        /// What the decoder reported
        reason: String,
    },

    /// Local filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest error
    #[error("manifest error: {0}")]
    Manifest(#[from] caravel_manifest::Error),

    /// The operation's cancellation token fired
    #[error("transfer cancelled")]
    Cancelled,

    /// A file used up its whole attempt budget
    #[error("gave up on {path} after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Manifest path of the file
        path: String,
        /// Attempts consumed
        attempts: u32,
        /// The error from the final attempt
        last: Box<Error>,
    },
}

// Helper methods for common error construction
impl Error {
    /// Create a not-found error for a URL.
    pub fn not_found(url: impl Into<String>) -> Self {
        Self::NotFound { url: url.into() }
    }

    /// Create an unexpected-status error.
    pub fn unexpected_status(status: u16, url: impl Into<String>) -> Self {
        Self::UnexpectedStatus {
            status,
            url: url.into(),
        }
    }

    /// Create a checksum mismatch error.
    pub fn checksum_mismatch(
        path: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ChecksumMismatch {
            path: path.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a size mismatch error.
    pub fn size_mismatch(path: impl Into<String>, expected: u64, actual: u64) -> Self {
        Self::SizeMismatch {
            path: path.into(),
            expected,
            actual,
        }
    }

    /// Create a decompression error.
    pub fn decompress(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::Decompress {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether another attempt might succeed.
    ///
    /// Connection drops, timeouts, stalls, server errors and corrupted
    /// payloads are worth retrying. A 404 is permanent, local filesystem
    /// failures will not fix themselves, and cancellation is final.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_connect()
                    || e.is_timeout()
                    || e.is_request()
                    || e.is_body()
                    || e.is_decode()
                    || e.status().is_some_and(|s| s.is_server_error() || s.as_u16() == 429)
            }
            Self::UnexpectedStatus { status, .. } => *status >= 500 || *status == 429,
            Self::Stalled { .. }
            | Self::ChecksumMismatch { .. }
            | Self::SizeMismatch { .. }
            | Self::Decompress { .. } => true,
            Self::NotFound { .. }
            | Self::RangeNotSupported { .. }
            | Self::MissingLength { .. }
            | Self::Io(_)
            | Self::Manifest(_)
            | Self::Cancelled
            | Self::RetriesExhausted { .. } => false,
        }
    }
}

/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, Error>;

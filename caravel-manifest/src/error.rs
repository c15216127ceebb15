//! Error types for manifest parsing, building and diffing

use thiserror::Error;

/// Errors produced while parsing, validating or building manifests.
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying I/O failure while scanning or hashing files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The manifest document is not valid JSON even after lenient cleanup.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// An entry path is absolute, escapes the tree, or is otherwise unusable.
    #[error("invalid manifest path {path:?}: {reason}")]
    InvalidPath {
        /// The offending path as it appeared on the wire.
        path: String,
        /// Why the path was rejected.
        reason: &'static str,
    },

    /// An entry checksum is neither 64 hex digits nor the ignore sentinel.
    #[error("invalid checksum {checksum:?} for {path}")]
    InvalidChecksum {
        /// Path of the entry carrying the bad checksum.
        path: String,
        /// The rejected checksum string.
        checksum: String,
    },

    /// The part list of a multi-part entry does not add up to its size.
    #[error("part sizes for {path} sum to {parts_total} but entry size is {size}")]
    PartSizeMismatch {
        /// Path of the multi-part entry.
        path: String,
        /// Sum of the listed part sizes.
        parts_total: u64,
        /// Declared whole-file size.
        size: u64,
    },

    /// A manifest build found nothing to list.
    #[error("no files found under {root}")]
    EmptyTree {
        /// Root directory that was scanned.
        root: String,
    },

    /// A background hashing task panicked or was cancelled.
    #[error("hashing task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl Error {
    /// Create an invalid path error.
    pub fn invalid_path(path: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason,
        }
    }

    /// Create an invalid checksum error.
    pub fn invalid_checksum(path: impl Into<String>, checksum: impl Into<String>) -> Self {
        Self::InvalidChecksum {
            path: path.into(),
            checksum: checksum.into(),
        }
    }
}

/// Result type alias for manifest operations.
pub type Result<T> = std::result::Result<T, Error>;

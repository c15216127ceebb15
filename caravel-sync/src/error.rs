//! Error types for sync orchestration

use thiserror::Error;

/// Errors produced while orchestrating a sync operation.
#[derive(Error, Debug)]
pub enum Error {
    /// Another operation already holds the single-writer gate
    #[error("another sync operation is already running")]
    Busy,

    /// A launcher-side precondition failed
    #[error("preflight failed: {reason}")]
    Preflight {
        /// What the embedding application reported
        reason: String,
    },

    /// The channel could not be reached
    #[error("channel is unreachable: {source}")]
    PreflightOffline {
        /// The probe failure
        #[source]
        source: caravel_transfer::Error,
    },

    /// Not enough free space on the target volume
    #[error("insufficient disk space: need {required} bytes, {available} available")]
    PreflightDiskSpace {
        /// Bytes the operation needs, headroom included
        required: u64,
        /// Bytes free on the volume holding the install directory
        available: u64,
    },

    /// Repair passes ran out while files still failed verification
    #[error("{} files still bad after {attempts} repair passes", bad_files.len())]
    RepairExhausted {
        /// Repair passes consumed
        attempts: u32,
        /// Paths that never verified
        bad_files: Vec<String>,
    },

    /// Some managed files could not be removed
    #[error("uninstall left {remaining} files behind")]
    UninstallIncomplete {
        /// Files that survived deletion
        remaining: usize,
    },

    /// Transfer error
    #[error("transfer error: {0}")]
    Transfer(#[from] caravel_transfer::Error),

    /// Manifest error
    #[error("manifest error: {0}")]
    Manifest(#[from] caravel_manifest::Error),

    /// Local filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking task was aborted
    #[error("background task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// The operation's cancellation token fired
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Create a preflight error from a hook or precondition check.
    pub fn preflight(reason: impl Into<String>) -> Self {
        Self::Preflight {
            reason: reason.into(),
        }
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, Error>;

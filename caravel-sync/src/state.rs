//! Operation phase tracking and the single-writer gate
//!
//! One orchestrated operation runs at a time. [`SyncState::begin`] admits
//! exactly one caller; the [`OperationGuard`] it returns releases the gate
//! on drop, so early `?` returns can never wedge the launcher in a
//! permanently "installing" state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::info;

use crate::error::{Error, Result};

/// Where an operation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Nothing running.
    Idle,
    /// Checking preconditions; nothing touched yet.
    PreflightChecking,
    /// Transferring and deleting files.
    Active,
    /// Re-fetching files that failed verification.
    Verifying,
    /// Persisting version stamps and sweeping staging residue.
    Finalizing,
    /// The last operation failed. Cleared by the next `begin`.
    Failed,
}

/// Which top-level operation is running, for logs and progress text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Fresh install of a branch.
    Install,
    /// Re-verify and re-fetch a branch in place.
    Repair,
    /// Move a branch to the currently published version.
    Update,
    /// Remove a branch from disk.
    Uninstall,
    /// Add or remove optional HD content.
    OptionalContent,
}

/// Shared phase cell and single-writer gate. Cheap to clone via `Arc`.
#[derive(Debug)]
pub struct SyncState {
    phase: RwLock<SyncPhase>,
    busy: AtomicBool,
}

impl SyncState {
    /// A fresh idle state.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            phase: RwLock::new(SyncPhase::Idle),
            busy: AtomicBool::new(false),
        })
    }

    /// The current phase.
    pub fn phase(&self) -> SyncPhase {
        *self.phase.read()
    }

    /// Whether an operation currently holds the gate.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub(crate) fn set_phase(&self, phase: SyncPhase) {
        info!(phase = ?phase, "sync phase");
        *self.phase.write() = phase;
    }

    /// Take the gate, or fail with [`Error::Busy`] if an operation is
    /// already running. The returned guard moves the phase to
    /// `PreflightChecking` and restores `Idle` on drop unless the
    /// operation landed in `Failed`.
    pub fn begin(self: &Arc<Self>, op: OperationKind) -> Result<OperationGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::Busy)?;
        info!(operation = ?op, "sync operation starting");
        self.set_phase(SyncPhase::PreflightChecking);
        Ok(OperationGuard {
            state: Arc::clone(self),
            op,
        })
    }
}

/// RAII handle on the single-writer gate.
#[derive(Debug)]
pub struct OperationGuard {
    state: Arc<SyncState>,
    op: OperationKind,
}

impl OperationGuard {
    /// The operation this guard admits.
    pub fn operation(&self) -> OperationKind {
        self.op
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if self.state.phase() != SyncPhase::Failed {
            self.state.set_phase(SyncPhase::Idle);
        }
        self.state.busy.store(false, Ordering::Release);
        info!(operation = ?self.op, "sync operation finished");
    }
}

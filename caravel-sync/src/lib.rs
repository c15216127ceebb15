//! Sync orchestration for Caravel game channels
//!
//! This crate drives the end-to-end operations a launcher exposes:
//!
//! - Install, repair, update and uninstall of one branch
//! - Toggling optional HD content after install
//! - One consolidated reconciliation (manifest fetch, local scan, diff,
//!   prune, transfer) shared by every operation
//! - A single-writer gate so no two operations ever overlap
//! - Preflight checks (disk space, EULA, running game) answered partly
//!   here and partly by the embedding application through [`LauncherHooks`]
//!
//! # Example
//!
//! ```no_run
//! use caravel_sync::{RemoteChannel, SyncConfig, SyncOrchestrator};
//! use caravel_transfer::Fetcher;
//!
//! # async fn example() -> caravel_sync::Result<()> {
//! let channel = RemoteChannel::new("https://cdn.example.com/live", Fetcher::new()?);
//! let orchestrator = SyncOrchestrator::new(SyncConfig::new("/games", "live"), channel);
//! let outcome = orchestrator.install().await?;
//! println!("installed version {:?}", outcome.version);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod error;
mod orchestrator;
mod preflight;
mod remote;
mod state;

pub use error::{Error, Result};
pub use orchestrator::{MAX_REPAIR_ATTEMPTS, SyncConfig, SyncOrchestrator, SyncOutcome};
pub use preflight::{DefaultHooks, INSTALL_HEADROOM_BYTES, LauncherHooks, check_disk_space};
pub use remote::{MANIFEST_NAME, ManifestSource, RemoteChannel, VERSION_NAME};
pub use state::{OperationGuard, OperationKind, SyncPhase, SyncState};

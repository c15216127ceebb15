//! Preconditions checked before an operation touches the disk
//!
//! Disk space is measured here; everything that only the embedding
//! application can answer (EULA state, whether the game is running,
//! persisted install flags) goes through [`LauncherHooks`].

use std::path::{Path, PathBuf};

use sysinfo::Disks;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Extra free space demanded on top of the install's own size.
pub const INSTALL_HEADROOM_BYTES: u64 = 30 * 1024 * 1024 * 1024;

/// Questions only the embedding application can answer.
///
/// Every method has a permissive default, so a headless embedder only
/// implements what it actually tracks.
pub trait LauncherHooks: Send + Sync {
    /// Whether the user has accepted the game's EULA.
    fn eula_accepted(&self) -> bool {
        true
    }

    /// Whether the game is currently running out of this install.
    fn game_running(&self) -> bool {
        false
    }

    /// The version recorded when this branch last finished an operation.
    fn installed_version(&self, _branch: &str) -> Option<String> {
        None
    }

    /// Record (or with `None`, clear) the installed version for a branch.
    fn persist_installed(&self, _branch: &str, _version: Option<&str>) {}

    /// Record whether optional HD content is installed for a branch.
    fn persist_optional(&self, _branch: &str, _enabled: bool) {}
}

/// Hooks that accept everything and persist nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl LauncherHooks for DefaultHooks {}

/// Fail with [`Error::PreflightDiskSpace`] unless the volume holding
/// `path` has at least `required` bytes free.
///
/// When no mounted volume can be matched to `path` the check is skipped
/// with a warning rather than blocking the operation on a platform quirk.
pub fn check_disk_space(path: &Path, required: u64) -> Result<()> {
    if required == 0 {
        return Ok(());
    }
    let Some(available) = available_space(path) else {
        warn!(path = %path.display(), "no volume matched, skipping disk space check");
        return Ok(());
    };
    debug!(
        path = %path.display(),
        required,
        available,
        "disk space check"
    );
    if available < required {
        return Err(Error::PreflightDiskSpace {
            required,
            available,
        });
    }
    Ok(())
}

/// Free bytes on the volume holding `path`, by longest mount-point match.
/// The path itself may not exist yet; its nearest existing ancestor does.
fn available_space(path: &Path) -> Option<u64> {
    let target = nearest_existing_ancestor(path);
    let target = std::fs::canonicalize(&target).unwrap_or(target);
    let disks = Disks::new_with_refreshed_list();

    disks
        .list()
        .iter()
        .filter(|disk| target.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(sysinfo::Disk::available_space)
}

fn nearest_existing_ancestor(path: &Path) -> PathBuf {
    let mut candidate = path.to_path_buf();
    while !candidate.exists() {
        if !candidate.pop() {
            return PathBuf::from(".");
        }
    }
    candidate
}

//! End-to-end install, repair, update and uninstall workflows
//!
//! Every operation runs the same consolidated reconciliation: fetch the
//! published manifest, build a view of what is on disk, diff the two,
//! prune retired files, transfer the rest, then re-fetch whatever failed
//! verification for up to [`MAX_REPAIR_ATTEMPTS`] passes. The operations
//! differ only in their preflight checks, the local view they reconcile
//! against and what they persist afterwards.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{StreamExt, stream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use caravel_manifest::{
    CategoryScope, DiffOptions, FileCategory, Manifest, ManifestBuilder, diff, scan_sizes,
};
use caravel_transfer::{
    BandwidthThrottler, BatchOutcome, Fetcher, GlobalTransferStats, NullSink, ProgressEvent,
    ProgressSink, TransferEngine, TransferJob, TransferOptions,
};

use crate::error::{Error, Result};
use crate::preflight::{self, DefaultHooks, INSTALL_HEADROOM_BYTES, LauncherHooks};
use crate::remote::{ManifestSource, RemoteChannel};
use crate::state::{OperationKind, SyncPhase, SyncState};

/// Repair passes allowed before an operation gives up on its bad files.
pub const MAX_REPAIR_ATTEMPTS: u32 = 5;

/// How often the reporter task publishes aggregate progress.
const REPORT_INTERVAL: Duration = Duration::from_millis(500);

/// Everything an orchestrator needs to know about one managed branch.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Directory that holds one subdirectory per installed branch.
    pub library_root: PathBuf,
    /// Branch name; the install lands in `{library_root}/{branch}`.
    pub branch: String,
    /// Whether optional HD content is part of this install.
    pub include_optional: bool,
    /// Language tags whose localized audio is part of this install.
    pub languages: Vec<String>,
    /// Path substrings local scans skip (user config, screenshots, logs).
    pub exclude_patterns: Vec<String>,
    /// Parallel hash computations during local scans.
    pub scan_concurrency: usize,
    /// Download speed limit in KiB/s; 0 means unlimited.
    pub speed_limit_kbps: u64,
    /// Free space demanded beyond the install's own size during install.
    pub install_headroom: u64,
    /// Transfer engine tuning.
    pub transfer: TransferOptions,
}

impl SyncConfig {
    /// A config with defaults for everything but the location.
    pub fn new(library_root: impl Into<PathBuf>, branch: impl Into<String>) -> Self {
        Self {
            library_root: library_root.into(),
            branch: branch.into(),
            include_optional: false,
            languages: Vec::new(),
            exclude_patterns: Vec::new(),
            scan_concurrency: 16,
            speed_limit_kbps: 0,
            install_headroom: INSTALL_HEADROOM_BYTES,
            transfer: TransferOptions::default(),
        }
    }

    /// The branch's install directory.
    pub fn install_dir(&self) -> PathBuf {
        self.library_root.join(&self.branch)
    }

    fn diff_options(&self, scope: CategoryScope) -> DiffOptions {
        DiffOptions {
            scope,
            include_optional: self.include_optional,
            languages: self.languages.clone(),
        }
    }
}

/// What an operation did.
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    /// The version stamped after the operation, when one applies.
    pub version: Option<String>,
    /// Paths downloaded and verified.
    pub fetched: Vec<String>,
    /// Paths already correct on disk.
    pub skipped: Vec<String>,
    /// Paths pruned because the manifest no longer lists them.
    pub deleted: Vec<String>,
    /// Repair passes needed after the first transfer batch.
    pub repair_passes: u32,
}

impl SyncOutcome {
    /// Whether the operation changed anything on disk.
    pub fn changed(&self) -> bool {
        !self.fetched.is_empty() || !self.deleted.is_empty()
    }
}

/// How the local side of a reconciliation is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocalView {
    /// Trust nothing. The engine's per-file skip still reuses bytes that
    /// turn out to be correct, so this is cheap on a partial install.
    Empty,
    /// Paths and sizes only, no hashing. Enough to plan deletions.
    Sizes,
    /// Full hash scan; every local byte is re-verified.
    Scan,
}

struct ReconcileReport {
    jobs: Vec<TransferJob>,
    batch: BatchOutcome,
    deleted: Vec<String>,
}

/// Drives install, repair, update, uninstall and the HD content toggle
/// for one branch.
pub struct SyncOrchestrator {
    config: SyncConfig,
    channel: RemoteChannel,
    hooks: Arc<dyn LauncherHooks>,
    state: Arc<SyncState>,
    stats: Arc<GlobalTransferStats>,
    throttle: BandwidthThrottler,
    fetcher: Fetcher,
    sink: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl SyncOrchestrator {
    /// Create an orchestrator with default hooks and no progress sink.
    pub fn new(config: SyncConfig, channel: RemoteChannel) -> Self {
        let throttle = BandwidthThrottler::new(config.speed_limit_kbps.saturating_mul(1024));
        Self {
            fetcher: channel.fetcher().clone(),
            channel,
            hooks: Arc::new(DefaultHooks),
            state: SyncState::new(),
            stats: Arc::new(GlobalTransferStats::new()),
            throttle,
            sink: Arc::new(NullSink),
            cancel: CancellationToken::new(),
            config,
        }
    }

    /// Answer preflight questions through the embedding application.
    pub fn with_hooks(mut self, hooks: Arc<dyn LauncherHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Publish progress events to this sink.
    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Observe this token; a fired token fails the running operation with
    /// [`Error::Cancelled`].
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Shared phase cell, for UI polling.
    pub fn state(&self) -> &Arc<SyncState> {
        &self.state
    }

    /// Shared transfer counters, for UI polling.
    pub fn stats(&self) -> &Arc<GlobalTransferStats> {
        &self.stats
    }

    /// The token that cancels the running operation.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The branch configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Retune the download speed limit mid-operation. KiB/s, 0 unlimited.
    pub fn set_speed_limit(&self, kbps: u64) {
        self.throttle.set_limit(kbps.saturating_mul(1024));
    }

    /// Install the branch from scratch (or resume a previous attempt).
    pub async fn install(&self) -> Result<SyncOutcome> {
        let guard = self.state.begin(OperationKind::Install)?;
        self.stats.reset(0);
        let reporter = self.spawn_reporter();
        let result = async {
            self.preflight_hooks()?;
            let version = self.online_version().await?;
            self.run_full_pass(LocalView::Empty, self.config.install_headroom, version)
                .await
        }
        .await;
        self.finish(guard, reporter, result).await
    }

    /// Re-verify every installed file and re-fetch the ones that differ.
    pub async fn repair(&self) -> Result<SyncOutcome> {
        let guard = self.state.begin(OperationKind::Repair)?;
        self.stats.reset(0);
        let reporter = self.spawn_reporter();
        let result = async {
            self.preflight_hooks()?;
            let version = self.online_version().await?;
            self.run_full_pass(LocalView::Scan, 0, version).await
        }
        .await;
        self.finish(guard, reporter, result).await
    }

    /// Bring the branch to the published version, pruning retired files.
    /// A branch already at that version is left untouched.
    pub async fn update(&self) -> Result<SyncOutcome> {
        let guard = self.state.begin(OperationKind::Update)?;
        self.stats.reset(0);
        let reporter = self.spawn_reporter();
        let result = async {
            self.preflight_hooks()?;
            let version = self.online_version().await?;
            let installed = self.hooks.installed_version(&self.config.branch);
            if installed.as_deref() == Some(version.as_str()) {
                info!(version = %version, "branch is already up to date");
                return Ok(SyncOutcome {
                    version: Some(version),
                    ..SyncOutcome::default()
                });
            }
            self.run_full_pass(LocalView::Scan, 0, version).await
        }
        .await;
        self.finish(guard, reporter, result).await
    }

    /// Remove every managed file of the branch, then its directory.
    pub async fn uninstall(&self) -> Result<SyncOutcome> {
        let guard = self.state.begin(OperationKind::Uninstall)?;
        self.stats.reset(0);
        let reporter = self.spawn_reporter();
        let result = self.run_uninstall().await;
        self.finish(guard, reporter, result).await
    }

    /// Fetch or remove optional HD content, leaving everything else alone.
    pub async fn set_hd_content(&self, enabled: bool) -> Result<SyncOutcome> {
        let guard = self.state.begin(OperationKind::OptionalContent)?;
        self.stats.reset(0);
        let reporter = self.spawn_reporter();
        let result = self.run_optional(enabled).await;
        self.finish(guard, reporter, result).await
    }

    async fn finish(
        &self,
        guard: crate::state::OperationGuard,
        reporter: Reporter,
        result: Result<SyncOutcome>,
    ) -> Result<SyncOutcome> {
        reporter.stop().await;
        if result.is_err() {
            self.state.set_phase(SyncPhase::Failed);
        }
        drop(guard);
        result
    }

    /// The shared body of install, repair and update.
    async fn run_full_pass(
        &self,
        view: LocalView,
        headroom: u64,
        version: String,
    ) -> Result<SyncOutcome> {
        self.state.set_phase(SyncPhase::Active);
        let opts = self.config.diff_options(CategoryScope::all());
        let report = self.reconcile(&self.channel, &opts, view, headroom).await?;

        self.state.set_phase(SyncPhase::Verifying);
        let (passes, report) = self.repair_failures(report).await?;

        self.state.set_phase(SyncPhase::Finalizing);
        self.sweep_staging().await;
        self.hooks
            .persist_installed(&self.config.branch, Some(&version));
        info!(branch = %self.config.branch, version = %version, "operation finalized");
        Ok(Self::outcome(report, passes, Some(version)))
    }

    async fn run_optional(&self, enabled: bool) -> Result<SyncOutcome> {
        self.preflight_hooks()?;
        self.online_version().await?;

        self.state.set_phase(SyncPhase::Active);
        let opts = DiffOptions {
            scope: CategoryScope::only(FileCategory::Optional),
            include_optional: enabled,
            languages: self.config.languages.clone(),
        };
        let view = if enabled {
            LocalView::Empty
        } else {
            LocalView::Sizes
        };
        let report = self.reconcile(&self.channel, &opts, view, 0).await?;

        self.state.set_phase(SyncPhase::Verifying);
        let (passes, report) = self.repair_failures(report).await?;

        self.state.set_phase(SyncPhase::Finalizing);
        self.sweep_staging().await;
        self.hooks.persist_optional(&self.config.branch, enabled);
        info!(branch = %self.config.branch, enabled, "optional content toggled");
        Ok(Self::outcome(report, passes, None))
    }

    async fn run_uninstall(&self) -> Result<SyncOutcome> {
        self.preflight_hooks()?;
        let install_dir = self.config.install_dir();
        if !install_dir.exists() {
            return Err(Error::preflight(format!(
                "branch {} is not installed",
                self.config.branch
            )));
        }

        self.state.set_phase(SyncPhase::Active);
        let (files, dirs) = collect_tree(&install_dir).await?;
        info!(files = files.len(), "uninstalling branch");

        let results: Vec<Option<String>> = stream::iter(files)
            .map(|path| {
                let root = install_dir.clone();
                async move {
                    let rel = path
                        .strip_prefix(&root)
                        .unwrap_or(&path)
                        .to_string_lossy()
                        .replace('\\', "/");
                    match tokio::fs::remove_file(&path).await {
                        Ok(()) => Some(rel),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Some(rel),
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "could not delete file");
                            None
                        }
                    }
                }
            })
            .buffer_unordered(self.config.scan_concurrency.max(1))
            .collect()
            .await;

        let remaining = results.iter().filter(|r| r.is_none()).count();
        let deleted: Vec<String> = results.into_iter().flatten().collect();

        // Children before parents.
        let mut dirs = dirs;
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
        for dir in dirs {
            let _ = tokio::fs::remove_dir(&dir).await;
        }
        let _ = tokio::fs::remove_dir(&install_dir).await;

        if remaining > 0 {
            return Err(Error::UninstallIncomplete { remaining });
        }

        self.state.set_phase(SyncPhase::Finalizing);
        self.hooks.persist_installed(&self.config.branch, None);
        info!(branch = %self.config.branch, files = deleted.len(), "branch uninstalled");
        Ok(SyncOutcome {
            deleted,
            ..SyncOutcome::default()
        })
    }

    /// The one consolidated reconciliation every operation runs: fetch the
    /// manifest, observe the local side, diff, prune, transfer.
    async fn reconcile(
        &self,
        source: &dyn ManifestSource,
        opts: &DiffOptions,
        view: LocalView,
        headroom: u64,
    ) -> Result<ReconcileReport> {
        let remote = source.fetch_manifest().await?;
        let local = self.local_view(view).await?;
        let plan = diff(&remote, &local, opts);
        info!(
            fetch = plan.to_fetch.len(),
            delete = plan.to_delete.len(),
            bytes = plan.fetch_bytes(),
            "reconciliation planned"
        );

        let install_dir = self.config.install_dir();
        preflight::check_disk_space(&install_dir, plan.fetch_bytes().saturating_add(headroom))?;
        tokio::fs::create_dir_all(&install_dir).await?;

        let deleted = self.delete_files(&plan.to_delete).await;
        let jobs: Vec<TransferJob> = plan
            .to_fetch
            .iter()
            .map(|entry| TransferJob::from_entry(source.base_url(), &install_dir, entry.clone()))
            .collect();
        let batch = self.engine().run(jobs.clone()).await;
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(ReconcileReport {
            jobs,
            batch,
            deleted,
        })
    }

    /// Re-run the engine over the bad-file list until it is empty or the
    /// pass budget runs out.
    async fn repair_failures(
        &self,
        mut report: ReconcileReport,
    ) -> Result<(u32, ReconcileReport)> {
        let mut passes = 0u32;
        while !report.batch.is_success() {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if passes >= MAX_REPAIR_ATTEMPTS {
                return Err(Error::RepairExhausted {
                    attempts: passes,
                    bad_files: report.batch.failed_paths(),
                });
            }
            passes += 1;
            let bad: HashSet<String> = report.batch.failed_paths().into_iter().collect();
            warn!(pass = passes, files = bad.len(), "repair pass re-fetching bad files");
            let retry_jobs: Vec<TransferJob> = report
                .jobs
                .iter()
                .filter(|job| bad.contains(&job.entry.path))
                .cloned()
                .collect();
            let BatchOutcome {
                completed,
                skipped,
                failed,
            } = self.engine().run(retry_jobs).await;
            report.batch.completed.extend(completed);
            report.batch.skipped.extend(skipped);
            report.batch.failed = failed;
        }
        Ok((passes, report))
    }

    async fn local_view(&self, view: LocalView) -> Result<Manifest> {
        let install_dir = self.config.install_dir();
        if view == LocalView::Empty || !install_dir.exists() {
            return Ok(Manifest::default());
        }
        let built = if view == LocalView::Sizes {
            scan_sizes(&install_dir, &self.config.exclude_patterns).await
        } else {
            let mut builder = ManifestBuilder::new(&install_dir)
                .concurrency(self.config.scan_concurrency.max(1));
            for needle in &self.config.exclude_patterns {
                builder = builder.exclude(needle.clone());
            }
            builder.build().await
        };
        match built {
            Ok(mut manifest) => {
                manifest.files.retain(|entry| !is_staging_path(&entry.path));
                Ok(manifest)
            }
            // A bare directory is a valid install-in-progress.
            Err(caravel_manifest::Error::EmptyTree { .. }) => Ok(Manifest::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_files(&self, paths: &[String]) -> Vec<String> {
        if paths.is_empty() {
            return Vec::new();
        }
        let install_dir = self.config.install_dir();
        let mut deleted = Vec::new();
        for path in paths {
            let target = install_dir.join(path);
            match tokio::fs::remove_file(&target).await {
                Ok(()) => {
                    debug!(path = %path, "pruned");
                    deleted.push(path.clone());
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path, error = %e, "could not prune file"),
            }
        }
        info!(count = deleted.len(), "pruned retired files");
        deleted
    }

    /// Remove leftover `.tmp` and `.p{N}` intermediates after a clean pass.
    async fn sweep_staging(&self) {
        let install_dir = self.config.install_dir();
        if !install_dir.exists() {
            return;
        }
        let removed = tokio::task::spawn_blocking(move || {
            let mut removed = 0u32;
            for entry in walkdir::WalkDir::new(&install_dir).into_iter().flatten() {
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy();
                if is_staging_path(&name) && std::fs::remove_file(entry.path()).is_ok() {
                    removed += 1;
                }
            }
            removed
        })
        .await
        .unwrap_or(0);
        if removed > 0 {
            debug!(count = removed, "swept staging residue");
        }
    }

    fn preflight_hooks(&self) -> Result<()> {
        if !self.hooks.eula_accepted() {
            return Err(Error::preflight("EULA has not been accepted"));
        }
        if self.hooks.game_running() {
            return Err(Error::preflight("the game is currently running"));
        }
        Ok(())
    }

    /// Probe the channel; doubles as the online check.
    async fn online_version(&self) -> Result<String> {
        self.channel.fetch_version().await.map_err(|e| match e {
            Error::Transfer(source) => Error::PreflightOffline { source },
            other => other,
        })
    }

    fn engine(&self) -> TransferEngine {
        TransferEngine::new(self.fetcher.clone(), self.config.transfer.clone())
            .with_throttle(self.throttle.clone())
            .with_stats(Arc::clone(&self.stats))
            .with_sink(Arc::clone(&self.sink))
            .with_cancellation(self.cancel.child_token())
    }

    fn spawn_reporter(&self) -> Reporter {
        let token = self.cancel.child_token();
        let stats = Arc::clone(&self.stats);
        let sink = Arc::clone(&self.sink);
        let handle = tokio::spawn({
            let token = token.clone();
            async move {
                let mut ticker = tokio::time::interval(REPORT_INTERVAL);
                loop {
                    tokio::select! {
                        () = token.cancelled() => break,
                        _ = ticker.tick() => {
                            sink.publish(ProgressEvent::BatchProgress {
                                snapshot: stats.snapshot(),
                            });
                        }
                    }
                }
            }
        });
        Reporter { token, handle }
    }

    fn outcome(report: ReconcileReport, repair_passes: u32, version: Option<String>) -> SyncOutcome {
        SyncOutcome {
            version,
            fetched: report.batch.completed,
            skipped: report.batch.skipped,
            deleted: report.deleted,
            repair_passes,
        }
    }
}

struct Reporter {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Reporter {
    async fn stop(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }
}

async fn collect_tree(root: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let root = root.to_owned();
    let pair = tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        for entry in walkdir::WalkDir::new(&root).min_depth(1).into_iter().flatten() {
            if entry.file_type().is_dir() {
                dirs.push(entry.into_path());
            } else {
                files.push(entry.into_path());
            }
        }
        (files, dirs)
    })
    .await?;
    Ok(pair)
}

/// Whether a relative path (or file name) is transfer staging residue.
fn is_staging_path(path: &str) -> bool {
    if path.ends_with(".tmp") {
        return true;
    }
    if let Some(idx) = path.rfind(".p") {
        let digits = &path[idx + 2..];
        return !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit());
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_path_detection() {
        assert!(is_staging_path("paks/huge.rpak.p0"));
        assert!(is_staging_path("paks/huge.rpak.p12"));
        assert!(is_staging_path("bin/game.exe.tmp"));
        assert!(is_staging_path("bin/game.exe.zst.tmp"));

        assert!(!is_staging_path("paks/common.rpak"));
        assert!(!is_staging_path("audio/music.pak"));
        assert!(!is_staging_path("shader.p"));
        assert!(!is_staging_path("video/intro.mp4"));
    }

    #[test]
    fn test_install_dir_layout() {
        let config = SyncConfig::new("/games", "live");
        assert_eq!(config.install_dir(), PathBuf::from("/games/live"));
    }

    #[test]
    fn test_outcome_change_detection() {
        let mut outcome = SyncOutcome::default();
        assert!(!outcome.changed());
        outcome.skipped.push("a.bin".to_string());
        assert!(!outcome.changed());
        outcome.fetched.push("b.bin".to_string());
        assert!(outcome.changed());
    }
}

//! Headless sync operations driven from the command line

use std::sync::Arc;

use anyhow::{Context, bail};
use caravel_sync::{RemoteChannel, SyncOrchestrator, SyncOutcome};
use caravel_transfer::{Fetcher, ProgressEvent, format_bytes};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use crate::config::{ConfigManager, SettingsHooks};
use crate::{SyncCommands, SyncTarget, Toggle};

enum Operation {
    Install,
    Repair,
    Update,
    Uninstall,
    Hd(bool),
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Repair => "repair",
            Self::Update => "update",
            Self::Uninstall => "uninstall",
            Self::Hd(true) => "HD content install",
            Self::Hd(false) => "HD content removal",
        }
    }
}

pub async fn handle(cmd: SyncCommands) -> anyhow::Result<()> {
    match cmd {
        SyncCommands::Install { target } => run(Operation::Install, target).await,
        SyncCommands::Repair { target } => run(Operation::Repair, target).await,
        SyncCommands::Update { target } => run(Operation::Update, target).await,
        SyncCommands::Uninstall { target } => run(Operation::Uninstall, target).await,
        SyncCommands::Hd { state, target } => {
            run(Operation::Hd(state == Toggle::On), target).await
        }
    }
}

async fn run(op: Operation, target: SyncTarget) -> anyhow::Result<()> {
    let manager = ConfigManager::new().context("loading configuration")?;
    let mut settings = manager.config().clone();
    if let Some(url) = target.url {
        settings.channel_url = url;
    }
    if let Some(library) = target.library {
        settings.library_root = library.display().to_string();
    }
    if let Some(limit) = target.limit {
        settings.speed_limit_kbps = limit;
    }
    let branch = target.branch.unwrap_or_else(|| settings.branch.clone());
    if settings.channel_url.is_empty() {
        bail!("no channel URL configured; run `caravel config set channel_url <url>` or pass --url");
    }
    if settings.library_root.is_empty() {
        bail!(
            "no library root configured; run `caravel config set library_root <dir>` or pass --library"
        );
    }

    let channel = RemoteChannel::new(settings.channel_url.clone(), Fetcher::new()?);
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let orchestrator = SyncOrchestrator::new(settings.sync_config(&branch), channel)
        .with_hooks(Arc::new(SettingsHooks::new(manager)))
        .with_sink(Arc::new(tx));

    // Ctrl-C cancels the operation; partial intermediates stay for resume.
    let cancel = orchestrator.cancellation_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            cancel.cancel();
        }
    });

    let bar_task = tokio::spawn(render_progress(rx));
    info!(branch = %branch, "starting {}", op.name());
    let result = match op {
        Operation::Install => orchestrator.install().await,
        Operation::Repair => orchestrator.repair().await,
        Operation::Update => orchestrator.update().await,
        Operation::Uninstall => orchestrator.uninstall().await,
        Operation::Hd(enabled) => orchestrator.set_hd_content(enabled).await,
    };
    // Dropping the orchestrator closes the event channel and ends the bar.
    drop(orchestrator);
    let _ = bar_task.await;

    let outcome = result.with_context(|| format!("{} failed", op.name()))?;
    report(&op, &branch, &outcome);
    Ok(())
}

fn report(op: &Operation, branch: &str, outcome: &SyncOutcome) {
    info!(
        "✅ {} complete: {} fetched, {} already correct, {} deleted",
        op.name(),
        outcome.fetched.len(),
        outcome.skipped.len(),
        outcome.deleted.len()
    );
    if outcome.repair_passes > 0 {
        info!(
            "{} repair pass(es) were needed before every file verified",
            outcome.repair_passes
        );
    }
    if let Some(version) = &outcome.version {
        info!("branch {branch} is now at version {version}");
    }
}

/// Render aggregate progress events as a byte-granular progress bar.
async fn render_progress(mut rx: UnboundedReceiver<ProgressEvent>) {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );

    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::BatchProgress { snapshot } => {
                bar.set_length(snapshot.expected_bytes);
                bar.set_position(snapshot.transferred_bytes);
                bar.set_message(format!(
                    "{}/s, {} files done",
                    format_bytes(snapshot.recent_bps as u64),
                    snapshot.completed_files + snapshot.skipped_files,
                ));
            }
            ProgressEvent::FileRetrying {
                path,
                attempt,
                max_attempts,
                delay,
                reason,
            } => {
                bar.println(format!(
                    "retrying {path} in {}s (attempt {attempt}/{max_attempts}): {reason}",
                    delay.as_secs()
                ));
            }
            ProgressEvent::FileFailed { path, reason } => {
                bar.println(format!("❌ {path}: {reason}"));
            }
            _ => {}
        }
    }
    bar.finish_and_clear();
}

//! Caravel CLI library
//!
//! This library provides the core functionality for the `caravel` CLI tool:
//! headless sync operations against a channel, channel publishing, manifest
//! inspection and configuration management.

pub mod commands;
pub mod config;

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

/// Overrides for which channel and install a sync command targets.
///
/// Anything left unset falls back to the persisted configuration.
#[derive(Args, Debug, Clone, Default)]
pub struct SyncTarget {
    /// Branch to operate on
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Channel base URL
    #[arg(short, long)]
    pub url: Option<String>,

    /// Library root directory holding one subdirectory per branch
    #[arg(short, long)]
    pub library: Option<PathBuf>,

    /// Download speed limit in KiB/s (0 = unlimited)
    #[arg(long)]
    pub limit: Option<u64>,
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Install the configured branch from scratch (resumes a previous attempt)
    Install {
        #[command(flatten)]
        target: SyncTarget,
    },

    /// Re-verify every installed file and re-fetch the ones that differ
    Repair {
        #[command(flatten)]
        target: SyncTarget,
    },

    /// Bring the branch to the published version, pruning retired files
    Update {
        #[command(flatten)]
        target: SyncTarget,
    },

    /// Remove the branch from disk
    Uninstall {
        #[command(flatten)]
        target: SyncTarget,
    },

    /// Install or remove optional HD content
    Hd {
        /// Whether HD content should be present
        #[arg(value_enum)]
        state: Toggle,

        #[command(flatten)]
        target: SyncTarget,
    },
}

/// On/off argument for the HD content toggle.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Toggle {
    /// Install the content
    On,
    /// Remove the content
    Off,
}

#[derive(Subcommand)]
pub enum PublishCommands {
    /// Build a publishable channel directory from a game tree
    Build {
        /// Game tree to publish
        root: PathBuf,

        /// Output directory for the published channel
        #[arg(short, long)]
        out: PathBuf,

        /// Version string written to version.txt and the manifest
        #[arg(short, long)]
        version: String,

        /// Previous checksums.json; clearcache.txt lists only what changed
        /// against it (omit to list everything)
        #[arg(long)]
        previous: Option<PathBuf>,

        /// URL prefix for clearcache.txt entries
        #[arg(long)]
        base_url: Option<String>,

        /// zstd compression level
        #[arg(long, default_value_t = 19)]
        level: i32,

        /// Skip files whose relative path contains this substring
        #[arg(long = "exclude")]
        excludes: Vec<String>,

        /// Publish files whose relative path contains this substring with
        /// the ignore checksum
        #[arg(long = "ignore-checksum")]
        ignore_checksums: Vec<String>,

        /// Files at least this large publish as checksummed parts
        #[arg(long, default_value_t = commands::publish::PUBLISH_PART_SIZE)]
        part_size: u64,

        /// Parallel hash and compression jobs
        #[arg(short, long, default_value_t = 8)]
        concurrency: usize,
    },

    /// Purge changed URLs from the CDN cache
    Purge {
        /// Purge API base URL
        #[arg(long)]
        api: String,

        /// Bearer token for the purge API
        #[arg(long, env = "CARAVEL_PURGE_TOKEN")]
        token: String,

        /// URL list produced by publish build
        #[arg(long, default_value = "clearcache.txt")]
        list: PathBuf,

        /// Purge the whole cache instead of the listed URLs
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand)]
pub enum ManifestCommands {
    /// Summarize a manifest document
    Show {
        /// Path to a checksums.json file
        file: PathBuf,
    },

    /// List added, changed and removed files between two manifests
    Diff {
        /// The older checksums.json
        old: PathBuf,

        /// The newer checksums.json
        new: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Configuration key (e.g. channel_url, library_root, branch)
        key: String,
        /// New value
        value: String,
    },

    /// Get a single configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// Print the configuration file path
    Path,
}

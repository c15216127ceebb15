//! Build a manifest by scanning and hashing a local file tree
//!
//! Used by the publisher to produce `checksums.json` for a new build, and
//! by repair to construct the install's actual state before diffing it
//! against the channel. Hashing fans out over the blocking thread pool;
//! individual unreadable files are skipped with a warning rather than
//! failing the whole scan.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{StreamExt, stream};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::checksum::{self, IGNORE_CHECKSUM};
use crate::entry::{FileCategory, ManifestEntry, category_of_path, language_of_path, normalize_path};
use crate::error::{Error, Result};
use crate::manifest::Manifest;

/// Progress of a running scan, reported once per finished file.
#[derive(Debug, Clone)]
pub struct BuildProgress {
    /// Files finished so far.
    pub hashed: u64,
    /// Total files the scan found.
    pub total: u64,
    /// Relative path of the file just finished.
    pub path: String,
}

type ProgressFn = dyn Fn(&BuildProgress) + Send + Sync;

/// Scans a tree and produces a [`Manifest`] describing it.
pub struct ManifestBuilder {
    root: PathBuf,
    exclude_substrings: Vec<String>,
    ignore_checksum_substrings: Vec<String>,
    concurrency: usize,
    languages: Vec<String>,
    version: Option<String>,
    progress: Option<Arc<ProgressFn>>,
}

impl ManifestBuilder {
    /// Create a builder rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exclude_substrings: Vec::new(),
            ignore_checksum_substrings: Vec::new(),
            concurrency: std::thread::available_parallelism().map_or(4, NonZeroUsize::get),
            languages: Vec::new(),
            version: None,
            progress: None,
        }
    }

    /// Skip files whose relative path contains this substring
    /// (ASCII-case-insensitive). Skipped files are not listed at all.
    pub fn exclude(mut self, substring: impl Into<String>) -> Self {
        self.exclude_substrings.push(substring.into());
        self
    }

    /// List files whose relative path contains this substring with the
    /// ignore sentinel instead of a real checksum.
    pub fn ignore_checksum(mut self, substring: impl Into<String>) -> Self {
        self.ignore_checksum_substrings.push(substring.into());
        self
    }

    /// Bound the number of files hashed in parallel (minimum 1).
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Record the language tags this build publishes localized audio for.
    /// When unset, tags discovered from the path convention are recorded.
    pub fn languages(mut self, languages: Vec<String>) -> Self {
        self.languages = languages;
        self
    }

    /// Record the build version in the manifest.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Install a progress callback, invoked once per finished file.
    pub fn on_progress(mut self, callback: impl Fn(&BuildProgress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Scan the tree and hash every kept file.
    pub async fn build(&self) -> Result<Manifest> {
        let scanned = self.scan().await?;
        if scanned.is_empty() {
            return Err(Error::EmptyTree {
                root: self.root.display().to_string(),
            });
        }

        let total = scanned.len() as u64;
        let hashed = Arc::new(AtomicU64::new(0));
        let ignore_needles: Vec<String> = self
            .ignore_checksum_substrings
            .iter()
            .map(|s| s.to_ascii_lowercase())
            .collect();
        debug!(total, root = %self.root.display(), "hashing scanned tree");

        let results: Vec<Result<Option<ManifestEntry>>> = stream::iter(scanned)
            .map(|file| {
                let hashed = Arc::clone(&hashed);
                let progress = self.progress.clone();
                let lower = file.rel_path.to_ascii_lowercase();
                let ignore = ignore_needles.iter().any(|needle| lower.contains(needle));
                async move {
                    let entry = hash_one(file, ignore).await?;
                    if let Some(entry) = &entry {
                        let done = hashed.fetch_add(1, Ordering::Relaxed) + 1;
                        if let Some(progress) = progress {
                            (*progress)(&BuildProgress {
                                hashed: done,
                                total,
                                path: entry.path.clone(),
                            });
                        }
                    }
                    Ok(entry)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut files = Vec::with_capacity(results.len());
        for result in results {
            if let Some(entry) = result? {
                files.push(entry);
            }
        }
        if files.is_empty() {
            return Err(Error::EmptyTree {
                root: self.root.display().to_string(),
            });
        }
        // Deterministic output: repeated builds of the same tree are identical.
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let languages = if self.languages.is_empty() {
            discovered_languages(&files)
        } else {
            self.languages.clone()
        };

        Ok(Manifest {
            version: self.version.clone(),
            languages,
            files,
        })
    }

    /// Walk the tree on the blocking pool and collect kept regular files.
    async fn scan(&self) -> Result<Vec<ScannedFile>> {
        let root = self.root.clone();
        let excludes: Vec<String> = self
            .exclude_substrings
            .iter()
            .map(|s| s.to_ascii_lowercase())
            .collect();

        let scanned = tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            for entry in WalkDir::new(&root) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(error = %e, "skipping unreadable directory entry");
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(rel) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                let rel_path = normalize_path(&rel.to_string_lossy());
                let lower = rel_path.to_ascii_lowercase();
                if excludes.iter().any(|needle| lower.contains(needle)) {
                    continue;
                }
                let size = match entry.metadata() {
                    Ok(meta) => meta.len(),
                    Err(e) => {
                        warn!(path = %rel_path, error = %e, "skipping unreadable file");
                        continue;
                    }
                };
                files.push(ScannedFile {
                    rel_path,
                    abs_path: entry.into_path(),
                    size,
                });
            }
            files
        })
        .await?;

        Ok(scanned)
    }

}

struct ScannedFile {
    rel_path: String,
    abs_path: PathBuf,
    size: u64,
}

/// Hash one file, or stamp it with the ignore sentinel.
///
/// Read failures are tolerated: the file is dropped from the manifest with
/// a warning, since a scan racing the game's own writes is routine.
async fn hash_one(file: ScannedFile, ignore: bool) -> Result<Option<ManifestEntry>> {
    let checksum = if ignore {
        IGNORE_CHECKSUM.to_string()
    } else {
        let abs = file.abs_path.clone();
        match tokio::task::spawn_blocking(move || checksum::hash_file(&abs)).await? {
            Ok(checksum) => checksum,
            Err(e) => {
                warn!(path = %file.rel_path, error = %e, "skipping unhashable file");
                return Ok(None);
            }
        }
    };
    Ok(Some(make_entry(&file.rel_path, checksum, file.size)))
}

fn make_entry(rel_path: &str, checksum: String, size: u64) -> ManifestEntry {
    ManifestEntry {
        path: rel_path.to_string(),
        checksum,
        size,
        optional: category_of_path(rel_path) == FileCategory::Optional,
        language: language_of_path(rel_path).map(str::to_string),
        parts: None,
    }
}

fn discovered_languages(files: &[ManifestEntry]) -> Vec<String> {
    let mut tags: Vec<String> = files
        .iter()
        .filter_map(|e| e.language.clone())
        .collect();
    tags.sort();
    tags.dedup();
    tags
}

/// Build a stat-only view of a tree: presence and sizes, no hashing.
///
/// Every entry carries the ignore sentinel, so diffing against it compares
/// by size alone. Used where a full hash scan would be wasteful.
pub async fn scan_sizes(root: &Path, exclude_substrings: &[String]) -> Result<Manifest> {
    let mut builder = ManifestBuilder::new(root);
    for needle in exclude_substrings {
        builder = builder.exclude(needle.clone());
    }
    // The empty needle matches every path, stamping the whole tree.
    builder.ignore_checksum("").build().await
}

//! Pure manifest reconciliation
//!
//! Diffing is where every sync operation starts: compare what the channel
//! publishes against what the install currently has, under the install's
//! category selections, and produce the fetch and delete work lists. No
//! I/O happens here; install, repair, update and the optional-content
//! toggle all feed different inputs through the same function.

use std::collections::{HashMap, HashSet};

use crate::checksum::checksum_matches;
use crate::entry::{FileCategory, ManifestEntry};
use crate::manifest::Manifest;

/// Which categories a reconciliation pass manages.
///
/// Files outside the scope are invisible: never fetched, never deleted.
/// A full sync manages everything; the optional-content toggle runs a
/// pass scoped to [`FileCategory::Optional`] alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryScope {
    base: bool,
    optional: bool,
    language: bool,
}

impl CategoryScope {
    /// Manage every category.
    pub const fn all() -> Self {
        Self {
            base: true,
            optional: true,
            language: true,
        }
    }

    /// Manage a single category.
    pub const fn only(category: FileCategory) -> Self {
        match category {
            FileCategory::Base => Self {
                base: true,
                optional: false,
                language: false,
            },
            FileCategory::Optional => Self {
                base: false,
                optional: true,
                language: false,
            },
            FileCategory::Language => Self {
                base: false,
                optional: false,
                language: true,
            },
        }
    }

    /// Whether this scope manages the given category.
    pub const fn contains(&self, category: FileCategory) -> bool {
        match category {
            FileCategory::Base => self.base,
            FileCategory::Optional => self.optional,
            FileCategory::Language => self.language,
        }
    }
}

/// The install's selections for one reconciliation pass.
#[derive(Debug, Clone)]
pub struct DiffOptions {
    /// Categories this pass manages at all.
    pub scope: CategoryScope,
    /// Whether optional high-detail content is wanted.
    pub include_optional: bool,
    /// Language tags whose localized audio is wanted.
    pub languages: Vec<String>,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            scope: CategoryScope::all(),
            include_optional: false,
            languages: Vec::new(),
        }
    }
}

impl DiffOptions {
    /// Whether the install wants a file of this category and language.
    ///
    /// Base content is always wanted; managed-but-unwanted files are
    /// pruned by [`diff`].
    pub fn wants(&self, category: FileCategory, language: Option<&str>) -> bool {
        match category {
            FileCategory::Base => true,
            FileCategory::Optional => self.include_optional,
            FileCategory::Language => language.is_some_and(|tag| {
                self.languages.iter().any(|l| l.eq_ignore_ascii_case(tag))
            }),
        }
    }
}

/// Work lists produced by [`diff`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestDiff {
    /// Remote entries to download (absent locally, or differing).
    pub to_fetch: Vec<ManifestEntry>,
    /// Local paths to remove (dropped by the remote, or deselected).
    pub to_delete: Vec<String>,
}

impl ManifestDiff {
    /// Whether there is nothing to do.
    pub fn is_empty(&self) -> bool {
        self.to_fetch.is_empty() && self.to_delete.is_empty()
    }

    /// Total decompressed bytes the fetch list will produce.
    pub fn fetch_bytes(&self) -> u64 {
        self.to_fetch.iter().map(|e| e.size).sum()
    }
}

/// Compare the channel's manifest against the local install's view.
///
/// `to_fetch` holds wanted remote entries that are missing locally or whose
/// content differs. Ignore-checksum entries differ only by size. `to_delete`
/// holds local paths inside the scope that are either no longer published
/// or no longer selected. A path never appears in both lists. Output order
/// follows the inputs, so diffing is deterministic.
pub fn diff(remote: &Manifest, local: &Manifest, opts: &DiffOptions) -> ManifestDiff {
    let local_by_path: HashMap<String, &ManifestEntry> = local
        .files
        .iter()
        .map(|e| (e.path.to_ascii_lowercase(), e))
        .collect();

    let mut to_fetch = Vec::new();
    let mut keep: HashSet<String> = HashSet::new();

    for entry in &remote.files {
        let category = entry.category();
        if !opts.scope.contains(category) || !opts.wants(category, entry.language_tag()) {
            continue;
        }
        let key = entry.path.to_ascii_lowercase();
        match local_by_path.get(&key) {
            Some(local_entry) if !entry_differs(entry, local_entry) => {}
            _ => to_fetch.push(entry.clone()),
        }
        keep.insert(key);
    }

    let mut to_delete = Vec::new();
    for entry in &local.files {
        if !opts.scope.contains(entry.category()) {
            continue;
        }
        if !keep.contains(&entry.path.to_ascii_lowercase()) {
            to_delete.push(entry.path.clone());
        }
    }

    ManifestDiff { to_fetch, to_delete }
}

/// Whether a local entry's content no longer matches the remote one.
fn entry_differs(remote: &ManifestEntry, local: &ManifestEntry) -> bool {
    if remote.is_ignored() || local.is_ignored() {
        remote.size != local.size
    } else {
        !checksum_matches(&remote.checksum, &local.checksum)
    }
}

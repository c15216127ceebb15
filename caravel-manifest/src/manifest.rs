//! The manifest document: everything one channel publishes

use serde::{Deserialize, Serialize};

use crate::entry::{ManifestEntry, normalize_path};
use crate::error::Result;
use crate::json;

/// A channel's published file list, the `checksums.json` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Build version string, mirrored by the channel's `version.txt`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Language tags the channel publishes localized audio for.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,
    /// Every file in the build.
    pub files: Vec<ManifestEntry>,
}

impl Manifest {
    /// Parse a manifest document, tolerating trailing commas, then
    /// normalize paths and checksums and validate every entry.
    pub fn from_json_lenient(input: &str) -> Result<Self> {
        let mut manifest: Self = json::from_str_lenient(input)?;
        for entry in &mut manifest.files {
            entry.normalize()?;
        }
        Ok(manifest)
    }

    /// Serialize for publishing. Pretty-printed, stable field order.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Look up an entry by path, tolerating backslash separators and
    /// ASCII case differences in the query.
    pub fn find(&self, path: &str) -> Option<&ManifestEntry> {
        let wanted = normalize_path(path);
        self.files
            .iter()
            .find(|e| e.path.eq_ignore_ascii_case(&wanted))
    }

    /// Sum of all decompressed file sizes.
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|e| e.size).sum()
    }

    /// Number of files listed.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the manifest lists no files.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

//! Manifest entries and file category rules

use serde::{Deserialize, Serialize};

use crate::checksum::IGNORE_CHECKSUM;
use crate::error::{Error, Result};

/// Path suffix marking optional high-detail content.
///
/// Optional files ship in their own archives so an install can skip or drop
/// them wholesale; the suffix is the category marker on both the manifest
/// and the local filesystem.
pub const OPTIONAL_SUFFIX: &str = ".opt.starpak";

/// Folder holding localized audio payloads, one subfolder per language tag:
/// `audio/localized/{tag}/...`.
pub const LOCALIZED_AUDIO_PREFIX: &str = "audio/localized/";

/// Which reconciliation bucket a file belongs to.
///
/// Base content is always synchronized. Optional and language content are
/// fetched or pruned according to the install's selections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileCategory {
    /// Required game content.
    Base,
    /// High-detail content the user can opt out of.
    Optional,
    /// Localized audio for one language tag.
    Language,
}

/// One piece of a multi-part file, fetched independently and concatenated
/// in list order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestPart {
    /// Lowercase hex SHA-256 of this part's bytes.
    pub checksum: String,
    /// Size of this part in bytes.
    pub size: u64,
}

/// One file the channel publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Forward-slash relative path under the install directory.
    pub path: String,
    /// Lowercase hex SHA-256 of the decompressed content, or the literal
    /// `"ignore"` sentinel.
    pub checksum: String,
    /// Decompressed size in bytes.
    pub size: u64,
    /// Whether this file is optional high-detail content.
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
    /// Language tag when this file is localized audio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Part list for files published in multiple pieces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<ManifestPart>>,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl ManifestEntry {
    /// Whether this entry carries the ignore-checksum sentinel.
    pub fn is_ignored(&self) -> bool {
        self.checksum == IGNORE_CHECKSUM
    }

    /// The reconciliation category of this entry.
    ///
    /// The explicit `optional` flag and `language` tag win; the path rules
    /// of [`category_of_path`] decide for entries without them.
    pub fn category(&self) -> FileCategory {
        if self.optional {
            FileCategory::Optional
        } else if self.language.is_some() {
            FileCategory::Language
        } else {
            category_of_path(&self.path)
        }
    }

    /// The language tag, from the field or from the path convention.
    pub fn language_tag(&self) -> Option<&str> {
        self.language.as_deref().or_else(|| language_of_path(&self.path))
    }

    /// Normalize separators and checksum case, then validate the entry.
    pub(crate) fn normalize(&mut self) -> Result<()> {
        self.path = normalize_path(&self.path);
        validate_rel_path(&self.path)?;
        if !crate::checksum::is_valid_checksum(&self.checksum) {
            return Err(Error::invalid_checksum(&self.path, &self.checksum));
        }
        self.checksum.make_ascii_lowercase();
        if let Some(parts) = &mut self.parts {
            let mut total = 0u64;
            for part in parts.iter_mut() {
                if !crate::checksum::is_valid_checksum(&part.checksum) {
                    return Err(Error::invalid_checksum(&self.path, &part.checksum));
                }
                part.checksum.make_ascii_lowercase();
                total = total.saturating_add(part.size);
            }
            if total != self.size {
                return Err(Error::PartSizeMismatch {
                    path: self.path.clone(),
                    parts_total: total,
                    size: self.size,
                });
            }
        }
        Ok(())
    }
}

/// Replace backslash separators with forward slashes.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Categorize a bare path with no manifest entry behind it.
///
/// Used when pruning local files the remote no longer lists, where only the
/// path is available. Matching is ASCII-case-insensitive since installs may
/// sit on case-preserving filesystems.
pub fn category_of_path(path: &str) -> FileCategory {
    if ends_with_ignore_case(path, OPTIONAL_SUFFIX) {
        FileCategory::Optional
    } else if starts_with_ignore_case(path, LOCALIZED_AUDIO_PREFIX) {
        FileCategory::Language
    } else {
        FileCategory::Base
    }
}

/// Extract the language tag from a localized-audio path, if it is one.
///
/// `audio/localized/french/general.mstr` yields `Some("french")`.
pub fn language_of_path(path: &str) -> Option<&str> {
    if !starts_with_ignore_case(path, LOCALIZED_AUDIO_PREFIX) {
        return None;
    }
    let rest = &path[LOCALIZED_AUDIO_PREFIX.len()..];
    let tag = rest.split('/').next().filter(|t| !t.is_empty())?;
    // A file sitting directly in the localized folder has no tag segment.
    if rest.len() == tag.len() { None } else { Some(tag) }
}

/// Reject paths that could land outside the install directory.
pub(crate) fn validate_rel_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::invalid_path(path, "empty"));
    }
    if path.starts_with('/') {
        return Err(Error::invalid_path(path, "absolute"));
    }
    if path.len() >= 2 && path.as_bytes()[1] == b':' {
        return Err(Error::invalid_path(path, "drive-qualified"));
    }
    if path.split('/').any(|seg| seg == "..") {
        return Err(Error::invalid_path(path, "escapes the install directory"));
    }
    Ok(())
}

fn ends_with_ignore_case(haystack: &str, suffix: &str) -> bool {
    haystack.len() >= suffix.len()
        && haystack
            .get(haystack.len() - suffix.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(suffix))
}

fn starts_with_ignore_case(haystack: &str, prefix: &str) -> bool {
    haystack
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str) -> ManifestEntry {
        ManifestEntry {
            path: path.to_string(),
            checksum: IGNORE_CHECKSUM.to_string(),
            size: 0,
            optional: false,
            language: None,
            parts: None,
        }
    }

    #[test]
    fn test_optional_suffix_rule() {
        assert_eq!(
            category_of_path("paks/Win64/highres_01.opt.starpak"),
            FileCategory::Optional
        );
        assert_eq!(
            category_of_path("paks/Win64/HIGHRES_01.OPT.STARPAK"),
            FileCategory::Optional
        );
        assert_eq!(category_of_path("paks/Win64/common.rpak"), FileCategory::Base);
    }

    #[test]
    fn test_localized_audio_rule() {
        assert_eq!(
            category_of_path("audio/localized/french/general.mstr"),
            FileCategory::Language
        );
        assert_eq!(category_of_path("audio/general.mstr"), FileCategory::Base);
        assert_eq!(
            language_of_path("audio/localized/french/general.mstr"),
            Some("french")
        );
        assert_eq!(language_of_path("audio/localized/stray.bin"), None);
        assert_eq!(language_of_path("bin/game.exe"), None);
    }

    #[test]
    fn test_explicit_fields_win() {
        let mut e = entry("somewhere/else.bin");
        e.language = Some("german".to_string());
        assert_eq!(e.category(), FileCategory::Language);
        assert_eq!(e.language_tag(), Some("german"));

        let mut e = entry("somewhere/else.bin");
        e.optional = true;
        assert_eq!(e.category(), FileCategory::Optional);
    }

    #[test]
    fn test_normalize_rewrites_separators_and_case() {
        let mut e = entry("paks\\Win64\\common.rpak");
        e.checksum = "ABCDEF0123456789ABCDEF0123456789ABCDEF0123456789ABCDEF0123456789".to_string();
        e.normalize().unwrap();
        assert_eq!(e.path, "paks/Win64/common.rpak");
        assert_eq!(
            e.checksum,
            "abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789"
        );
    }

    #[test]
    fn test_normalize_rejects_escaping_paths() {
        assert!(entry("../outside.dll").normalize().is_err());
        assert!(entry("/etc/passwd").normalize().is_err());
        assert!(entry("C:/Windows/system32.dll").normalize().is_err());
        assert!(entry("").normalize().is_err());
        assert!(entry("nested/../../outside.dll").normalize().is_err());
    }

    #[test]
    fn test_normalize_rejects_bad_checksums() {
        let mut e = entry("fine/path.bin");
        e.checksum = "not-a-digest".to_string();
        assert!(e.normalize().is_err());
    }

    #[test]
    fn test_normalize_checks_part_totals() {
        let mut e = entry("big/file.bin");
        e.size = 10;
        e.parts = Some(vec![
            ManifestPart {
                checksum: IGNORE_CHECKSUM.to_string(),
                size: 4,
            },
            ManifestPart {
                checksum: IGNORE_CHECKSUM.to_string(),
                size: 6,
            },
        ]);
        e.normalize().unwrap();

        e.size = 11;
        assert!(matches!(
            e.normalize(),
            Err(Error::PartSizeMismatch { parts_total: 10, size: 11, .. })
        ));
    }
}

//! Content manifest model for the Caravel sync engine
//!
//! A channel publishes a `checksums.json` manifest describing every file in
//! a build. This crate owns that document end to end:
//!
//! - Parsing, with tolerance for trailing commas in hand-edited manifests
//! - Streaming SHA-256 checksums and the `"ignore"` sentinel
//! - Building a manifest from a local tree with bounded parallel hashing
//! - Pure diffing of two manifests into fetch and delete work lists
//! - The category rules for base, optional and localized-audio content
//!
//! # Example
//!
//! ```no_run
//! use caravel_manifest::{CategoryScope, DiffOptions, Manifest, ManifestBuilder, diff};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let remote = Manifest::from_json_lenient(r#"{"files": []}"#)?;
//! let local = ManifestBuilder::new("/games/r5r/live")
//!     .exclude("cfg/user")
//!     .build()
//!     .await?;
//!
//! let work = diff(&remote, &local, &DiffOptions::default());
//! println!("{} to fetch, {} to delete", work.to_fetch.len(), work.to_delete.len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod builder;
mod checksum;
mod diff;
mod entry;
mod error;
mod json;
mod manifest;

pub use builder::{BuildProgress, ManifestBuilder, scan_sizes};
pub use checksum::{
    IGNORE_CHECKSUM, checksum_matches, hash_bytes, hash_file, hash_reader, is_valid_checksum,
};
pub use diff::{CategoryScope, DiffOptions, ManifestDiff, diff};
pub use entry::{
    FileCategory, LOCALIZED_AUDIO_PREFIX, ManifestEntry, ManifestPart, OPTIONAL_SUFFIX,
    category_of_path, language_of_path, normalize_path,
};
pub use error::{Error, Result};
pub use json::from_str_lenient;
pub use manifest::Manifest;

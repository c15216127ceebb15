//! Streaming SHA-256 checksums for manifest entries
//!
//! All checksums are lowercase hex SHA-256 digests of the decompressed file
//! content. Entries may instead carry the [`IGNORE_CHECKSUM`] sentinel for
//! files whose content changes out-of-band; such files are tracked by
//! presence and size only and never fail verification.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Checksum sentinel for files that are listed but never content-verified.
pub const IGNORE_CHECKSUM: &str = "ignore";

/// Read buffer size for streaming hashes. Large enough to keep spinning
/// disks sequential, small enough to stay off the large-allocation path.
const READ_BUF_SIZE: usize = 1024 * 1024;

/// Hash everything a reader yields, returning lowercase hex.
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash a file on disk without loading it into memory.
///
/// Synchronous; async callers run it on the blocking pool.
pub fn hash_file(path: &Path) -> io::Result<String> {
    hash_reader(File::open(path)?)
}

/// Hash an in-memory buffer, returning lowercase hex.
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Compare an expected manifest checksum against a computed one.
///
/// The ignore sentinel matches anything; hex comparison is
/// ASCII-case-insensitive since older manifests carried uppercase digests.
pub fn checksum_matches(expected: &str, actual: &str) -> bool {
    expected == IGNORE_CHECKSUM || expected.eq_ignore_ascii_case(actual)
}

/// Whether a wire checksum string is acceptable: the ignore sentinel or
/// exactly 64 hex digits.
pub fn is_valid_checksum(checksum: &str) -> bool {
    checksum == IGNORE_CHECKSUM
        || (checksum.len() == 64 && checksum.bytes().all(|b| b.is_ascii_hexdigit()))
}

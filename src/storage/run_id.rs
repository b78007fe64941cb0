use sha1::{Digest, Sha1};
use std::path::Path;

/// Default number of hex characters kept from the path digest.
pub const DEFAULT_ID_LENGTH: usize = 7;

/// Derive a run identifier from a directory path.
///
/// The identifier is the leading `len` hex characters of the SHA-1 digest
/// of the path string, so the same directory always maps to the same id.
pub fn run_id_for_path(path: &Path, len: usize) -> String {
    let mut hasher = Sha1::new();
    hasher.update(path.to_string_lossy().as_bytes());
    let mut digest = format!("{:x}", hasher.finalize());
    digest.truncate(len);
    digest
}

//! File-set fingerprinting for cheap staleness detection.
//!
//! A fingerprint is a short digest over every relevant file's
//! `(path, size, mtime)` triple. Comparing a stored fingerprint against a
//! freshly computed one answers "has the relevant file set changed?" without
//! reading file contents or loading the branch cache.
//!
//! The digest is truncated for compactness; the resulting collision
//! probability is acceptable because a fingerprint only gates a cheap
//! metadata rebuild, never the validity of stored chunk data.

use sha2::{Digest, Sha256};

use crate::models::FileInfo;

/// Hex length of the emitted fingerprint (64 bits of the SHA-256 digest).
const FINGERPRINT_HEX_LEN: usize = 16;

/// Compute the fingerprint of a file set.
///
/// Input order does not matter: files are sorted lexicographically by path
/// before hashing, so two observations of the same set are byte-identical.
/// Any single-field change to a file's size or mtime changes the result.
pub fn fingerprint(files: &[FileInfo]) -> String {
    let mut sorted: Vec<&FileInfo> = files.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));

    let joined = sorted
        .iter()
        .map(|f| format!("{}:{}:{}", f.path, f.size, f.modified_time))
        .collect::<Vec<_>>()
        .join("|");

    let digest = Sha256::digest(joined.as_bytes());
    hex::encode(digest)[..FINGERPRINT_HEX_LEN].to_string()
}

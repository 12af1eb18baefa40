//! Content hashing: SHA-256 over raw bytes, lowercase hex.
//!
//! **Exactly one place defines content hashing.** Artifacts are hashed with
//! plain SHA-256 (no domain prefix) so a third party can recompute every
//! digest with stock `sha256sum`.
//!
//! Re-hashing is idempotent: the same bytes always produce the same digest,
//! across calls and across processes. The verifier relies on nothing else.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Read buffer size for streaming file hashes.
const READ_CHUNK: usize = 1024 * 1024;

/// Upper bound on hashing worker threads within one bundle.
const MAX_HASH_WORKERS: usize = 8;

/// A SHA-256 digest rendered as 64 lowercase hex characters.
///
/// Invariant: the inner string is exactly 64 chars of `[0-9a-f]` (enforced by
/// [`Sha256Digest::parse`] and by construction in [`hash_bytes`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Parse a 64-character lowercase hex digest.
    ///
    /// Returns `None` for any other length, uppercase hex, or non-hex input.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == 64
            && s
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(s.to_string()))
    }

    /// The hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first `n` hex characters (used for short, human-readable ids).
    #[must_use]
    pub fn prefix(&self, n: usize) -> &str {
        &self.0[..n.min(self.0.len())]
    }
}

impl std::fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digest and length of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    pub sha256: Sha256Digest,
    pub size_bytes: u64,
}

/// Error hashing a file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    /// The path does not resolve to a regular file.
    #[error("missing file: {path}")]
    MissingFile { path: String },
    /// The file exists but could not be read.
    #[error("unreadable file {path}: {detail}")]
    Unreadable { path: String, detail: String },
}

/// Compute the SHA-256 digest of a byte slice.
#[must_use]
pub fn hash_bytes(data: &[u8]) -> Sha256Digest {
    Sha256Digest(hex::encode(Sha256::digest(data)))
}

/// Hash a file by streaming its contents.
///
/// # Errors
///
/// Returns [`HashError::MissingFile`] if `path` is absent or not a regular
/// file, [`HashError::Unreadable`] on any read failure.
pub fn hash_file(path: &Path) -> Result<FileDigest, HashError> {
    let display = path.display().to_string();
    if !path.is_file() {
        return Err(HashError::MissingFile { path: display });
    }
    let mut file = File::open(path).map_err(|e| HashError::Unreadable {
        path: display.clone(),
        detail: e.to_string(),
    })?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    let mut size_bytes = 0u64;
    loop {
        let n = file.read(&mut buf).map_err(|e| HashError::Unreadable {
            path: display.clone(),
            detail: e.to_string(),
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size_bytes += n as u64;
    }

    Ok(FileDigest {
        sha256: Sha256Digest(hex::encode(hasher.finalize())),
        size_bytes,
    })
}

/// Hash many files on scoped worker threads.
///
/// There is no ordering dependency between two files, so the work is split
/// across up to [`MAX_HASH_WORKERS`] threads. All workers are joined before
/// this returns; results come back in input order.
#[must_use]
pub fn hash_files(paths: &[PathBuf]) -> Vec<Result<FileDigest, HashError>> {
    if paths.len() < 2 {
        return paths.iter().map(|p| hash_file(p)).collect();
    }
    let workers = std::thread::available_parallelism()
        .map_or(1, std::num::NonZeroUsize::get)
        .clamp(1, MAX_HASH_WORKERS)
        .min(paths.len());
    let chunk = paths.len().div_ceil(workers);

    std::thread::scope(|scope| {
        let handles: Vec<_> = paths
            .chunks(chunk)
            .map(|group| scope.spawn(move || group.iter().map(|p| hash_file(p)).collect::<Vec<_>>()))
            .collect();

        let mut results = Vec::with_capacity(paths.len());
        for (handle, group) in handles.into_iter().zip(paths.chunks(chunk)) {
            match handle.join() {
                Ok(group_results) => results.extend(group_results),
                Err(_) => results.extend(group.iter().map(|p| {
                    Err(HashError::Unreadable {
                        path: p.display().to_string(),
                        detail: "hash worker panicked".into(),
                    })
                })),
            }
        }
        results
    })
}

//! The flat `hashes.sha256` list.
//!
//! # Format
//!
//! ```text
//! <64 lowercase hex><two spaces><relative path>\n
//! ```
//!
//! Entries are sorted by path (byte order), every line ends in `\n`, there is
//! no `\r` anywhere and no blank line after the last entry. The format is
//! what `sha256sum` prints, so `sha256sum -c hashes.sha256` works from the
//! bundle root.
//!
//! The parser is the strict inverse of the renderer: anything the renderer
//! could not have produced is rejected with the offending line number.

use std::collections::BTreeMap;

use super::hash::Sha256Digest;
use super::path::{PathError, RelPath};

/// One `hashes.sha256` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashListEntry {
    pub path: RelPath,
    pub sha256: Sha256Digest,
}

/// Error rendering a hash list.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashListBuildError {
    /// Two entries share a path.
    #[error("duplicate hash list path: {path}")]
    DuplicatePath { path: String },
}

/// Error parsing a hash list.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashListParseError {
    /// The text is not LF-terminated, or contains `\r`.
    #[error("hash list line endings: {detail}")]
    LineEnding { detail: String },
    /// A line does not match `<hex>  <path>`.
    #[error("hash list line {line}: {detail}")]
    Malformed { line: usize, detail: String },
    /// A path fails bundle-relative validation.
    #[error("hash list line {line}: {source}")]
    UnsafePath { line: usize, source: PathError },
    /// Entries are not in ascending byte order or repeat a path.
    #[error("hash list line {line}: {path} is out of order or duplicated")]
    Order { line: usize, path: String },
}

/// Render entries as `hashes.sha256` text.
///
/// # Errors
///
/// Returns [`HashListBuildError::DuplicatePath`] if two entries share a path.
pub fn build_hash_list(entries: &[HashListEntry]) -> Result<String, HashListBuildError> {
    let mut sorted: BTreeMap<&str, &Sha256Digest> = BTreeMap::new();
    for entry in entries {
        if sorted.insert(entry.path.as_str(), &entry.sha256).is_some() {
            return Err(HashListBuildError::DuplicatePath {
                path: entry.path.as_str().to_string(),
            });
        }
    }

    let mut out = String::new();
    for (path, digest) in sorted {
        out.push_str(digest.as_str());
        out.push_str("  ");
        out.push_str(path);
        out.push('\n');
    }
    Ok(out)
}

/// Parse `hashes.sha256` text.
///
/// An empty list is valid here; whether a bundle may have zero entries is the
/// caller's decision.
///
/// # Errors
///
/// Returns [`HashListParseError`] naming the first offending line.
pub fn parse_hash_list(text: &str) -> Result<Vec<HashListEntry>, HashListParseError> {
    if text.contains('\r') {
        return Err(HashListParseError::LineEnding {
            detail: "carriage return present".into(),
        });
    }
    if text.is_empty() {
        return Ok(Vec::new());
    }
    let Some(body) = text.strip_suffix('\n') else {
        return Err(HashListParseError::LineEnding {
            detail: "missing final newline".into(),
        });
    };

    let mut entries: Vec<HashListEntry> = Vec::new();
    for (index, line) in body.split('\n').enumerate() {
        let line_no = index + 1;
        if line.is_empty() {
            return Err(HashListParseError::Malformed {
                line: line_no,
                detail: "blank line".into(),
            });
        }
        let (hex, path) = line.split_at_checked(64).ok_or_else(|| {
            HashListParseError::Malformed {
                line: line_no,
                detail: "line shorter than a digest".into(),
            }
        })?;
        let sha256 = Sha256Digest::parse(hex).ok_or_else(|| HashListParseError::Malformed {
            line: line_no,
            detail: "digest is not 64 lowercase hex characters".into(),
        })?;
        let path = path
            .strip_prefix("  ")
            .ok_or_else(|| HashListParseError::Malformed {
                line: line_no,
                detail: "digest and path must be separated by two spaces".into(),
            })?;
        let path = RelPath::parse(path).map_err(|source| HashListParseError::UnsafePath {
            line: line_no,
            source,
        })?;

        if let Some(prev) = entries.last() {
            if prev.path.as_str().as_bytes() >= path.as_str().as_bytes() {
                return Err(HashListParseError::Order {
                    line: line_no,
                    path: path.as_str().to_string(),
                });
            }
        }
        entries.push(HashListEntry { path, sha256 });
    }
    Ok(entries)
}

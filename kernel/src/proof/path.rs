//! Bundle-relative paths.
//!
//! Every path that appears in a manifest or hash list is a [`RelPath`]:
//! forward-slash separated, relative, and free of `..`, `.`, empty segments,
//! backslashes and NUL. A `RelPath` can still point outside the bundle via a
//! symlink on disk, so [`resolve_within`] re-checks containment after the
//! filesystem has had its say.

use std::path::{Component, Path, PathBuf};

/// Error validating or resolving a bundle-relative path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// The path is empty.
    #[error("empty path")]
    Empty,
    /// The path is absolute, or starts with a drive or root prefix.
    #[error("absolute path not allowed: {path}")]
    Absolute { path: String },
    /// The path contains a `..` segment or otherwise normalizes outside the root.
    #[error("path escapes bundle root: {path}")]
    Escape { path: String },
    /// The path contains a forbidden segment or character.
    #[error("invalid path {path}: {detail}")]
    Invalid { path: String, detail: String },
    /// The path does not resolve on disk.
    #[error("missing file: {path}")]
    Missing { path: String },
}

/// A validated bundle-relative path (`inputs/parameters.json`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelPath(String);

impl RelPath {
    /// Validate a bundle-relative path.
    ///
    /// # Errors
    ///
    /// Returns [`PathError`] describing the first rule the path breaks.
    pub fn parse(s: &str) -> Result<Self, PathError> {
        if s.is_empty() {
            return Err(PathError::Empty);
        }
        if s.starts_with('/') || Path::new(s).is_absolute() {
            return Err(PathError::Absolute { path: s.into() });
        }
        if s.contains('\\') {
            return Err(PathError::Invalid {
                path: s.into(),
                detail: "backslash separator".into(),
            });
        }
        if s.contains('\0') {
            return Err(PathError::Invalid {
                path: s.into(),
                detail: "NUL byte".into(),
            });
        }
        for segment in s.split('/') {
            match segment {
                ".." => return Err(PathError::Escape { path: s.into() }),
                "" | "." => {
                    return Err(PathError::Invalid {
                        path: s.into(),
                        detail: format!("segment {segment:?} not allowed"),
                    })
                }
                _ => {}
            }
        }
        Ok(Self(s.to_string()))
    }

    /// The path as written in manifests.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first segment (`inputs` for `inputs/parameters.json`).
    #[must_use]
    pub fn top_dir(&self) -> Option<&str> {
        self.0.split_once('/').map(|(head, _)| head)
    }

    /// Join onto a root directory.
    #[must_use]
    pub fn to_path(&self, root: &Path) -> PathBuf {
        let mut out = root.to_path_buf();
        for segment in self.0.split('/') {
            out.push(segment);
        }
        out
    }
}

impl std::fmt::Display for RelPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolve `rel` under `root`, following symlinks, and confirm containment.
///
/// # Errors
///
/// Returns [`PathError::Missing`] if the target does not exist and
/// [`PathError::Escape`] if the resolved target lies outside `root`.
pub fn resolve_within(root: &Path, rel: &RelPath) -> Result<PathBuf, PathError> {
    let canonical_root = root.canonicalize().map_err(|_| PathError::Missing {
        path: root.display().to_string(),
    })?;
    let target = rel.to_path(root);
    let resolved = target.canonicalize().map_err(|_| PathError::Missing {
        path: rel.as_str().to_string(),
    })?;
    if resolved.starts_with(&canonical_root) {
        Ok(resolved)
    } else {
        Err(PathError::Escape {
            path: rel.as_str().to_string(),
        })
    }
}

/// Render a path found under `root` as a `RelPath` (used when walking a bundle).
///
/// Returns `None` for paths outside `root` or with non-UTF-8 components.
#[must_use]
pub fn relative_to(root: &Path, path: &Path) -> Option<RelPath> {
    let stripped = path.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in stripped.components() {
        match component {
            Component::Normal(part) => segments.push(part.to_str()?),
            _ => return None,
        }
    }
    RelPath::parse(&segments.join("/")).ok()
}

//! Where bundles live on disk.
//!
//! Layout: `<evidence_root>/<YYYY-MM-DD>/<bundle_id>/`. The root is an
//! explicit value; the library never reads the environment. Binaries resolve
//! the root from [`EVIDENCE_ROOT_ENV`] (or a flag) and pass it in.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;

/// Environment variable binaries consult for the evidence root.
pub const EVIDENCE_ROOT_ENV: &str = "EUDR_DMI_EVIDENCE_ROOT";

/// Evidence root relative to the repository root when nothing overrides it.
pub const DEFAULT_EVIDENCE_ROOT: &str = "audit/evidence";

/// Root directory under which dated bundle directories are created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceRoot(PathBuf);

impl EvidenceRoot {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Pick the override if given, else `<repo_root>/audit/evidence`.
    ///
    /// A relative override is taken relative to `repo_root`.
    #[must_use]
    pub fn resolve(override_path: Option<&Path>, repo_root: &Path) -> Self {
        match override_path {
            Some(p) if p.is_absolute() => Self(p.to_path_buf()),
            Some(p) => Self(repo_root.join(p)),
            None => Self(repo_root.join(DEFAULT_EVIDENCE_ROOT)),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0
    }

    /// `<root>/<date>`.
    #[must_use]
    pub fn date_dir(&self, date: NaiveDate) -> PathBuf {
        self.0.join(date.format("%Y-%m-%d").to_string())
    }

    /// `<root>/<date>/<bundle_id>`.
    #[must_use]
    pub fn bundle_dir(&self, date: NaiveDate, bundle_id: &str) -> PathBuf {
        self.date_dir(date).join(bundle_id)
    }
}

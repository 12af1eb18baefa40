//! Bundle directory persistence: write a finalized [`Bundle`] to disk.
//!
//! # Directory layout
//!
//! ```text
//! <evidence_root>/<YYYY-MM-DD>/<bundle_id>/
//!   manifest.json          pretty canonical JSON, full artifact listing
//!   hashes.sha256          sha256sum-format list of every artifact
//!   inputs/                parameters.json, geometry.<ext>, other inputs
//!   outputs/               summary.json, derived outputs
//!   provenance/            provenance.json
//!   logs/                  run.log
//!   method/                method_version.json, decisions_applied.json
//!   attachments/           only when the bundle has attachments
//! ```
//!
//! # Write protocol
//!
//! 1. Refuse if the target exists and is not an empty directory.
//! 2. Stage everything in a hidden `.<bundle_id>.<pid>.partial` sibling.
//! 3. Copy or write each artifact, then re-hash every staged file and
//!    compare against the recorded digests.
//! 4. Write `manifest.json`, then `hashes.sha256` last.
//! 5. Rename the staging directory onto the target.
//!
//! Any failure removes the staging directory, so no partial bundle is ever
//! visible at the target path. A directory without `hashes.sha256` was never
//! finalized.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use evidence_kernel::proof::canon::CanonError;
use evidence_kernel::proof::hash::{hash_files, HashError};
use evidence_kernel::proof::hash_list::HashListBuildError;
use evidence_kernel::proof::path::relative_to;

use crate::bundle::{ArtifactSource, Bundle, HASH_LIST_PATH, MANIFEST_PATH};
use crate::config::EvidenceRoot;
use crate::contract::ArtifactRole;
use crate::manifest::{build_bundle_hash_list, build_manifest};

/// Role directories created in every bundle. `attachments/` is created on demand.
pub const REQUIRED_DIRS: &[&str] = &["inputs", "outputs", "provenance", "logs", "method"];

/// Suffix of in-progress staging directories.
pub const STAGING_SUFFIX: &str = ".partial";

/// Error writing a bundle directory.
#[derive(Debug, thiserror::Error)]
pub enum BundleWriteError {
    /// The target directory already holds something.
    #[error("bundle directory already exists: {}", path.display())]
    AlreadyExists { path: PathBuf },
    #[error("I/O error: {detail}")]
    Io { detail: String },
    #[error(transparent)]
    Canon(#[from] CanonError),
    #[error(transparent)]
    HashList(#[from] HashListBuildError),
    #[error(transparent)]
    Hash(#[from] HashError),
    /// A staged file does not hash to the digest recorded for it.
    #[error("staged {path} hashes to {actual}, manifest records {expected}")]
    StagedHashMismatch {
        path: String,
        expected: String,
        actual: String,
    },
}

fn io_err(what: &str, path: &Path, e: &std::io::Error) -> BundleWriteError {
    BundleWriteError::Io {
        detail: format!("{what} {}: {e}", path.display()),
    }
}

/// Where a bundle was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlePath {
    pub date: NaiveDate,
    pub bundle_id: String,
    pub dir: PathBuf,
}

/// Removes the staging directory unless the write committed.
struct StagingGuard {
    path: PathBuf,
    committed: bool,
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "staging cleanup failed");
            }
        }
    }
}

/// Writes finalized bundles under an evidence root.
#[derive(Debug, Clone)]
pub struct BundleWriter {
    root: EvidenceRoot,
}

impl BundleWriter {
    #[must_use]
    pub fn new(root: EvidenceRoot) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &EvidenceRoot {
        &self.root
    }

    /// Persist `bundle` at `<root>/<run date>/<bundle_id>/`.
    ///
    /// # Errors
    ///
    /// - [`BundleWriteError::AlreadyExists`] if the target is non-empty.
    /// - [`BundleWriteError::StagedHashMismatch`] if a copied file changed.
    /// - [`BundleWriteError::Io`] for filesystem failures.
    ///
    /// On error nothing is left at the target path.
    pub fn write(&self, bundle: &Bundle) -> Result<BundlePath, BundleWriteError> {
        let date = bundle.run_date();
        let date_dir = self.root.date_dir(date);
        let target = self.root.bundle_dir(date, bundle.bundle_id());

        if target.exists() {
            let empty_dir = target.is_dir()
                && std::fs::read_dir(&target)
                    .map_err(|e| io_err("read", &target, &e))?
                    .next()
                    .is_none();
            if !empty_dir {
                return Err(BundleWriteError::AlreadyExists { path: target });
            }
            std::fs::remove_dir(&target).map_err(|e| io_err("remove", &target, &e))?;
        }
        std::fs::create_dir_all(&date_dir).map_err(|e| io_err("create", &date_dir, &e))?;

        let staging = date_dir.join(format!(
            ".{}.{}{STAGING_SUFFIX}",
            bundle.bundle_id(),
            std::process::id()
        ));
        if staging.exists() {
            std::fs::remove_dir_all(&staging).map_err(|e| io_err("remove", &staging, &e))?;
        }
        std::fs::create_dir(&staging).map_err(|e| io_err("create", &staging, &e))?;
        let mut guard = StagingGuard {
            path: staging.clone(),
            committed: false,
        };

        stage_bundle(bundle, &staging)?;

        std::fs::rename(&staging, &target).map_err(|e| {
            if target.exists() {
                BundleWriteError::AlreadyExists {
                    path: target.clone(),
                }
            } else {
                io_err("rename", &staging, &e)
            }
        })?;
        guard.committed = true;

        tracing::info!(
            bundle_id = bundle.bundle_id(),
            dir = %target.display(),
            artifacts = bundle.artifacts().len(),
            "bundle written"
        );
        Ok(BundlePath {
            date,
            bundle_id: bundle.bundle_id().to_string(),
            dir: target,
        })
    }
}

fn stage_bundle(bundle: &Bundle, staging: &Path) -> Result<(), BundleWriteError> {
    for dir in REQUIRED_DIRS {
        let path = staging.join(dir);
        std::fs::create_dir(&path).map_err(|e| io_err("create", &path, &e))?;
    }
    if bundle
        .artifacts()
        .iter()
        .any(|a| a.entry.role == ArtifactRole::Attachment)
    {
        let path = staging.join(ArtifactRole::Attachment.dir());
        std::fs::create_dir(&path).map_err(|e| io_err("create", &path, &e))?;
    }

    let mut staged = Vec::with_capacity(bundle.artifacts().len());
    for artifact in bundle.artifacts() {
        let dest = artifact.entry.path.to_path(staging);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err("create", parent, &e))?;
        }
        match &artifact.source {
            ArtifactSource::File(src) => {
                std::fs::copy(src, &dest).map_err(|e| io_err("copy", src, &e))?;
            }
            ArtifactSource::Bytes(bytes) => {
                std::fs::write(&dest, bytes).map_err(|e| io_err("write", &dest, &e))?;
            }
        }
        staged.push(dest);
    }

    // Files are independent, so the re-hash runs in parallel; all workers
    // are joined before the manifest is written.
    for (artifact, result) in bundle.artifacts().iter().zip(hash_files(&staged)) {
        let digest = result?;
        if digest.sha256 != artifact.entry.sha256 || digest.size_bytes != artifact.entry.size_bytes
        {
            return Err(BundleWriteError::StagedHashMismatch {
                path: artifact.entry.path.to_string(),
                expected: artifact.entry.sha256.to_string(),
                actual: digest.sha256.to_string(),
            });
        }
    }

    let manifest = build_manifest(bundle)?;
    let manifest_path = staging.join(MANIFEST_PATH);
    std::fs::write(&manifest_path, &manifest.bytes)
        .map_err(|e| io_err("write", &manifest_path, &e))?;

    let hash_list = build_bundle_hash_list(bundle)?;
    let hash_list_path = staging.join(HASH_LIST_PATH);
    std::fs::write(&hash_list_path, hash_list.as_bytes())
        .map_err(|e| io_err("write", &hash_list_path, &e))?;
    Ok(())
}

/// Every non-directory entry under `dir`, as `/`-separated relative paths.
///
/// Symlinks are listed, not followed. Names that are not valid bundle paths
/// are returned lossily so callers can still report them.
///
/// # Errors
///
/// Returns the first I/O error from walking the tree.
pub fn list_bundle_files(dir: &Path) -> std::io::Result<BTreeSet<String>> {
    let mut files = BTreeSet::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                pending.push(path);
                continue;
            }
            let name = relative_to(dir, &path).map_or_else(
                || {
                    path.strip_prefix(dir)
                        .unwrap_or(&path)
                        .to_string_lossy()
                        .into_owned()
                },
                |rel| rel.as_str().to_string(),
            );
            files.insert(name);
        }
    }
    Ok(files)
}

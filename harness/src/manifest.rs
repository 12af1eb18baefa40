//! `manifest.json`: the bundle's self-description.
//!
//! The manifest lists every artifact with its digest, size, content type and
//! role, plus the inputs, dependencies, outcome and decision refs. It is
//! rendered in pretty canonical form and is deliberately absent from
//! `hashes.sha256` (the hash list covers artifacts only).
//!
//! `created_utc` is the only manifest field allowed to differ between two
//! runs with identical inputs.

use evidence_kernel::proof::canon::{canonical_json_pretty_with, CanonError};
use evidence_kernel::proof::hash_list::{build_hash_list, HashListBuildError, HashListEntry};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::bundle::{Bundle, HASH_LIST_PATH};
use crate::contract::{format_utc, ArtifactRole, DependencyRecord};
use crate::policy::SCHEMA_VERSION;

/// Top-level fields every manifest carries.
pub const REQUIRED_FIELDS: &[&str] = &[
    "artifacts",
    "bundle_id",
    "created_utc",
    "dependencies",
    "inputs",
    "outcome",
    "producer",
    "schema_version",
];

/// The one manifest field excluded from rerun equivalence.
pub const VOLATILE_FIELD: &str = "created_utc";

/// Rendered manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDocument {
    pub value: Value,
    /// Pretty canonical bytes, as written to disk.
    pub bytes: Vec<u8>,
}

/// Artifact row read back from a manifest on disk.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManifestArtifact {
    pub path: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub content_type: String,
    pub role: ArtifactRole,
}

/// Build the manifest for a finalized bundle.
///
/// # Errors
///
/// Returns [`CanonError`] if canonical rendering fails.
pub fn build_manifest(bundle: &Bundle) -> Result<ManifestDocument, CanonError> {
    let value = json!({
        "artifacts": bundle
            .artifacts()
            .iter()
            .map(|a| a.entry.to_json())
            .collect::<Vec<_>>(),
        "bundle_id": bundle.bundle_id(),
        "created_utc": format_utc(&bundle.created_utc()),
        "decisions": bundle
            .decisions()
            .iter()
            .map(|d| d.decision_id.as_str())
            .collect::<Vec<_>>(),
        "dependencies": bundle
            .dependencies()
            .iter()
            .map(DependencyRecord::to_json)
            .collect::<Vec<_>>(),
        "hash_list": {
            "algorithm": "sha256",
            "includes_manifest": false,
            "path": HASH_LIST_PATH,
        },
        "inputs": bundle.inputs(),
        "outcome": bundle.outcome().to_json(),
        "producer": bundle.producer().to_json(),
        "schema_version": SCHEMA_VERSION,
    });
    let bytes = canonical_json_pretty_with(&value, bundle.canonical_options())?;
    Ok(ManifestDocument { value, bytes })
}

/// Render `hashes.sha256` from the bundle's recorded digests.
///
/// # Errors
///
/// Returns [`HashListBuildError`] on a duplicate path (a builder bug).
pub fn build_bundle_hash_list(bundle: &Bundle) -> Result<String, HashListBuildError> {
    let entries: Vec<HashListEntry> = bundle
        .artifacts()
        .iter()
        .map(|a| HashListEntry {
            path: a.entry.path.clone(),
            sha256: a.entry.sha256.clone(),
        })
        .collect();
    build_hash_list(&entries)
}

/// Read the `artifacts` array of a parsed manifest.
///
/// # Errors
///
/// Returns a description of the first malformed row.
pub fn manifest_artifacts(manifest: &Value) -> Result<Vec<ManifestArtifact>, String> {
    let rows = manifest
        .get("artifacts")
        .ok_or_else(|| "artifacts missing".to_string())?;
    serde_json::from_value(rows.clone()).map_err(|e| format!("artifacts malformed: {e}"))
}

//! Independent verification of a bundle directory.
//!
//! The verifier trusts nothing but the bytes on disk. It never returns an
//! error and never panics: every problem, including a missing or garbage
//! bundle, becomes a failed check with details in the report.
//!
//! # Checks
//!
//! | check | passes when |
//! |-------|-------------|
//! | `layout` | required directories and files exist, geometry input present |
//! | `manifest_parse` | manifest parses, carries every required field, is canonical |
//! | `hash_recomputation` | every digest recomputes, both lists agree, nothing undeclared |
//! | `path_safety` | no path is absolute, traverses upward, or resolves outside |
//! | `provenance_completeness` | every dependency record is complete |
//! | `outcome_traceability` | outcome reasons and references resolve inside the bundle |
//! | `rerun_equivalence` | (with a baseline) only `created_utc` differs |
//!
//! Rerun equivalence is advisory unless required: it is reported, but only
//! fails the verdict when the caller asked for it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use evidence_kernel::proof::canon::{canonical_json_bytes, is_canonical_pretty};
use evidence_kernel::proof::hash::{hash_files, FileDigest, HashError, Sha256Digest};
use evidence_kernel::proof::hash_list::{parse_hash_list, HashListEntry, HashListParseError};
use evidence_kernel::proof::path::{resolve_within, PathError, RelPath};
use serde_json::{json, Value};

use crate::bundle::{
    DECISIONS_PATH, GENERATED_PATHS, GEOMETRY_INPUT, HASH_LIST_PATH, MANIFEST_PATH,
    PROVENANCE_PATH, SUMMARY_PATH,
};
use crate::bundle_dir::{list_bundle_files, REQUIRED_DIRS};
use crate::config::EvidenceRoot;
use crate::contract::{
    parse_utc, ArtifactRole, DecisionRecord, DependencyRecord, DependencyRole, Outcome,
};
use crate::manifest::{manifest_artifacts, ManifestArtifact, REQUIRED_FIELDS, VOLATILE_FIELD};
use crate::outcome::traceability_violations;
use crate::policy::SCHEMA_VERSION;

pub const CHECK_LAYOUT: &str = "layout";
pub const CHECK_MANIFEST_PARSE: &str = "manifest_parse";
pub const CHECK_HASH_RECOMPUTATION: &str = "hash_recomputation";
pub const CHECK_PATH_SAFETY: &str = "path_safety";
pub const CHECK_PROVENANCE: &str = "provenance_completeness";
pub const CHECK_TRACEABILITY: &str = "outcome_traceability";
pub const CHECK_RERUN: &str = "rerun_equivalence";

/// Outcome of one named check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    /// Advisory checks are reported but do not affect the verdict.
    pub advisory: bool,
    pub details: Vec<String>,
}

impl CheckResult {
    fn from_details(name: &'static str, details: Vec<String>) -> Self {
        Self {
            name,
            passed: details.is_empty(),
            advisory: false,
            details,
        }
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "advisory": self.advisory,
            "details": self.details,
            "name": self.name,
            "passed": self.passed,
        })
    }
}

/// Whether the bundle finished writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleState {
    Finalized,
    /// `hashes.sha256` is absent: the writer never got to the last step.
    Incomplete,
}

/// Full verification result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub bundle_dir: PathBuf,
    pub state: BundleState,
    pub checks: Vec<CheckResult>,
}

impl VerificationReport {
    /// True when every non-advisory check passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.checks.iter().filter(|c| !c.advisory).all(|c| c.passed)
    }

    #[must_use]
    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }

    /// Checks that failed and count toward the verdict.
    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed && !c.advisory)
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "bundle_dir": self.bundle_dir.display().to_string(),
            "checks": self.checks.iter().map(CheckResult::to_json).collect::<Vec<_>>(),
            "passed": self.passed(),
            "state": match self.state {
                BundleState::Finalized => "finalized",
                BundleState::Incomplete => "incomplete",
            },
        })
    }
}

impl std::fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "bundle {}", self.bundle_dir.display())?;
        for check in &self.checks {
            let mark = match (check.passed, check.advisory) {
                (true, _) => "ok",
                (false, true) => "warn",
                (false, false) => "FAIL",
            };
            writeln!(f, "  {mark:<4} {}", check.name)?;
            for detail in &check.details {
                writeln!(f, "         {detail}")?;
            }
        }
        let verdict = if self.passed() { "PASSED" } else { "FAILED" };
        write!(f, "verification {verdict}")
    }
}

/// Verifier configuration.
#[derive(Debug, Clone, Default)]
pub struct BundleVerifier {
    baseline: Option<PathBuf>,
    require_rerun: bool,
}

impl BundleVerifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare against a prior run of the same inputs.
    #[must_use]
    pub fn with_baseline(mut self, dir: impl Into<PathBuf>) -> Self {
        self.baseline = Some(dir.into());
        self
    }

    /// Make rerun equivalence count toward the verdict.
    #[must_use]
    pub fn require_rerun_equivalence(mut self, required: bool) -> Self {
        self.require_rerun = required;
        self
    }

    /// Verify the bundle `<root>/<date>/<bundle_id>/`.
    #[must_use]
    pub fn verify_at(
        &self,
        root: &EvidenceRoot,
        date: NaiveDate,
        bundle_id: &str,
    ) -> VerificationReport {
        self.verify(&root.bundle_dir(date, bundle_id))
    }

    /// Verify the bundle at `dir`.
    #[must_use]
    pub fn verify(&self, dir: &Path) -> VerificationReport {
        let loaded = Loaded::load(dir);
        let mut checks = vec![
            check_layout(&loaded),
            check_manifest(&loaded),
            check_hashes(&loaded),
            check_path_safety(&loaded),
            check_provenance(&loaded),
            check_traceability(&loaded),
        ];
        match (&self.baseline, self.require_rerun) {
            (Some(baseline), required) => {
                let mut check = rerun_equivalence(dir, baseline);
                check.advisory = !required;
                checks.push(check);
            }
            (None, true) => checks.push(CheckResult::from_details(
                CHECK_RERUN,
                vec!["rerun equivalence required but no baseline bundle supplied".into()],
            )),
            (None, false) => {}
        }

        let report = VerificationReport {
            bundle_dir: dir.to_path_buf(),
            state: if loaded.hash_list_present {
                BundleState::Finalized
            } else {
                BundleState::Incomplete
            },
            checks,
        };
        for check in report.failures() {
            tracing::warn!(
                dir = %dir.display(),
                check = check.name,
                details = check.details.len(),
                "verification check failed"
            );
        }
        tracing::info!(dir = %dir.display(), passed = report.passed(), "bundle verified");
        report
    }
}

/// Verify `dir` with default options.
#[must_use]
pub fn verify_bundle_dir(dir: &Path) -> VerificationReport {
    BundleVerifier::new().verify(dir)
}

/// Everything read from disk once, shared by the checks.
struct Loaded {
    dir: PathBuf,
    is_dir: bool,
    files: Result<BTreeSet<String>, String>,
    manifest_bytes: Option<Vec<u8>>,
    manifest: Result<Value, String>,
    hash_list_present: bool,
    hash_list: Result<Vec<HashListEntry>, HashListReadError>,
}

enum HashListReadError {
    Missing,
    Unreadable(String),
    Parse(HashListParseError),
}

impl std::fmt::Display for HashListReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => f.write_str("hashes.sha256 absent: bundle was not finalized"),
            Self::Unreadable(e) => write!(f, "hashes.sha256 unreadable: {e}"),
            Self::Parse(e) => write!(f, "hashes.sha256 malformed: {e}"),
        }
    }
}

impl Loaded {
    fn load(dir: &Path) -> Self {
        let is_dir = dir.is_dir();
        let files = if is_dir {
            list_bundle_files(dir).map_err(|e| format!("cannot list bundle files: {e}"))
        } else {
            Err(format!("bundle directory missing: {}", dir.display()))
        };

        let manifest_path = dir.join(MANIFEST_PATH);
        let manifest_bytes = std::fs::read(&manifest_path).ok();
        let manifest = match &manifest_bytes {
            None => Err("manifest.json missing or unreadable".to_string()),
            Some(bytes) => serde_json::from_slice::<Value>(bytes)
                .map_err(|e| format!("manifest.json is not valid JSON: {e}")),
        };

        let hash_list_path = dir.join(HASH_LIST_PATH);
        let hash_list_present = hash_list_path.is_file();
        let hash_list = if hash_list_present {
            match std::fs::read_to_string(&hash_list_path) {
                Ok(text) => parse_hash_list(&text).map_err(HashListReadError::Parse),
                Err(e) => Err(HashListReadError::Unreadable(e.to_string())),
            }
        } else {
            Err(HashListReadError::Missing)
        };

        Self {
            dir: dir.to_path_buf(),
            is_dir,
            files,
            manifest_bytes,
            manifest,
            hash_list_present,
            hash_list,
        }
    }

    fn artifacts(&self) -> Option<Vec<ManifestArtifact>> {
        self.manifest.as_ref().ok().and_then(|m| manifest_artifacts(m).ok())
    }

    fn read_json(&self, rel: &str) -> Result<Value, String> {
        let bytes = std::fs::read(self.dir.join(rel)).map_err(|e| format!("{rel}: {e}"))?;
        serde_json::from_slice(&bytes).map_err(|e| format!("{rel}: not valid JSON: {e}"))
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

// ---------------------------------------------------------------------------
// layout
// ---------------------------------------------------------------------------

fn check_layout(l: &Loaded) -> CheckResult {
    let mut details = Vec::new();
    if !l.is_dir {
        details.push(format!("bundle directory missing: {}", l.dir.display()));
        return CheckResult::from_details(CHECK_LAYOUT, details);
    }
    for dir in REQUIRED_DIRS {
        if !l.dir.join(dir).is_dir() {
            details.push(format!("missing directory {dir}/"));
        }
    }
    let attachments = l.dir.join(ArtifactRole::Attachment.dir());
    if attachments.exists() && !attachments.is_dir() {
        details.push("attachments is not a directory".into());
    }
    if !l.hash_list_present {
        details.push(HashListReadError::Missing.to_string());
    }
    for file in std::iter::once(&MANIFEST_PATH).chain(GENERATED_PATHS) {
        if !l.dir.join(file).is_file() {
            details.push(format!("missing file {file}"));
        }
    }

    match &l.files {
        Err(e) => details.push(e.clone()),
        Ok(files) => {
            let geometry = files.iter().any(|f| {
                f.strip_prefix("inputs/")
                    .is_some_and(|name| name == GEOMETRY_INPUT || name.starts_with("geometry."))
            });
            if !geometry {
                details.push("missing geometry input under inputs/".into());
            }
            let allowed_tops: BTreeSet<&str> =
                ArtifactRole::ALL.iter().map(|r| r.dir()).collect();
            for file in files {
                let top_level_index = file == MANIFEST_PATH || file == HASH_LIST_PATH;
                let in_role_dir = file
                    .split_once('/')
                    .is_some_and(|(top, _)| allowed_tops.contains(top));
                if !top_level_index && !in_role_dir {
                    details.push(format!("unexpected entry {file}"));
                }
            }
        }
    }
    CheckResult::from_details(CHECK_LAYOUT, details)
}

// ---------------------------------------------------------------------------
// manifest_parse
// ---------------------------------------------------------------------------

fn check_manifest(l: &Loaded) -> CheckResult {
    let mut details = Vec::new();
    let manifest = match &l.manifest {
        Ok(m) => m,
        Err(e) => return CheckResult::from_details(CHECK_MANIFEST_PARSE, vec![e.clone()]),
    };
    if !manifest.is_object() {
        return CheckResult::from_details(
            CHECK_MANIFEST_PARSE,
            vec!["manifest.json is not a JSON object".into()],
        );
    }

    for field in REQUIRED_FIELDS {
        match manifest.get(field) {
            None => details.push(format!("missing field {field}")),
            Some(v) if is_empty_value(v) => details.push(format!("empty field {field}")),
            Some(_) => {}
        }
    }
    if let Some(version) = manifest.get("schema_version").and_then(Value::as_str) {
        if version != SCHEMA_VERSION {
            details.push(format!(
                "schema_version {version:?}, expected {SCHEMA_VERSION:?}"
            ));
        }
    }
    if let Some(id) = manifest.get("bundle_id").and_then(Value::as_str) {
        let dir_name = l.dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if id != dir_name {
            details.push(format!("bundle_id {id:?} does not match directory {dir_name:?}"));
        }
    }
    if let Some(created) = manifest.get("created_utc").and_then(Value::as_str) {
        if parse_utc(created).is_err() {
            details.push(format!("created_utc {created:?} is not an RFC 3339 timestamp"));
        }
    }
    for field in ["name", "version"] {
        let present = manifest["producer"][field]
            .as_str()
            .is_some_and(|s| !s.trim().is_empty());
        if !present {
            details.push(format!("producer.{field} missing or empty"));
        }
    }
    if !matches!(
        manifest["outcome"]["status"].as_str(),
        Some("PASS" | "FAIL" | "UNDETERMINED")
    ) {
        details.push("outcome.status must be PASS, FAIL or UNDETERMINED".into());
    }

    match manifest_artifacts(manifest) {
        Err(e) => details.push(e),
        Ok(rows) => {
            let mut seen = BTreeSet::new();
            for row in &rows {
                if !seen.insert(row.path.as_str()) {
                    details.push(format!("{}: listed twice", row.path));
                }
                if Sha256Digest::parse(&row.sha256).is_none() {
                    details.push(format!("{}: sha256 is not 64 lowercase hex", row.path));
                }
                if row.path.split_once('/').map(|(top, _)| top) != Some(row.role.dir()) {
                    details.push(format!(
                        "{}: role {} belongs under {}/",
                        row.path,
                        row.role,
                        row.role.dir()
                    ));
                }
            }
        }
    }

    if let Some(bytes) = &l.manifest_bytes {
        if !is_canonical_pretty(bytes) {
            details.push("manifest.json is not in canonical form".into());
        }
    }
    CheckResult::from_details(CHECK_MANIFEST_PARSE, details)
}

// ---------------------------------------------------------------------------
// hash_recomputation
// ---------------------------------------------------------------------------

fn check_hashes(l: &Loaded) -> CheckResult {
    let mut details = Vec::new();
    if !l.is_dir {
        details.push(format!("bundle directory missing: {}", l.dir.display()));
        return CheckResult::from_details(CHECK_HASH_RECOMPUTATION, details);
    }

    let listed: Vec<HashListEntry> = match &l.hash_list {
        Ok(entries) => entries.clone(),
        Err(e) => {
            details.push(e.to_string());
            Vec::new()
        }
    };
    let declared: Vec<ManifestArtifact> = match &l.manifest {
        Ok(m) => manifest_artifacts(m).unwrap_or_else(|e| {
            details.push(e);
            Vec::new()
        }),
        Err(e) => {
            details.push(e.clone());
            Vec::new()
        }
    };

    let mut to_hash: BTreeSet<RelPath> = listed.iter().map(|e| e.path.clone()).collect();
    to_hash.extend(declared.iter().filter_map(|a| RelPath::parse(&a.path).ok()));
    let to_hash: Vec<RelPath> = to_hash.into_iter().collect();
    let disk_paths: Vec<PathBuf> = to_hash.iter().map(|p| p.to_path(&l.dir)).collect();
    let digests: BTreeMap<&str, Result<FileDigest, HashError>> = to_hash
        .iter()
        .map(RelPath::as_str)
        .zip(hash_files(&disk_paths))
        .collect();

    let describe = |path: &str, list: &str, err: &HashError| match err {
        HashError::MissingFile { .. } => format!("{path}: listed in {list} but missing"),
        HashError::Unreadable { detail, .. } => format!("{path}: unreadable: {detail}"),
    };

    for entry in &listed {
        match digests.get(entry.path.as_str()) {
            Some(Ok(d)) if d.sha256 != entry.sha256 => details.push(format!(
                "{}: hashes.sha256 records {}, file hashes to {}",
                entry.path, entry.sha256, d.sha256
            )),
            Some(Err(e)) => details.push(describe(entry.path.as_str(), HASH_LIST_PATH, e)),
            _ => {}
        }
    }
    for artifact in &declared {
        match digests.get(artifact.path.as_str()) {
            Some(Ok(d)) => {
                if d.sha256.as_str() != artifact.sha256 {
                    details.push(format!(
                        "{}: manifest records {}, file hashes to {}",
                        artifact.path, artifact.sha256, d.sha256
                    ));
                }
                if d.size_bytes != artifact.size_bytes {
                    details.push(format!(
                        "{}: manifest records {} bytes, file has {}",
                        artifact.path, artifact.size_bytes, d.size_bytes
                    ));
                }
            }
            Some(Err(e)) => details.push(describe(&artifact.path, MANIFEST_PATH, e)),
            None => {}
        }
    }

    if l.hash_list.is_ok() && l.manifest.is_ok() {
        let in_list: BTreeMap<&str, &str> = listed
            .iter()
            .map(|e| (e.path.as_str(), e.sha256.as_str()))
            .collect();
        let in_manifest: BTreeMap<&str, &str> = declared
            .iter()
            .map(|a| (a.path.as_str(), a.sha256.as_str()))
            .collect();
        for (path, sha) in &in_list {
            match in_manifest.get(path) {
                None => details.push(format!("{path}: in hashes.sha256 but not in manifest")),
                Some(m) if m != sha => details.push(format!(
                    "{path}: manifest and hashes.sha256 record different digests"
                )),
                Some(_) => {}
            }
        }
        for path in in_manifest.keys() {
            if !in_list.contains_key(path) {
                details.push(format!("{path}: in manifest but not in hashes.sha256"));
            }
        }
    }

    if let Ok(files) = &l.files {
        let known: BTreeSet<&str> = listed
            .iter()
            .map(|e| e.path.as_str())
            .chain(declared.iter().map(|a| a.path.as_str()))
            .chain([MANIFEST_PATH, HASH_LIST_PATH])
            .collect();
        for file in files {
            if !known.contains(file.as_str()) {
                details.push(format!("{file}: undeclared file"));
            }
        }
    }
    CheckResult::from_details(CHECK_HASH_RECOMPUTATION, details)
}

// ---------------------------------------------------------------------------
// path_safety
// ---------------------------------------------------------------------------

fn check_path_safety(l: &Loaded) -> CheckResult {
    let mut details = BTreeSet::new();
    if let Err(HashListReadError::Parse(HashListParseError::UnsafePath { line, source })) =
        &l.hash_list
    {
        details.insert(format!("hashes.sha256 line {line}: {source}"));
    }
    if !l.is_dir {
        return CheckResult::from_details(CHECK_PATH_SAFETY, details.into_iter().collect());
    }

    let mut candidates: BTreeSet<String> = BTreeSet::new();
    if let Some(rows) = l.artifacts() {
        candidates.extend(rows.into_iter().map(|a| a.path));
    }
    if let Ok(entries) = &l.hash_list {
        candidates.extend(entries.iter().map(|e| e.path.to_string()));
    }
    if let Ok(files) = &l.files {
        candidates.extend(files.iter().cloned());
    }

    for path in &candidates {
        match RelPath::parse(path) {
            Err(e) => {
                details.insert(format!("{path}: {e}"));
            }
            Ok(rel) => match resolve_within(&l.dir, &rel) {
                Err(PathError::Escape { .. }) => {
                    details.insert(format!("{path}: resolves outside the bundle"));
                }
                Err(_) | Ok(_) => {}
            },
        }
    }
    CheckResult::from_details(CHECK_PATH_SAFETY, details.into_iter().collect())
}

// ---------------------------------------------------------------------------
// provenance_completeness
// ---------------------------------------------------------------------------

fn check_provenance(l: &Loaded) -> CheckResult {
    let mut details = Vec::new();
    let manifest = match &l.manifest {
        Ok(m) => m,
        Err(e) => return CheckResult::from_details(CHECK_PROVENANCE, vec![e.clone()]),
    };
    let Some(rows) = manifest.get("dependencies").and_then(Value::as_array) else {
        return CheckResult::from_details(
            CHECK_PROVENANCE,
            vec!["manifest dependencies missing or not an array".into()],
        );
    };
    if rows.is_empty() {
        details.push("no dependency records".into());
    }

    let mut records = Vec::new();
    for (index, row) in rows.iter().enumerate() {
        match serde_json::from_value::<DependencyRecord>(row.clone()) {
            Ok(record) => records.push(record),
            Err(e) => details.push(format!("dependencies[{index}]: {e}")),
        }
    }
    let mut seen = BTreeSet::new();
    for record in &records {
        for (field, detail) in record.completeness_violations() {
            details.push(format!("dependency {}: {field}: {detail}", record.source_key()));
        }
        if !seen.insert((&record.catalogue_id, &record.version)) {
            details.push(format!("dependency {}: recorded twice", record.source_key()));
        }
        let shared = records
            .iter()
            .filter(|r| r.catalogue_id == record.catalogue_id)
            .count();
        if shared > 1 && record.role != DependencyRole::Provenance {
            details.push(format!(
                "dependency {}: cross-checked versions must have role provenance",
                record.source_key()
            ));
        }
    }

    match l.read_json(PROVENANCE_PATH) {
        Err(e) => details.push(e),
        Ok(doc) => {
            if doc.get("dependencies") != manifest.get("dependencies") {
                details.push(format!(
                    "{PROVENANCE_PATH} disagrees with manifest dependencies"
                ));
            }
        }
    }
    CheckResult::from_details(CHECK_PROVENANCE, details)
}

// ---------------------------------------------------------------------------
// outcome_traceability
// ---------------------------------------------------------------------------

fn check_traceability(l: &Loaded) -> CheckResult {
    let mut details = Vec::new();
    let manifest = match &l.manifest {
        Ok(m) => m,
        Err(e) => return CheckResult::from_details(CHECK_TRACEABILITY, vec![e.clone()]),
    };
    let outcome = match manifest.get("outcome").cloned().map(serde_json::from_value::<Outcome>) {
        Some(Ok(o)) => o,
        Some(Err(e)) => {
            return CheckResult::from_details(
                CHECK_TRACEABILITY,
                vec![format!("outcome malformed: {e}")],
            )
        }
        None => {
            return CheckResult::from_details(CHECK_TRACEABILITY, vec!["outcome missing".into()])
        }
    };

    let artifacts = l.artifacts().unwrap_or_default();
    let artifact_paths: BTreeSet<String> = artifacts.iter().map(|a| a.path.clone()).collect();
    let dependency_ids: BTreeSet<String> = manifest["dependencies"]
        .as_array()
        .map(|rows| {
            rows.iter()
                .filter_map(|r| r["catalogue_id"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let decisions: Vec<DecisionRecord> = match l.read_json(DECISIONS_PATH) {
        Err(e) => {
            details.push(e);
            Vec::new()
        }
        Ok(doc) => serde_json::from_value(doc["decisions"].clone()).unwrap_or_else(|e| {
            details.push(format!("{DECISIONS_PATH}: decisions malformed: {e}"));
            Vec::new()
        }),
    };
    let decision_ids: BTreeSet<String> =
        decisions.iter().map(|d| d.decision_id.clone()).collect();
    let manifest_decisions: BTreeSet<String> = manifest["decisions"]
        .as_array()
        .map(|ids| ids.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    if manifest_decisions != decision_ids {
        details.push(format!(
            "manifest decisions do not match {DECISIONS_PATH}"
        ));
    }

    details.extend(
        traceability_violations(&outcome, &artifact_paths, &dependency_ids, &decision_ids)
            .iter()
            .map(ToString::to_string),
    );

    match l.read_json(SUMMARY_PATH) {
        Err(e) => details.push(e),
        Ok(summary) => {
            if summary["status"].as_str() != Some(outcome.status.as_str()) {
                details.push(format!("{SUMMARY_PATH} status disagrees with manifest outcome"));
            }
        }
    }

    if let Some(inputs) = manifest["inputs"].as_object() {
        if !inputs.get(GEOMETRY_INPUT).is_some_and(|g| g.get("path").is_some()) {
            details.push("inputs.geometry is not a file-backed input".into());
        }
        for (name, value) in inputs {
            let (Some(path), Some(sha)) = (value["path"].as_str(), value["sha256"].as_str()) else {
                continue;
            };
            let matched = artifacts.iter().any(|a| a.path == path && a.sha256 == sha);
            if !matched {
                details.push(format!(
                    "inputs.{name}: {path} does not match a manifest artifact"
                ));
            }
        }
    }
    CheckResult::from_details(CHECK_TRACEABILITY, details)
}

// ---------------------------------------------------------------------------
// rerun_equivalence
// ---------------------------------------------------------------------------

/// Compare two bundle directories; only the manifest's `created_utc` may differ.
#[must_use]
pub fn rerun_equivalence(dir: &Path, baseline: &Path) -> CheckResult {
    let mut details = Vec::new();
    let (files, base_files) = match (list_bundle_files(dir), list_bundle_files(baseline)) {
        (Ok(a), Ok(b)) => (a, b),
        (Err(e), _) => {
            return CheckResult::from_details(CHECK_RERUN, vec![format!("cannot list bundle: {e}")])
        }
        (_, Err(e)) => {
            return CheckResult::from_details(
                CHECK_RERUN,
                vec![format!("cannot list baseline: {e}")],
            )
        }
    };

    for path in files.difference(&base_files) {
        details.push(format!("{path}: only in this bundle"));
    }
    for path in base_files.difference(&files) {
        details.push(format!("{path}: only in baseline"));
    }
    for path in files.intersection(&base_files) {
        let a = std::fs::read(dir.join(path));
        let b = std::fs::read(baseline.join(path));
        let same = match (a, b) {
            (Ok(a), Ok(b)) if path == MANIFEST_PATH => manifests_equivalent(&a, &b),
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if !same {
            let what = if path == MANIFEST_PATH {
                format!("differs outside {VOLATILE_FIELD}")
            } else {
                "content differs".to_string()
            };
            details.push(format!("{path}: {what}"));
        }
    }
    CheckResult::from_details(CHECK_RERUN, details)
}

fn manifests_equivalent(a: &[u8], b: &[u8]) -> bool {
    let strip = |bytes: &[u8]| -> Option<Vec<u8>> {
        let mut value: Value = serde_json::from_slice(bytes).ok()?;
        value.as_object_mut()?.remove(VOLATILE_FIELD);
        canonical_json_bytes(&value).ok()
    };
    matches!((strip(a), strip(b)), (Some(x), Some(y)) if x == y)
}

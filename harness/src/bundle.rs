//! In-memory evidence bundle: assembly, evaluation and finalization.
//!
//! No bundle directory is written here. [`BundleBuilder`] collects inputs,
//! dependencies, artifacts and control results; [`BundleBuilder::evaluate`]
//! computes the outcome; [`BundleBuilder::finalize`] checks every
//! completeness invariant and produces an immutable [`Bundle`] that
//! [`crate::bundle_dir::BundleWriter`] persists.
//!
//! # Generated documents
//!
//! Finalization renders six documents from builder state, so every bundle
//! carries them and callers cannot add them by hand:
//!
//! | path | content |
//! |------|---------|
//! | `inputs/parameters.json` | normalized run inputs |
//! | `outputs/summary.json` | outcome status, reasons, per-control status |
//! | `provenance/provenance.json` | dependency records |
//! | `logs/run.log` | deterministic builder log |
//! | `method/decisions_applied.json` | conflict-policy decisions |
//! | `method/method_version.json` | pinned method parameters |
//!
//! # Determinism
//!
//! Everything that reaches disk is rendered from sorted state: inputs by
//! name, dependencies by `(catalogue_id, version)`, artifacts by path,
//! controls by id. The order of builder calls does not change a byte, with
//! one exception: free-form lines passed to [`BundleBuilder::log`] keep the
//! order they were logged in.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use evidence_kernel::proof::canon::{
    canonical_json_bytes_with, canonical_json_pretty_with, float_value, insert_unique,
    CanonError, CanonicalOptions,
};
use evidence_kernel::proof::hash::{hash_bytes, hash_file, hash_files, HashError, Sha256Digest};
use evidence_kernel::proof::path::{PathError, RelPath};
use serde_json::{json, Map, Value};

use crate::contract::{
    format_utc, ArtifactRole, ControlResult, DecisionRecord, DependencyRecord, DependencyRole,
    Outcome, Producer, Status, Violation,
};
use crate::outcome::{
    evaluate, traceability_violations, Evaluation, EvaluationInput, EvidenceState,
    RequiredEvidence,
};
use crate::policy::{EvaluationPolicy, SCHEMA_VERSION};

pub const MANIFEST_PATH: &str = "manifest.json";
pub const HASH_LIST_PATH: &str = "hashes.sha256";
pub const PARAMETERS_PATH: &str = "inputs/parameters.json";
pub const SUMMARY_PATH: &str = "outputs/summary.json";
pub const PROVENANCE_PATH: &str = "provenance/provenance.json";
pub const RUN_LOG_PATH: &str = "logs/run.log";
pub const DECISIONS_PATH: &str = "method/decisions_applied.json";
pub const METHOD_VERSION_PATH: &str = "method/method_version.json";

/// Documents rendered by [`BundleBuilder::finalize`].
pub const GENERATED_PATHS: &[&str] = &[
    PARAMETERS_PATH,
    SUMMARY_PATH,
    PROVENANCE_PATH,
    RUN_LOG_PATH,
    DECISIONS_PATH,
    METHOD_VERSION_PATH,
];

/// Name of the mandatory file-backed input.
pub const GEOMETRY_INPUT: &str = "geometry";

/// Hex characters of the geometry digest used in derived bundle ids.
pub const BUNDLE_ID_DIGEST_CHARS: usize = 12;

const JSON_CONTENT_TYPE: &str = "application/json";
const LOG_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Where an artifact's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    /// A file the writer copies into the bundle.
    File(PathBuf),
    /// Bytes held in memory.
    Bytes(Vec<u8>),
}

/// Manifest entry for one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactEntry {
    pub path: RelPath,
    pub sha256: Sha256Digest,
    pub size_bytes: u64,
    pub content_type: String,
    pub role: ArtifactRole,
}

impl ArtifactEntry {
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "content_type": self.content_type,
            "path": self.path.as_str(),
            "role": self.role.as_str(),
            "sha256": self.sha256.as_str(),
            "size_bytes": self.size_bytes,
        })
    }
}

/// An artifact and the bytes behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleArtifact {
    pub entry: ArtifactEntry,
    pub source: ArtifactSource,
}

/// A run input value.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    /// A file copied to `inputs/<name>.<ext>` and recorded by digest.
    File { path: PathBuf, content_type: String },
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

/// Completeness invariants a bundle broke, all of them at once.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("bundle {bundle_id} is incomplete: {}", render_violations(.violations))]
pub struct IncompleteBundleError {
    pub bundle_id: String,
    pub violations: Vec<Violation>,
}

fn render_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error assembling a bundle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BundleError {
    #[error(transparent)]
    Canon(#[from] CanonError),
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error(transparent)]
    Path(#[from] PathError),
    /// The path belongs to a generated document or a bundle index.
    #[error("reserved bundle path: {path}")]
    ReservedPath { path: String },
    #[error("duplicate artifact path: {path}")]
    DuplicateArtifact { path: String },
    /// The path's top directory does not match the artifact role.
    #[error("artifact {path} with role {role} must live under {expected}/")]
    RoleDirectory {
        path: String,
        role: ArtifactRole,
        expected: &'static str,
    },
    #[error("invalid input name {name:?}: {detail}")]
    InvalidInputName { name: String, detail: String },
    #[error("dependency {catalogue_id}: {detail}")]
    DuplicateDependency { catalogue_id: String, detail: String },
    #[error("duplicate control result: {control_id}")]
    DuplicateControl { control_id: String },
    #[error("invalid bundle id {bundle_id:?}: {detail}")]
    InvalidBundleId { bundle_id: String, detail: String },
    #[error(transparent)]
    Incomplete(#[from] IncompleteBundleError),
}

/// Derive `<prefix>_<sha256(geometry)[..12]>_<from>_<to>`.
///
/// The id is a function of the run inputs, so a rerun lands on the same id.
///
/// # Errors
///
/// Returns [`BundleError::InvalidBundleId`] for an empty or unsafe prefix or
/// a reversed date range.
pub fn derive_bundle_id(
    prefix: &str,
    geometry: &Sha256Digest,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<String, BundleError> {
    if prefix.is_empty() {
        return Err(BundleError::InvalidBundleId {
            bundle_id: prefix.into(),
            detail: "empty prefix".into(),
        });
    }
    if from > to {
        return Err(BundleError::InvalidBundleId {
            bundle_id: prefix.into(),
            detail: format!("date range {from} > {to}"),
        });
    }
    let id = format!(
        "{prefix}_{}_{}_{}",
        geometry.prefix(BUNDLE_ID_DIGEST_CHARS),
        from.format("%Y-%m-%d"),
        to.format("%Y-%m-%d")
    );
    validate_bundle_id(&id)?;
    Ok(id)
}

/// A bundle id must be a single safe directory name.
///
/// # Errors
///
/// Returns [`BundleError::InvalidBundleId`] describing the first problem.
pub fn validate_bundle_id(id: &str) -> Result<(), BundleError> {
    let invalid = |detail: &str| BundleError::InvalidBundleId {
        bundle_id: id.into(),
        detail: detail.into(),
    };
    if id.is_empty() {
        return Err(invalid("empty"));
    }
    if id.len() > 200 {
        return Err(invalid("longer than 200 bytes"));
    }
    if id.starts_with('.') {
        return Err(invalid("leading dot"));
    }
    if !id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
    {
        return Err(invalid("allowed characters are [A-Za-z0-9._-]"));
    }
    Ok(())
}

fn is_reserved(path: &str) -> bool {
    path == MANIFEST_PATH || path == HASH_LIST_PATH || GENERATED_PATHS.contains(&path)
}

/// Mutable bundle under construction.
#[derive(Debug, Clone)]
pub struct BundleBuilder {
    bundle_id: String,
    producer: Producer,
    created_utc: DateTime<Utc>,
    inputs: Map<String, Value>,
    dependencies: Vec<DependencyRecord>,
    artifacts: BTreeMap<String, BundleArtifact>,
    controls: BTreeMap<String, ControlResult>,
    notes: Vec<String>,
    canon: CanonicalOptions,
}

impl BundleBuilder {
    /// Start a bundle.
    ///
    /// `created_utc` is supplied by the caller and also fixes the date
    /// segment of the bundle directory. The library never reads the clock.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::InvalidBundleId`] for an unsafe id.
    pub fn new(
        bundle_id: impl Into<String>,
        producer: Producer,
        created_utc: DateTime<Utc>,
    ) -> Result<Self, BundleError> {
        let bundle_id = bundle_id.into();
        validate_bundle_id(&bundle_id)?;
        tracing::debug!(%bundle_id, "bundle started");
        Ok(Self {
            bundle_id,
            producer,
            created_utc,
            inputs: Map::new(),
            dependencies: Vec::new(),
            artifacts: BTreeMap::new(),
            controls: BTreeMap::new(),
            notes: Vec::new(),
            canon: CanonicalOptions::default(),
        })
    }

    /// Use per-field float precision for generated documents.
    #[must_use]
    pub fn with_canonical_options(mut self, options: CanonicalOptions) -> Self {
        self.canon = options;
        self
    }

    #[must_use]
    pub fn bundle_id(&self) -> &str {
        &self.bundle_id
    }

    /// Record a run input.
    ///
    /// File inputs are registered as `input` artifacts at
    /// `inputs/<name>.<ext>`; scalars are recorded in `inputs/parameters.json`.
    ///
    /// # Errors
    ///
    /// - [`BundleError::InvalidInputName`] unless `name` is `[a-z0-9_]+`.
    /// - [`CanonError::KeyCollision`] if `name` was already recorded.
    /// - [`CanonError::NonFiniteNumber`] for NaN or infinite floats.
    /// - [`HashError`] if a file input cannot be hashed.
    pub fn add_input(&mut self, name: &str, value: InputValue) -> Result<(), BundleError> {
        if name.is_empty()
            || !name
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        {
            return Err(BundleError::InvalidInputName {
                name: name.into(),
                detail: "expected [a-z0-9_]+".into(),
            });
        }
        // Reserve the name first so a colliding file input never registers
        // an artifact.
        insert_unique(&mut self.inputs, "$.inputs", name.to_string(), Value::Null)?;
        match self.record_input(name, value) {
            Ok(recorded) => {
                self.inputs.insert(name.to_string(), recorded);
                Ok(())
            }
            Err(e) => {
                self.inputs.remove(name);
                Err(e)
            }
        }
    }

    fn record_input(&mut self, name: &str, value: InputValue) -> Result<Value, BundleError> {
        let recorded = match value {
            InputValue::File { path, content_type } => {
                let ext = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .filter(|e| !e.is_empty() && e.bytes().all(|b| b.is_ascii_alphanumeric()));
                let dest = match ext {
                    Some(ext) => format!("inputs/{name}.{}", ext.to_ascii_lowercase()),
                    None => format!("inputs/{name}"),
                };
                let entry = self.add_artifact(
                    &dest,
                    ArtifactSource::File(path),
                    ArtifactRole::Input,
                    &content_type,
                )?;
                json!({
                    "content_type": entry.content_type,
                    "path": entry.path.as_str(),
                    "sha256": entry.sha256.as_str(),
                    "size_bytes": entry.size_bytes,
                })
            }
            InputValue::Text(s) => Value::String(s),
            InputValue::Integer(i) => Value::from(i),
            InputValue::Float(f) => float_value(f).map_err(|e| match e {
                CanonError::NonFiniteNumber { raw, .. } => CanonError::NonFiniteNumber {
                    path: format!("$.inputs.{name}"),
                    raw,
                },
                other => other,
            })?,
            InputValue::Bool(b) => Value::Bool(b),
        };
        Ok(recorded)
    }

    /// Record the single source for a catalogue id.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::DuplicateDependency`] if the catalogue id is
    /// already recorded; use [`Self::add_cross_check_dependency`] to keep
    /// several versions on purpose.
    pub fn add_dependency(&mut self, record: DependencyRecord) -> Result<(), BundleError> {
        if self
            .dependencies
            .iter()
            .any(|d| d.catalogue_id == record.catalogue_id)
        {
            return Err(BundleError::DuplicateDependency {
                catalogue_id: record.catalogue_id,
                detail: "already recorded; cross-checks must be added as such".into(),
            });
        }
        tracing::debug!(catalogue_id = %record.catalogue_id, "dependency added");
        self.dependencies.push(record);
        Ok(())
    }

    /// Record another version of a catalogue id for a multi-source cross-check.
    ///
    /// Every entry sharing the catalogue id is flagged `role=provenance`.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::DuplicateDependency`] if the same
    /// `(catalogue_id, version)` pair is already recorded.
    pub fn add_cross_check_dependency(
        &mut self,
        mut record: DependencyRecord,
    ) -> Result<(), BundleError> {
        if self
            .dependencies
            .iter()
            .any(|d| d.catalogue_id == record.catalogue_id && d.version == record.version)
        {
            return Err(BundleError::DuplicateDependency {
                catalogue_id: record.catalogue_id,
                detail: "same version recorded twice".into(),
            });
        }
        for existing in self
            .dependencies
            .iter_mut()
            .filter(|d| d.catalogue_id == record.catalogue_id)
        {
            existing.role = DependencyRole::Provenance;
        }
        record.role = DependencyRole::Provenance;
        tracing::debug!(catalogue_id = %record.catalogue_id, "cross-check dependency added");
        self.dependencies.push(record);
        Ok(())
    }

    /// Register an artifact and compute its digest.
    ///
    /// # Errors
    ///
    /// - [`PathError`] for unsafe paths.
    /// - [`BundleError::ReservedPath`] for generated or index paths.
    /// - [`BundleError::RoleDirectory`] if the top directory does not match `role`.
    /// - [`BundleError::DuplicateArtifact`] for a repeated path.
    /// - [`HashError::MissingFile`] if a file source does not exist.
    pub fn add_artifact(
        &mut self,
        path: &str,
        source: ArtifactSource,
        role: ArtifactRole,
        content_type: &str,
    ) -> Result<ArtifactEntry, BundleError> {
        let rel = RelPath::parse(path)?;
        if is_reserved(rel.as_str()) {
            return Err(BundleError::ReservedPath { path: path.into() });
        }
        if rel.top_dir() != Some(role.dir()) {
            return Err(BundleError::RoleDirectory {
                path: path.into(),
                role,
                expected: role.dir(),
            });
        }
        if self.artifacts.contains_key(rel.as_str()) {
            return Err(BundleError::DuplicateArtifact { path: path.into() });
        }

        let (sha256, size_bytes) = match &source {
            ArtifactSource::File(p) => {
                let digest = hash_file(p)?;
                (digest.sha256, digest.size_bytes)
            }
            ArtifactSource::Bytes(b) => (hash_bytes(b), b.len() as u64),
        };
        let entry = ArtifactEntry {
            path: rel,
            sha256,
            size_bytes,
            content_type: content_type.to_string(),
            role,
        };
        tracing::debug!(path = %entry.path, sha256 = %entry.sha256, "artifact added");
        self.artifacts.insert(
            entry.path.as_str().to_string(),
            BundleArtifact {
                entry: entry.clone(),
                source,
            },
        );
        Ok(entry)
    }

    /// Record one control evaluator result.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::DuplicateControl`] for a repeated control id.
    pub fn add_control(&mut self, control: ControlResult) -> Result<(), BundleError> {
        if self.controls.contains_key(&control.control_id) {
            return Err(BundleError::DuplicateControl {
                control_id: control.control_id,
            });
        }
        self.controls
            .insert(control.control_id.clone(), control.normalized());
        Ok(())
    }

    /// Append a free-form line to `logs/run.log`. Embedded newlines split lines.
    pub fn log(&mut self, line: &str) {
        self.notes.extend(line.lines().map(str::to_string));
    }

    /// Evaluate the outcome against the current state.
    ///
    /// Required evidence (the geometry input plus every control's
    /// `evidence_refs`) is re-checked on disk here, so a source file changed
    /// since it was added shows up as a hash mismatch.
    #[must_use]
    pub fn evaluate(&self, policy: &EvaluationPolicy, as_of: DateTime<Utc>) -> Evaluation {
        let controls: Vec<ControlResult> = self.controls.values().cloned().collect();
        let evidence = self.required_evidence();
        let evaluation = evaluate(&EvaluationInput {
            controls: &controls,
            dependencies: &self.sorted_dependencies(),
            evidence: &evidence,
            policy,
            as_of,
        });
        tracing::info!(
            bundle_id = %self.bundle_id,
            status = %evaluation.outcome.status,
            decisions = evaluation.decisions.len(),
            "outcome evaluated"
        );
        evaluation
    }

    fn required_evidence(&self) -> Vec<RequiredEvidence> {
        let mut paths: BTreeSet<String> = self
            .controls
            .values()
            .flat_map(|c| c.evidence_refs.iter().cloned())
            .collect();
        match self.geometry_path() {
            Some(p) => paths.insert(p),
            None => paths.insert(format!("inputs/{GEOMETRY_INPUT}")),
        };

        paths
            .into_iter()
            .map(|path| {
                // Generated documents are rendered from builder state at
                // finalize and cannot be missing or stale.
                let state = if GENERATED_PATHS.contains(&path.as_str()) {
                    EvidenceState::Present
                } else {
                    match self.artifacts.get(&path) {
                        None => EvidenceState::Missing,
                        Some(artifact) => recheck(artifact),
                    }
                };
                RequiredEvidence { path, state }
            })
            .collect()
    }

    fn geometry_path(&self) -> Option<String> {
        self.inputs
            .get(GEOMETRY_INPUT)
            .and_then(|v| v.get("path"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn sorted_dependencies(&self) -> Vec<DependencyRecord> {
        let mut deps = self.dependencies.clone();
        deps.sort_by(|a, b| (&a.catalogue_id, &a.version).cmp(&(&b.catalogue_id, &b.version)));
        deps
    }

    /// Check every completeness invariant and freeze the bundle.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::Incomplete`] listing every violated invariant,
    /// or [`BundleError::Canon`] if a generated document cannot be rendered.
    pub fn finalize(self, evaluation: Evaluation) -> Result<Bundle, BundleError> {
        let dependencies = self.sorted_dependencies();
        let mut violations = Vec::new();

        if self.producer.name.trim().is_empty() {
            violations.push(Violation::new("producer", "name", "must be non-empty"));
        }
        if self.producer.version.trim().is_empty() {
            violations.push(Violation::new("producer", "version", "must be non-empty"));
        }
        if self.geometry_path().is_none() {
            violations.push(Violation::new(
                "inputs",
                GEOMETRY_INPUT,
                "file-backed geometry input is required",
            ));
        }
        if dependencies.is_empty() {
            violations.push(Violation::new(
                "dependencies",
                "dependencies",
                "at least one dependency record is required",
            ));
        }
        for dep in &dependencies {
            for (field, detail) in dep.completeness_violations() {
                violations.push(Violation::new(
                    format!("dependency {}", dep.source_key()),
                    field,
                    detail,
                ));
            }
        }
        violations.extend(self.stale_artifacts());

        let evaluated: BTreeSet<&str> = evaluation
            .outcome
            .controls
            .iter()
            .map(|c| c.control_id.as_str())
            .collect();
        for id in self.controls.keys() {
            if !evaluated.contains(id.as_str()) {
                violations.push(Violation::new(
                    format!("control {id}"),
                    "status",
                    "not covered by the evaluation",
                ));
            }
        }

        let mut artifact_paths: BTreeSet<String> = self.artifacts.keys().cloned().collect();
        artifact_paths.extend(GENERATED_PATHS.iter().map(|p| (*p).to_string()));
        let dependency_ids: BTreeSet<String> =
            dependencies.iter().map(|d| d.catalogue_id.clone()).collect();
        let decision_ids: BTreeSet<String> = evaluation
            .decisions
            .iter()
            .map(|d| d.decision_id.clone())
            .collect();
        violations.extend(traceability_violations(
            &evaluation.outcome,
            &artifact_paths,
            &dependency_ids,
            &decision_ids,
        ));

        if !violations.is_empty() {
            tracing::warn!(
                bundle_id = %self.bundle_id,
                violations = violations.len(),
                "bundle incomplete"
            );
            return Err(IncompleteBundleError {
                bundle_id: self.bundle_id,
                violations,
            }
            .into());
        }

        let inputs = Value::Object(self.inputs.clone());
        let generated = self.render_generated(&inputs, &dependencies, &evaluation)?;
        let mut artifacts = self.artifacts;
        for (path, bytes, role, content_type) in generated {
            let entry = ArtifactEntry {
                path: RelPath::parse(path)?,
                sha256: hash_bytes(&bytes),
                size_bytes: bytes.len() as u64,
                content_type: content_type.to_string(),
                role,
            };
            artifacts.insert(
                path.to_string(),
                BundleArtifact {
                    entry,
                    source: ArtifactSource::Bytes(bytes),
                },
            );
        }

        tracing::info!(
            bundle_id = %self.bundle_id,
            artifacts = artifacts.len(),
            status = %evaluation.outcome.status,
            "bundle finalized"
        );
        Ok(Bundle {
            bundle_id: self.bundle_id,
            producer: self.producer,
            created_utc: self.created_utc,
            inputs,
            dependencies,
            artifacts: artifacts.into_values().collect(),
            evaluation,
            canon: self.canon,
        })
    }

    /// File-backed artifacts whose bytes changed or vanished since they were added.
    fn stale_artifacts(&self) -> Vec<Violation> {
        let file_backed: Vec<(&BundleArtifact, PathBuf)> = self
            .artifacts
            .values()
            .filter_map(|a| match &a.source {
                ArtifactSource::File(p) => Some((a, p.clone())),
                ArtifactSource::Bytes(_) => None,
            })
            .collect();
        let paths: Vec<PathBuf> = file_backed.iter().map(|(_, p)| p.clone()).collect();

        let mut out = Vec::new();
        for ((artifact, _), result) in file_backed.iter().zip(hash_files(&paths)) {
            let subject = format!("artifact {}", artifact.entry.path);
            match result {
                Ok(d) if d.sha256 == artifact.entry.sha256 => {}
                Ok(d) => out.push(Violation::new(
                    subject,
                    "sha256",
                    format!(
                        "source changed: recorded {}, now {}",
                        artifact.entry.sha256, d.sha256
                    ),
                )),
                Err(e) => out.push(Violation::new(subject, "path", e.to_string())),
            }
        }
        out
    }

    fn render_generated(
        &self,
        inputs: &Value,
        dependencies: &[DependencyRecord],
        evaluation: &Evaluation,
    ) -> Result<Vec<(&'static str, Vec<u8>, ArtifactRole, &'static str)>, CanonError> {
        let outcome = &evaluation.outcome;
        let summary = json!({
            "bundle_id": self.bundle_id,
            "controls": outcome
                .controls
                .iter()
                .map(|c| json!({ "control_id": c.control_id, "status": c.status.as_str() }))
                .collect::<Vec<_>>(),
            "reasons": outcome.reasons,
            "schema_version": SCHEMA_VERSION,
            "status": outcome.status.as_str(),
        });
        let provenance = json!({
            "dependencies": dependencies.iter().map(DependencyRecord::to_json).collect::<Vec<_>>(),
            "schema_version": SCHEMA_VERSION,
        });
        let decisions = json!({
            "decisions": evaluation.decisions.iter().map(DecisionRecord::to_json).collect::<Vec<_>>(),
            "schema_version": SCHEMA_VERSION,
        });
        let method = evaluation.policy.method_document(&evaluation.as_of);
        let run_log = self.render_run_log(inputs, dependencies, evaluation)?;

        let pretty = |v: &Value| canonical_json_pretty_with(v, &self.canon);
        Ok(vec![
            (PARAMETERS_PATH, pretty(inputs)?, ArtifactRole::Input, JSON_CONTENT_TYPE),
            (SUMMARY_PATH, pretty(&summary)?, ArtifactRole::Output, JSON_CONTENT_TYPE),
            (PROVENANCE_PATH, pretty(&provenance)?, ArtifactRole::Provenance, JSON_CONTENT_TYPE),
            (RUN_LOG_PATH, run_log, ArtifactRole::Log, LOG_CONTENT_TYPE),
            (DECISIONS_PATH, pretty(&decisions)?, ArtifactRole::Method, JSON_CONTENT_TYPE),
            (METHOD_VERSION_PATH, pretty(&method)?, ArtifactRole::Method, JSON_CONTENT_TYPE),
        ])
    }

    fn render_run_log(
        &self,
        inputs: &Value,
        dependencies: &[DependencyRecord],
        evaluation: &Evaluation,
    ) -> Result<Vec<u8>, CanonError> {
        // created_utc stays out of the log so reruns produce identical bytes.
        let mut lines = vec![format!(
            "bundle {} producer={}@{}",
            self.bundle_id, self.producer.name, self.producer.version
        )];
        if let Value::Object(map) = inputs {
            for (name, value) in map {
                let rendered = canonical_json_bytes_with(value, &self.canon)?;
                lines.push(format!("input {name}={}", String::from_utf8_lossy(&rendered)));
            }
        }
        for dep in dependencies {
            lines.push(format!(
                "dependency {} role={} retrieval={}",
                dep.source_key(),
                dep.role.as_str(),
                dep.retrieval_method.as_deref().unwrap_or("-")
            ));
        }
        for artifact in self.artifacts.values() {
            let entry = &artifact.entry;
            lines.push(format!(
                "artifact {} role={} sha256={} size={}",
                entry.path, entry.role, entry.sha256, entry.size_bytes
            ));
        }
        for control in &evaluation.outcome.controls {
            lines.push(format!("control {} status={}", control.control_id, control.status));
        }
        for decision in &evaluation.decisions {
            lines.push(format!(
                "decision {} kind={} selected={}",
                decision.decision_id,
                decision.kind.as_str(),
                decision.selected.as_deref().unwrap_or("-")
            ));
        }
        lines.push(format!(
            "outcome {} as_of={}",
            evaluation.outcome.status,
            format_utc(&evaluation.as_of)
        ));
        for note in &self.notes {
            lines.push(format!("note {note}"));
        }

        let mut out = lines.join("\n");
        out.push('\n');
        Ok(out.into_bytes())
    }
}

fn recheck(artifact: &BundleArtifact) -> EvidenceState {
    match &artifact.source {
        ArtifactSource::Bytes(_) => EvidenceState::Present,
        ArtifactSource::File(p) => match hash_file(p) {
            Ok(d) if d.sha256 == artifact.entry.sha256 => EvidenceState::Present,
            Ok(d) => EvidenceState::HashMismatch {
                expected: artifact.entry.sha256.to_string(),
                actual: d.sha256.to_string(),
            },
            Err(HashError::MissingFile { .. }) => EvidenceState::Missing,
            Err(HashError::Unreadable { detail, .. }) => EvidenceState::Unreadable { detail },
        },
    }
}

/// A finalized, immutable bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    bundle_id: String,
    producer: Producer,
    created_utc: DateTime<Utc>,
    inputs: Value,
    dependencies: Vec<DependencyRecord>,
    artifacts: Vec<BundleArtifact>,
    evaluation: Evaluation,
    canon: CanonicalOptions,
}

impl Bundle {
    #[must_use]
    pub fn bundle_id(&self) -> &str {
        &self.bundle_id
    }

    #[must_use]
    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    #[must_use]
    pub fn created_utc(&self) -> DateTime<Utc> {
        self.created_utc
    }

    /// Date segment of the bundle directory.
    #[must_use]
    pub fn run_date(&self) -> NaiveDate {
        self.created_utc.date_naive()
    }

    #[must_use]
    pub fn inputs(&self) -> &Value {
        &self.inputs
    }

    /// Dependencies sorted by `(catalogue_id, version)`.
    #[must_use]
    pub fn dependencies(&self) -> &[DependencyRecord] {
        &self.dependencies
    }

    /// Artifacts sorted by path, generated documents included.
    #[must_use]
    pub fn artifacts(&self) -> &[BundleArtifact] {
        &self.artifacts
    }

    #[must_use]
    pub fn artifact(&self, path: &str) -> Option<&BundleArtifact> {
        self.artifacts.iter().find(|a| a.entry.path.as_str() == path)
    }

    #[must_use]
    pub fn outcome(&self) -> &Outcome {
        &self.evaluation.outcome
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.evaluation.outcome.status
    }

    #[must_use]
    pub fn decisions(&self) -> &[DecisionRecord] {
        &self.evaluation.decisions
    }

    #[must_use]
    pub fn evaluation(&self) -> &Evaluation {
        &self.evaluation
    }

    #[must_use]
    pub fn canonical_options(&self) -> &CanonicalOptions {
        &self.canon
    }
}

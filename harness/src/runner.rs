//! Runner: turn a declarative run spec into a written evidence bundle.
//!
//! # Pipeline
//!
//! ```text
//! hash geometry → derive_bundle_id() → BundleBuilder
//!   → add inputs / dependencies / artifacts / controls
//!   → evaluate(policy, as_of) → finalize() → BundleWriter::write()
//! ```
//!
//! The runner owns no evidence logic of its own. Control results and
//! dependency records arrive pre-computed in the run spec; the runner only wires
//! them through the builder. `created_utc` is passed in so the library never
//! reads the clock.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use evidence_kernel::proof::canon::{CanonError, CanonicalOptions};
use evidence_kernel::proof::hash::{hash_file, HashError};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::bundle::{
    derive_bundle_id, ArtifactSource, Bundle, BundleBuilder, BundleError, InputValue,
    GEOMETRY_INPUT,
};
use crate::bundle_dir::{BundlePath, BundleWriteError, BundleWriter};
use crate::contract::{
    utc_seconds, utc_seconds_opt, ArtifactRole, ControlResult, DependencyRecord, DependencyRole,
    Producer, Status,
};
use crate::policy::{build_policy, PolicyConfig};

/// Bundle id prefix when the run spec does not set one.
pub const DEFAULT_BUNDLE_PREFIX: &str = "dmi";

/// Declarative description of one run.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSpec {
    pub producer: Producer,
    #[serde(default = "default_prefix")]
    pub bundle_prefix: String,
    /// Optional; the caller supplies one when absent.
    #[serde(default, deserialize_with = "utc_seconds_opt::deserialize")]
    pub created_utc: Option<DateTime<Utc>>,
    /// Evaluation time for freshness windows. Pinned so reruns agree.
    #[serde(deserialize_with = "utc_seconds::deserialize")]
    pub as_of_utc: DateTime<Utc>,
    #[serde(default)]
    pub freshness_window_days: Option<u32>,
    /// Decimal places for floats under the named fields (at most the default).
    #[serde(default)]
    pub float_precision: BTreeMap<String, u32>,
    pub inputs: RunInputs,
    pub dependencies: Vec<DependencyRecord>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactSpec>,
    #[serde(default)]
    pub controls: Vec<ControlResult>,
    #[serde(default)]
    pub notes: Vec<String>,
}

fn default_prefix() -> String {
    DEFAULT_BUNDLE_PREFIX.to_string()
}

/// The run's inputs. Paths are relative to the run spec file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunInputs {
    pub geometry: PathBuf,
    #[serde(default = "default_geometry_type")]
    pub geometry_content_type: String,
    pub commodity: String,
    #[serde(deserialize_with = "iso_date")]
    pub from_date: NaiveDate,
    #[serde(deserialize_with = "iso_date")]
    pub to_date: NaiveDate,
    #[serde(default)]
    pub operator_ref: Option<String>,
    /// Extra scalar parameters recorded in `inputs/parameters.json`.
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
}

fn default_geometry_type() -> String {
    "application/geo+json".to_string()
}

/// An extra artifact to copy into the bundle.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactSpec {
    /// Destination inside the bundle (`outputs/map.png`).
    pub path: String,
    pub source: PathBuf,
    pub role: ArtifactRole,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

fn iso_date<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDate, D::Error> {
    let raw = String::deserialize(d)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(serde::de::Error::custom)
}

/// Error during a run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The spec is well-formed JSON but describes an impossible run.
    #[error("run spec: {detail}")]
    Spec { detail: String },
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error(transparent)]
    Canon(#[from] CanonError),
    #[error(transparent)]
    Bundle(#[from] BundleError),
    #[error(transparent)]
    Write(#[from] BundleWriteError),
}

/// What a completed run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub bundle_id: String,
    pub status: Status,
    pub path: BundlePath,
}

/// Build and finalize the bundle for `spec` without writing it.
///
/// # Errors
///
/// Returns [`RunError`] for invalid specs, unreadable inputs, or an
/// incomplete bundle.
pub fn build(
    spec: &RunSpec,
    base_dir: &Path,
    created_utc: DateTime<Utc>,
) -> Result<Bundle, RunError> {
    let resolve = |p: &Path| {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            base_dir.join(p)
        }
    };

    let geometry_path = resolve(&spec.inputs.geometry);
    let geometry = hash_file(&geometry_path)?;
    let bundle_id = derive_bundle_id(
        &spec.bundle_prefix,
        &geometry.sha256,
        spec.inputs.from_date,
        spec.inputs.to_date,
    )?;

    let mut canon = CanonicalOptions::default();
    for (field, digits) in &spec.float_precision {
        canon = canon.with_field_digits(field, *digits)?;
    }
    let mut builder = BundleBuilder::new(bundle_id, spec.producer.clone(), created_utc)?
        .with_canonical_options(canon);

    builder.add_input(
        GEOMETRY_INPUT,
        InputValue::File {
            path: geometry_path,
            content_type: spec.inputs.geometry_content_type.clone(),
        },
    )?;
    builder.add_input("commodity", InputValue::Text(spec.inputs.commodity.clone()))?;
    builder.add_input(
        "from_date",
        InputValue::Text(spec.inputs.from_date.format("%Y-%m-%d").to_string()),
    )?;
    builder.add_input(
        "to_date",
        InputValue::Text(spec.inputs.to_date.format("%Y-%m-%d").to_string()),
    )?;
    if let Some(operator_ref) = &spec.inputs.operator_ref {
        builder.add_input("operator_ref", InputValue::Text(operator_ref.clone()))?;
    }
    for (name, value) in &spec.inputs.parameters {
        builder.add_input(name, scalar_input(name, value)?)?;
    }

    // A catalogue id listed more than once is a cross-check regardless of
    // the declared roles, so record order cannot change the result.
    let mut occurrences: BTreeMap<&str, usize> = BTreeMap::new();
    for record in &spec.dependencies {
        *occurrences.entry(record.catalogue_id.as_str()).or_default() += 1;
    }
    for record in &spec.dependencies {
        let shared = occurrences
            .get(record.catalogue_id.as_str())
            .is_some_and(|n| *n > 1);
        if shared || record.role == DependencyRole::Provenance {
            builder.add_cross_check_dependency(record.clone())?;
        } else {
            builder.add_dependency(record.clone())?;
        }
    }
    for artifact in &spec.artifacts {
        builder.add_artifact(
            &artifact.path,
            ArtifactSource::File(resolve(&artifact.source)),
            artifact.role,
            &artifact.content_type,
        )?;
    }
    for control in &spec.controls {
        builder.add_control(control.clone())?;
    }
    for note in &spec.notes {
        builder.log(note);
    }

    let policy = build_policy(&PolicyConfig {
        freshness_window_days: spec.freshness_window_days,
    });
    let evaluation = builder.evaluate(&policy, spec.as_of_utc);
    Ok(builder.finalize(evaluation)?)
}

/// Build, finalize and write the bundle for `spec`.
///
/// # Errors
///
/// Returns [`RunError`] from building or writing. Nothing is left on disk
/// on failure.
pub fn run(
    spec: &RunSpec,
    base_dir: &Path,
    created_utc: DateTime<Utc>,
    writer: &BundleWriter,
) -> Result<RunReport, RunError> {
    let bundle = build(spec, base_dir, created_utc)?;
    let path = writer.write(&bundle)?;
    Ok(RunReport {
        bundle_id: bundle.bundle_id().to_string(),
        status: bundle.status(),
        path,
    })
}

fn scalar_input(name: &str, value: &Value) -> Result<InputValue, RunError> {
    match value {
        Value::String(s) => Ok(InputValue::Text(s.clone())),
        Value::Bool(b) => Ok(InputValue::Bool(*b)),
        Value::Number(n) => match (n.as_i64(), n.is_f64()) {
            (Some(i), _) => Ok(InputValue::Integer(i)),
            (None, true) => n.as_f64().map(InputValue::Float).ok_or_else(|| RunError::Spec {
                detail: format!("parameter {name}: number out of range"),
            }),
            // An unsigned integer above i64::MAX would lose precision as a float.
            (None, false) => Err(RunError::Spec {
                detail: format!("parameter {name}: integer {n} exceeds the signed 64-bit range"),
            }),
        },
        Value::Null | Value::Array(_) | Value::Object(_) => Err(RunError::Spec {
            detail: format!("parameter {name}: only strings, numbers and booleans are allowed"),
        }),
    }
}

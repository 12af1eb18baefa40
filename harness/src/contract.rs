//! Data contract between the bundle core and its collaborators.
//!
//! Dependency-provenance suppliers and control evaluators hand the core
//! [`DependencyRecord`] and [`ControlResult`] values; the core never computes
//! them. These types deserialize from run specs and manifests, and render
//! themselves to JSON explicitly via `to_json()` so that field names on disk
//! are spelled out in one place.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

/// Who produced a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
}

impl Producer {
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({ "name": self.name, "version": self.version })
    }
}

/// Role of an artifact; each role owns one top-level bundle directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRole {
    Input,
    Output,
    Provenance,
    Log,
    Method,
    Attachment,
}

impl ArtifactRole {
    /// All roles in declaration order.
    pub const ALL: &[ArtifactRole] = &[
        Self::Input,
        Self::Output,
        Self::Provenance,
        Self::Log,
        Self::Method,
        Self::Attachment,
    ];

    /// The directory that holds artifacts of this role.
    #[must_use]
    pub const fn dir(self) -> &'static str {
        match self {
            Self::Input => "inputs",
            Self::Output => "outputs",
            Self::Provenance => "provenance",
            Self::Log => "logs",
            Self::Method => "method",
            Self::Attachment => "attachments",
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Provenance => "provenance",
            Self::Log => "log",
            Self::Method => "method",
            Self::Attachment => "attachment",
        }
    }
}

impl std::fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tri-state verdict shared by control results and the bundle outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Pass,
    Fail,
    Undetermined,
}

impl Status {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Undetermined => "UNDETERMINED",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a dependency entry is the run's single source for its catalogue id
/// or one of several intentionally recorded versions (multi-source cross-check).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyRole {
    #[default]
    Primary,
    Provenance,
}

impl DependencyRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Provenance => "provenance",
        }
    }
}

/// One external dataset or service consumed by the run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DependencyRecord {
    pub catalogue_id: String,
    pub dataset_or_service: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "utc_seconds_opt::deserialize")]
    pub source_timestamp_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retrieval_method: Option<String>,
    #[serde(default)]
    pub integrity: Option<String>,
    /// Documented reason why `version` or `source_timestamp_utc` is unknown.
    #[serde(default)]
    pub exception: Option<String>,
    #[serde(default)]
    pub role: DependencyRole,
}

impl DependencyRecord {
    /// A primary record with every optional field unset.
    #[must_use]
    pub fn new(catalogue_id: impl Into<String>, dataset_or_service: impl Into<String>) -> Self {
        Self {
            catalogue_id: catalogue_id.into(),
            dataset_or_service: dataset_or_service.into(),
            version: None,
            source_timestamp_utc: None,
            retrieval_method: None,
            integrity: None,
            exception: None,
            role: DependencyRole::Primary,
        }
    }

    /// `catalogue_id` or `catalogue_id@version`, for messages and decision logs.
    #[must_use]
    pub fn source_key(&self) -> String {
        match &self.version {
            Some(v) => format!("{}@{v}", self.catalogue_id),
            None => self.catalogue_id.clone(),
        }
    }

    /// Provenance strength used to rank conflicting sources.
    ///
    /// Documented integrity outranks a documented version.
    #[must_use]
    pub fn provenance_strength(&self) -> u8 {
        let integrity = u8::from(non_empty(self.integrity.as_deref()));
        let version = u8::from(non_empty(self.version.as_deref()));
        integrity * 2 + version
    }

    /// Every completeness rule this record breaks, as `(field, detail)` pairs.
    ///
    /// `catalogue_id`, `dataset_or_service` and `retrieval_method` are always
    /// required. `version` and `source_timestamp_utc` may be null only when a
    /// non-empty `exception` documents why.
    #[must_use]
    pub fn completeness_violations(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if self.catalogue_id.trim().is_empty() {
            out.push(("catalogue_id", "must be non-empty".to_string()));
        }
        if self.dataset_or_service.trim().is_empty() {
            out.push(("dataset_or_service", "must be non-empty".to_string()));
        }
        if !non_empty(self.retrieval_method.as_deref()) {
            out.push(("retrieval_method", "missing".to_string()));
        }
        let excepted = non_empty(self.exception.as_deref());
        if !excepted {
            if !non_empty(self.version.as_deref()) {
                out.push(("version", "null without a documented exception".to_string()));
            }
            if self.source_timestamp_utc.is_none() {
                out.push((
                    "source_timestamp_utc",
                    "null without a documented exception".to_string(),
                ));
            }
        }
        out
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut value = json!({
            "catalogue_id": self.catalogue_id,
            "dataset_or_service": self.dataset_or_service,
            "retrieval_method": self.retrieval_method,
            "role": self.role.as_str(),
            "source_timestamp_utc": self.source_timestamp_utc.as_ref().map(format_utc),
            "version": self.version,
        });
        if let Some(integrity) = &self.integrity {
            value["integrity"] = json!(integrity);
        }
        if let Some(exception) = &self.exception {
            value["exception"] = json!(exception);
        }
        value
    }
}

/// One source's verdict for a control whose sources disagree.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceFinding {
    pub catalogue_id: String,
    /// Disambiguates cross-check entries that share a catalogue id.
    #[serde(default)]
    pub version: Option<String>,
    pub status: Status,
    #[serde(default)]
    pub reason: Option<String>,
}

impl SourceFinding {
    #[must_use]
    pub fn source_key(&self) -> String {
        match &self.version {
            Some(v) => format!("{}@{v}", self.catalogue_id),
            None => self.catalogue_id.clone(),
        }
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut value = json!({
            "catalogue_id": self.catalogue_id,
            "status": self.status.as_str(),
        });
        if let Some(version) = &self.version {
            value["version"] = json!(version);
        }
        if let Some(reason) = &self.reason {
            value["reason"] = json!(reason);
        }
        value
    }
}

/// How an UNDETERMINED control was settled by the conflict policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Resolution {
    pub selected_source: String,
    pub decision_ref: String,
}

/// One row of inspection output from a control evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ControlResult {
    pub control_id: String,
    pub status: Status,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub dependency_refs: Vec<String>,
    #[serde(default)]
    pub findings: Vec<SourceFinding>,
    #[serde(default)]
    pub resolution: Option<Resolution>,
}

impl ControlResult {
    #[must_use]
    pub fn new(control_id: impl Into<String>, status: Status) -> Self {
        Self {
            control_id: control_id.into(),
            status,
            evidence_refs: Vec::new(),
            reasons: Vec::new(),
            dependency_refs: Vec::new(),
            findings: Vec::new(),
            resolution: None,
        }
    }

    /// Sort and de-duplicate every list so equal results render identically.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.evidence_refs.sort();
        self.evidence_refs.dedup();
        self.reasons.sort();
        self.reasons.dedup();
        self.dependency_refs.sort();
        self.dependency_refs.dedup();
        self.findings.sort_by(|a, b| {
            (&a.catalogue_id, &a.version).cmp(&(&b.catalogue_id, &b.version))
        });
        self
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut value = json!({
            "control_id": self.control_id,
            "dependency_refs": self.dependency_refs,
            "evidence_refs": self.evidence_refs,
            "reasons": self.reasons,
            "status": self.status.as_str(),
        });
        if !self.findings.is_empty() {
            value["findings"] =
                Value::Array(self.findings.iter().map(SourceFinding::to_json).collect());
        }
        if let Some(resolution) = &self.resolution {
            value["resolution"] = json!({
                "decision_ref": resolution.decision_ref,
                "selected_source": resolution.selected_source,
            });
        }
        value
    }
}

/// Overall verdict of a run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Outcome {
    pub status: Status,
    pub controls: Vec<ControlResult>,
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl Outcome {
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "controls": self.controls.iter().map(ControlResult::to_json).collect::<Vec<_>>(),
            "reasons": self.reasons,
            "status": self.status.as_str(),
        })
    }
}

/// Kind of policy decision applied during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    ConflictResolved,
    ConflictUnresolved,
}

impl DecisionKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConflictResolved => "conflict_resolved",
            Self::ConflictUnresolved => "conflict_unresolved",
        }
    }
}

/// A candidate source the conflict policy set aside, and why.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RejectedSource {
    pub source: String,
    pub reason: String,
}

/// Decision-log entry written to `method/decisions_applied.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DecisionRecord {
    pub decision_id: String,
    pub control_id: String,
    pub kind: DecisionKind,
    pub candidates: Vec<String>,
    #[serde(default)]
    pub selected: Option<String>,
    #[serde(default)]
    pub rejected: Vec<RejectedSource>,
    pub rule: String,
}

impl DecisionRecord {
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "candidates": self.candidates,
            "control_id": self.control_id,
            "decision_id": self.decision_id,
            "kind": self.kind.as_str(),
            "rejected": self
                .rejected
                .iter()
                .map(|r| json!({ "reason": r.reason, "source": r.source }))
                .collect::<Vec<_>>(),
            "rule": self.rule,
            "selected": self.selected,
        })
    }
}

/// One broken bundle invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// What the rule is about (`dependency hansen_gfc`, `artifact inputs/x`).
    pub subject: String,
    pub field: String,
    pub detail: String,
}

impl Violation {
    #[must_use]
    pub fn new(subject: impl Into<String>, field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            field: field.into(),
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}: {}", self.subject, self.field, self.detail)
    }
}

/// Render a timestamp as RFC 3339 UTC with whole seconds (`2024-05-01T00:00:00Z`).
#[must_use]
pub fn format_utc(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an RFC 3339 timestamp into UTC.
///
/// # Errors
///
/// Returns the chrono parse error for malformed input.
pub fn parse_utc(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

fn non_empty(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

/// Deserialize RFC 3339 timestamps with [`parse_utc`].
pub mod utc_seconds {
    use super::{parse_utc, DateTime, Deserialize, Deserializer, Utc};

    /// # Errors
    ///
    /// Fails on non-string or malformed timestamps.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse_utc(&raw).map_err(serde::de::Error::custom)
    }
}

/// Nullable variant of [`utc_seconds`].
pub mod utc_seconds_opt {
    use super::{parse_utc, DateTime, Deserialize, Deserializer, Utc};

    /// # Errors
    ///
    /// Fails on malformed timestamps; `null` becomes `None`.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|raw| parse_utc(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}

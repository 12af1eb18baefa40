//! Outcome evaluation: fold control results into PASS / FAIL / UNDETERMINED.
//!
//! [`evaluate`] is a pure function of its input. It never reads files or the
//! clock; required-evidence state is computed by the caller and passed in.
//!
//! # Rules
//!
//! Applied in order, first match wins:
//!
//! 1. Any required evidence missing, unreadable or hash-mismatched: FAIL.
//! 2. Any control FAIL: FAIL. No conflict resolution is attempted.
//! 3. Each UNDETERMINED control goes through the conflict policy. A resolved
//!    FAIL makes the outcome FAIL; otherwise any unresolved control makes it
//!    UNDETERMINED.
//! 4. Otherwise PASS.
//!
//! FAIL and UNDETERMINED always carry at least one reason. Reasons are
//! sorted (evidence reasons by path, then control reasons by control id) so
//! the outcome does not depend on the order controls were supplied in.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::contract::{
    format_utc, ControlResult, DecisionKind, DecisionRecord, DependencyRecord, Outcome,
    RejectedSource, Resolution, SourceFinding, Status, Violation,
};
use crate::policy::EvaluationPolicy;

/// State of one required evidence artifact at evaluation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvidenceState {
    Present,
    Missing,
    Unreadable { detail: String },
    HashMismatch { expected: String, actual: String },
}

/// A path the outcome depends on, and what was found there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredEvidence {
    pub path: String,
    pub state: EvidenceState,
}

/// Everything [`evaluate`] looks at.
#[derive(Debug, Clone)]
pub struct EvaluationInput<'a> {
    pub controls: &'a [ControlResult],
    pub dependencies: &'a [DependencyRecord],
    pub evidence: &'a [RequiredEvidence],
    pub policy: &'a EvaluationPolicy,
    pub as_of: DateTime<Utc>,
}

/// Result of evaluation, ready to hand to the bundle builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub outcome: Outcome,
    pub decisions: Vec<DecisionRecord>,
    pub policy: EvaluationPolicy,
    pub as_of: DateTime<Utc>,
}

/// Decision id for the conflict on `control_id`.
#[must_use]
pub fn conflict_decision_id(control_id: &str) -> String {
    format!("conflict/{control_id}")
}

/// Evaluate the overall outcome.
#[must_use]
pub fn evaluate(input: &EvaluationInput<'_>) -> Evaluation {
    let mut controls: Vec<ControlResult> = input
        .controls
        .iter()
        .cloned()
        .map(ControlResult::normalized)
        .collect();
    controls.sort_by(|a, b| a.control_id.cmp(&b.control_id));

    let finish = |status, controls, reasons, decisions| Evaluation {
        outcome: Outcome {
            status,
            controls,
            reasons,
        },
        decisions,
        policy: *input.policy,
        as_of: input.as_of,
    };

    let evidence_reasons = evidence_reasons(input.evidence);
    if !evidence_reasons.is_empty() {
        return finish(Status::Fail, controls, evidence_reasons, Vec::new());
    }

    if controls.iter().any(|c| c.status == Status::Fail) {
        let reasons = failing_reasons(&controls);
        return finish(Status::Fail, controls, reasons, Vec::new());
    }

    let mut decisions = Vec::new();
    let mut unresolved: Vec<(String, String)> = Vec::new();
    for control in controls
        .iter_mut()
        .filter(|c| c.status == Status::Undetermined)
    {
        let (decision, selected) =
            resolve_conflict(control, input.dependencies, input.policy, input.as_of);
        match selected {
            Some(finding) => {
                control.status = finding.status;
                control.reasons.push(format!(
                    "resolved by {}: selected {}",
                    decision.decision_id,
                    finding.source_key()
                ));
                if let Some(reason) = &finding.reason {
                    control.reasons.push(reason.clone());
                }
                control.resolution = Some(Resolution {
                    selected_source: finding.source_key(),
                    decision_ref: decision.decision_id.clone(),
                });
            }
            None => {
                let reason = unresolved_reason(control, &decision);
                control.reasons.push(reason.clone());
                unresolved.push((control.control_id.clone(), reason));
            }
        }
        control.reasons.sort();
        control.reasons.dedup();
        decisions.push(decision);
    }

    if controls.iter().any(|c| c.status == Status::Fail) {
        let reasons = failing_reasons(&controls);
        return finish(Status::Fail, controls, reasons, decisions);
    }
    if !unresolved.is_empty() {
        unresolved.sort();
        let reasons = unresolved.into_iter().map(|(_, r)| r).collect();
        return finish(Status::Undetermined, controls, reasons, decisions);
    }
    finish(Status::Pass, controls, Vec::new(), decisions)
}

fn evidence_reasons(evidence: &[RequiredEvidence]) -> Vec<String> {
    let mut failing: Vec<&RequiredEvidence> = evidence
        .iter()
        .filter(|e| e.state != EvidenceState::Present)
        .collect();
    failing.sort_by(|a, b| a.path.cmp(&b.path));
    failing.dedup_by(|a, b| a.path == b.path);
    failing
        .into_iter()
        .map(|e| {
            let what = match &e.state {
                EvidenceState::Present => "present".to_string(),
                EvidenceState::Missing => "missing".to_string(),
                EvidenceState::Unreadable { detail } => format!("unreadable: {detail}"),
                EvidenceState::HashMismatch { expected, actual } => {
                    format!("hash mismatch: recorded {expected}, found {actual}")
                }
            };
            format!("required evidence missing or invalid: {} ({what})", e.path)
        })
        .collect()
}

fn failing_reasons(controls: &[ControlResult]) -> Vec<String> {
    let mut reasons = Vec::new();
    for control in controls.iter().filter(|c| c.status == Status::Fail) {
        if control.reasons.is_empty() {
            reasons.push(format!("{}: control reported FAIL", control.control_id));
        }
        for reason in &control.reasons {
            reasons.push(format!("{}: {reason}", control.control_id));
        }
    }
    reasons
}

fn unresolved_reason(control: &ControlResult, decision: &DecisionRecord) -> String {
    let why = if decision.candidates.is_empty() {
        "no per-source findings to resolve".to_string()
    } else {
        let rejected: Vec<String> = decision
            .rejected
            .iter()
            .map(|r| format!("{} ({})", r.source, r.reason))
            .collect();
        format!("no eligible source: {}", rejected.join(", "))
    };
    format!(
        "{}: unresolved conflict between [{}]; {why}; see {}",
        control.control_id,
        decision.candidates.join(", "),
        decision.decision_id
    )
}

/// Why a finding cannot take part in resolution, if it cannot.
fn ineligibility(
    finding: &SourceFinding,
    dependency: Option<&DependencyRecord>,
    policy: &EvaluationPolicy,
    as_of: DateTime<Utc>,
) -> Option<String> {
    if finding.status == Status::Undetermined {
        return Some("finding is not PASS or FAIL".into());
    }
    let Some(dep) = dependency else {
        return Some("no matching dependency record".into());
    };
    let Some(ts) = dep.source_timestamp_utc else {
        return Some("source timestamp unknown".into());
    };
    let age = as_of - ts;
    if age < chrono::Duration::zero() {
        return Some(format!(
            "source timestamp {} is after evaluation time",
            format_utc(&ts)
        ));
    }
    if age > policy.freshness_window() {
        return Some(format!(
            "stale: {} days old, window {} days",
            age.num_days(),
            policy.freshness_window_days()
        ));
    }
    None
}

fn find_dependency<'a>(
    finding: &SourceFinding,
    dependencies: &'a [DependencyRecord],
) -> Option<&'a DependencyRecord> {
    let mut matches = dependencies.iter().filter(|d| {
        d.catalogue_id == finding.catalogue_id
            && match &finding.version {
                Some(v) => d.version.as_ref() == Some(v),
                None => true,
            }
    });
    let first = matches.next()?;
    // A bare catalogue id must name exactly one record.
    matches.next().is_none().then_some(first)
}

/// Apply the conflict policy to one UNDETERMINED control.
///
/// Eligible findings are ranked by provenance strength, then newer source
/// timestamp, then catalogue id; the first one is selected.
fn resolve_conflict(
    control: &ControlResult,
    dependencies: &[DependencyRecord],
    policy: &EvaluationPolicy,
    as_of: DateTime<Utc>,
) -> (DecisionRecord, Option<SourceFinding>) {
    let candidates: Vec<String> = control
        .findings
        .iter()
        .map(SourceFinding::source_key)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut rejected = Vec::new();
    let mut eligible: Vec<(&SourceFinding, &DependencyRecord)> = Vec::new();
    for finding in &control.findings {
        let dep = find_dependency(finding, dependencies);
        match (ineligibility(finding, dep, policy, as_of), dep) {
            (None, Some(dep)) => eligible.push((finding, dep)),
            (Some(reason), _) => rejected.push(RejectedSource {
                source: finding.source_key(),
                reason,
            }),
            (None, None) => {}
        }
    }
    eligible.sort_by_key(|(finding, dep)| {
        (
            Reverse(dep.provenance_strength()),
            Reverse(dep.source_timestamp_utc),
            finding.catalogue_id.clone(),
            finding.version.clone(),
        )
    });

    let selected = eligible.first().map(|(finding, _)| (*finding).clone());
    for (finding, _) in eligible.iter().skip(1) {
        rejected.push(RejectedSource {
            source: finding.source_key(),
            reason: "outranked by selected source".into(),
        });
    }
    rejected.sort_by(|a, b| a.source.cmp(&b.source));

    let decision = DecisionRecord {
        decision_id: conflict_decision_id(&control.control_id),
        control_id: control.control_id.clone(),
        kind: if selected.is_some() {
            DecisionKind::ConflictResolved
        } else {
            DecisionKind::ConflictUnresolved
        },
        candidates,
        selected: selected.as_ref().map(SourceFinding::source_key),
        rejected,
        rule: policy.conflict_rule(),
    };
    (decision, selected)
}

/// Every way `outcome` fails to trace back to the bundle's own records.
///
/// `artifacts` are manifest artifact paths, `dependencies` catalogue ids and
/// `decisions` decision ids. The builder runs this before finalizing and the
/// verifier runs it against a manifest read from disk.
#[must_use]
pub fn traceability_violations(
    outcome: &Outcome,
    artifacts: &BTreeSet<String>,
    dependencies: &BTreeSet<String>,
    decisions: &BTreeSet<String>,
) -> Vec<Violation> {
    let mut out = Vec::new();
    if outcome.status != Status::Pass && outcome.reasons.is_empty() {
        out.push(Violation::new(
            "outcome",
            "reasons",
            format!("{} requires at least one reason", outcome.status),
        ));
    }

    let mut seen = BTreeSet::new();
    for control in &outcome.controls {
        let subject = format!("control {}", control.control_id);
        if control.control_id.trim().is_empty() {
            out.push(Violation::new("control", "control_id", "must be non-empty"));
        }
        if !seen.insert(control.control_id.as_str()) {
            out.push(Violation::new(&subject, "control_id", "duplicated"));
        }
        if outcome.status == Status::Pass && control.status != Status::Pass {
            out.push(Violation::new(
                &subject,
                "status",
                format!("{} under a PASS outcome", control.status),
            ));
        }
        if control.status != Status::Pass && control.reasons.is_empty() {
            out.push(Violation::new(
                &subject,
                "reasons",
                format!("{} requires at least one reason", control.status),
            ));
        }
        for path in &control.evidence_refs {
            if !artifacts.contains(path) {
                out.push(Violation::new(
                    &subject,
                    "evidence_refs",
                    format!("{path} is not a manifest artifact"),
                ));
            }
        }
        let finding_ids = control.findings.iter().map(|f| &f.catalogue_id);
        for id in control.dependency_refs.iter().chain(finding_ids) {
            if !dependencies.contains(id) {
                out.push(Violation::new(
                    &subject,
                    "dependency_refs",
                    format!("{id} is not a recorded dependency"),
                ));
            }
        }
        if let Some(resolution) = &control.resolution {
            if !decisions.contains(&resolution.decision_ref) {
                out.push(Violation::new(
                    &subject,
                    "resolution",
                    format!("{} is not a recorded decision", resolution.decision_ref),
                ));
            }
        }
    }
    out
}

//! Evaluation policy: the pinned method parameters a bundle was produced under.
//!
//! The runner derives an [`EvaluationPolicy`] from a [`PolicyConfig`] whose
//! unset fields fall back to the defaults below. The policy is recorded in
//! every bundle as `method/method_version.json`, so two bundles that disagree
//! on an outcome can be told apart by method rather than by guesswork.
//!
//! # Rules
//!
//! - No field is read from the environment or the clock. `as_of` is supplied
//!   by the caller.
//! - Changing any default here is a method change: bump [`METHOD_VERSION`].

use chrono::{DateTime, Duration, Utc};
use evidence_kernel::proof::canon::FLOAT_DIGITS;
use serde_json::{json, Value};

use crate::contract::format_utc;

/// Manifest schema identifier.
pub const SCHEMA_VERSION: &str = "evidence_bundle.v1";

/// Identifier of the outcome evaluation method.
pub const METHOD_VERSION: &str = "outcome_evaluator.v1";

/// Default freshness window for conflict resolution, in days.
pub const DEFAULT_FRESHNESS_WINDOW_DAYS: u32 = 30;

/// Ranking applied to eligible sources, highest precedence first.
pub const TIE_BREAK_ORDER: &[&str] = &[
    "provenance_strength_desc",
    "source_timestamp_utc_desc",
    "catalogue_id_asc",
];

/// Overrides for the default policy.
#[derive(Debug, Clone, Default)]
pub struct PolicyConfig {
    /// Freshness window in days. `None` uses [`DEFAULT_FRESHNESS_WINDOW_DAYS`].
    pub freshness_window_days: Option<u32>,
}

/// Resolved evaluation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationPolicy {
    freshness_window_days: u32,
}

impl Default for EvaluationPolicy {
    fn default() -> Self {
        build_policy(&PolicyConfig::default())
    }
}

impl EvaluationPolicy {
    #[must_use]
    pub const fn freshness_window_days(&self) -> u32 {
        self.freshness_window_days
    }

    #[must_use]
    pub fn freshness_window(&self) -> Duration {
        Duration::days(i64::from(self.freshness_window_days))
    }

    /// Human-readable rule line recorded in each conflict decision.
    #[must_use]
    pub fn conflict_rule(&self) -> String {
        format!(
            "eligible: 0 <= as_of - source_timestamp_utc <= {}d; rank: {}",
            self.freshness_window_days,
            TIE_BREAK_ORDER.join(", ")
        )
    }

    /// The `method/method_version.json` document for a run evaluated at `as_of`.
    #[must_use]
    pub fn method_document(&self, as_of: &DateTime<Utc>) -> Value {
        json!({
            "conflict_resolution": {
                "freshness_window_days": self.freshness_window_days,
                "tie_break": TIE_BREAK_ORDER,
            },
            "evaluated_as_of_utc": format_utc(as_of),
            "float_digits": FLOAT_DIGITS,
            "hash_algorithm": "sha256",
            "hash_list_includes_manifest": false,
            "method_version": METHOD_VERSION,
            "outcome_precedence": [
                "required_evidence_missing_or_invalid=FAIL",
                "any_control_fail=FAIL",
                "unresolved_conflict=UNDETERMINED",
                "otherwise=PASS",
            ],
            "schema_version": SCHEMA_VERSION,
        })
    }
}

/// Build an [`EvaluationPolicy`] from optional overrides.
#[must_use]
pub fn build_policy(config: &PolicyConfig) -> EvaluationPolicy {
    EvaluationPolicy {
        freshness_window_days: config
            .freshness_window_days
            .unwrap_or(DEFAULT_FRESHNESS_WINDOW_DAYS),
    }
}

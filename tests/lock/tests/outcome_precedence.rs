//! Outcome precedence through the builder: evidence problems beat control
//! failures, failures beat conflicts, and only resolved conflicts can PASS.

use evidence_harness::bundle::BundleError;
use evidence_harness::contract::{ControlResult, Status};
use evidence_harness::policy::{build_policy, PolicyConfig};
use lock_tests::bundle_test_helpers::{
    conflicting_control, finish, passing_control, sample_builder, utc, write_sources, AS_OF_UTC,
    CONTROL_ID, CREATED_UTC, GEOMETRY_FILE,
};

#[test]
fn failing_control_wins_before_conflicts_are_resolved() {
    let src = tempfile::tempdir().unwrap();
    write_sources(src.path());

    let mut builder = sample_builder(src.path(), utc(CREATED_UTC));
    builder
        .add_control(ControlResult {
            reasons: vec!["plot overlaps protected area".into()],
            evidence_refs: vec!["outputs/overlay.csv".into()],
            ..ControlResult::new("legality", Status::Fail)
        })
        .unwrap();
    let mut conflict = conflicting_control();
    conflict.reasons.push("sources disagree".into());
    builder.add_control(conflict).unwrap();

    let bundle = finish(builder);
    assert_eq!(bundle.status(), Status::Fail);
    assert_eq!(
        bundle.outcome().reasons,
        ["legality: plot overlaps protected area"]
    );
    // No resolution was attempted.
    assert!(bundle.decisions().is_empty());
    let conflict = bundle
        .outcome()
        .controls
        .iter()
        .find(|c| c.control_id == CONTROL_ID)
        .unwrap();
    assert_eq!(conflict.status, Status::Undetermined);
    assert!(conflict.resolution.is_none());
}

#[test]
fn conflict_resolved_to_pass_gives_pass_with_decision() {
    let src = tempfile::tempdir().unwrap();
    write_sources(src.path());

    let mut builder = sample_builder(src.path(), utc(CREATED_UTC));
    let mut conflict = conflicting_control();
    for finding in &mut conflict.findings {
        finding.status = Status::Pass;
        finding.reason = None;
    }
    builder.add_control(conflict).unwrap();
    builder
        .add_control(ControlResult {
            evidence_refs: vec!["outputs/overlay.csv".into()],
            ..ControlResult::new("legality", Status::Pass)
        })
        .unwrap();

    let bundle = finish(builder);
    assert_eq!(bundle.status(), Status::Pass);
    assert!(bundle.outcome().reasons.is_empty());
    assert_eq!(bundle.decisions().len(), 1);
    assert_eq!(
        bundle.decisions()[0].selected.as_deref(),
        Some("jrc_tmf")
    );
}

#[test]
fn missing_evidence_ref_fails_evaluation_and_blocks_finalize() {
    let src = tempfile::tempdir().unwrap();
    write_sources(src.path());

    let mut builder = sample_builder(src.path(), utc(CREATED_UTC));
    let mut control = passing_control();
    control.evidence_refs.push("outputs/never_written.tif".into());
    builder.add_control(control).unwrap();

    let evaluation = builder.evaluate(
        &build_policy(&PolicyConfig::default()),
        utc(AS_OF_UTC),
    );
    assert_eq!(evaluation.outcome.status, Status::Fail);
    assert_eq!(
        evaluation.outcome.reasons,
        ["required evidence missing or invalid: outputs/never_written.tif (missing)"]
    );

    let err = builder.finalize(evaluation).unwrap_err();
    let BundleError::Incomplete(incomplete) = err else {
        panic!("expected an incomplete bundle, got {err}");
    };
    assert!(incomplete
        .violations
        .iter()
        .any(|v| v.field == "evidence_refs"));
}

#[test]
fn geometry_removed_after_adding_fails_and_blocks_finalize() {
    let src = tempfile::tempdir().unwrap();
    write_sources(src.path());

    let mut builder = sample_builder(src.path(), utc(CREATED_UTC));
    builder.add_control(passing_control()).unwrap();
    std::fs::remove_file(src.path().join(GEOMETRY_FILE)).unwrap();

    let evaluation = builder.evaluate(
        &build_policy(&PolicyConfig::default()),
        utc(AS_OF_UTC),
    );
    assert_eq!(evaluation.outcome.status, Status::Fail);
    assert_eq!(
        evaluation.outcome.reasons,
        ["required evidence missing or invalid: inputs/geometry.geojson (missing)"]
    );

    let err = builder.finalize(evaluation).unwrap_err();
    let BundleError::Incomplete(incomplete) = err else {
        panic!("expected an incomplete bundle, got {err}");
    };
    assert!(incomplete
        .violations
        .iter()
        .any(|v| v.subject == "artifact inputs/geometry.geojson"));
}

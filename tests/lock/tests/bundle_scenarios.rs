//! End-to-end bundle scenarios: build → evaluate → finalize → write → verify.
//!
//! Each scenario drives the public API the way a caller would and then
//! inspects the directory on disk, not the in-memory bundle.

use evidence_harness::bundle::{BundleError, DECISIONS_PATH, PARAMETERS_PATH, SUMMARY_PATH};
use evidence_harness::bundle_dir::BundleWriter;
use evidence_harness::config::EvidenceRoot;
use evidence_harness::contract::{ControlResult, DecisionKind, Status};
use evidence_harness::runner::{self, RunError, RunSpec};
use evidence_harness::verify::{
    verify_bundle_dir, BundleState, BundleVerifier, CHECK_HASH_RECOMPUTATION,
};
use lock_tests::bundle_test_helpers::{
    conflicting_control, finish, finish_with_window, sample_builder, sample_bundle,
    sample_bundle_id, sample_spec_json, tamper, utc, write_sample, write_sources, CONTROL_ID,
    CREATED_UTC,
};

fn read_json(path: &std::path::Path) -> serde_json::Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

// ---------------------------------------------------------------------------
// A clean PASS bundle verifies
// ---------------------------------------------------------------------------

#[test]
fn clean_pass_bundle_verifies() {
    let src = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    write_sources(src.path());

    let written = write_sample(src.path(), root.path(), CREATED_UTC);
    assert_eq!(
        written.dir,
        root.path().join("2024-05-02").join(sample_bundle_id())
    );

    let report = verify_bundle_dir(&written.dir);
    assert!(report.passed(), "{report}");
    assert_eq!(report.state, BundleState::Finalized);
    assert!(report.checks.iter().all(|c| c.passed), "{report}");

    let summary = read_json(&written.dir.join(SUMMARY_PATH));
    assert_eq!(summary["status"], "PASS");
    assert_eq!(summary["reasons"], serde_json::json!([]));
}

#[test]
fn verify_at_locates_bundle_by_date_and_id() {
    let src = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    write_sources(src.path());
    let written = write_sample(src.path(), root.path(), CREATED_UTC);

    let report = BundleVerifier::new().verify_at(
        &EvidenceRoot::new(root.path()),
        written.date,
        &written.bundle_id,
    );
    assert!(report.passed(), "{report}");
    assert_eq!(report.bundle_dir, written.dir);
}

#[test]
fn runner_and_builder_produce_identical_bundles() {
    let src = tempfile::tempdir().unwrap();
    write_sources(src.path());
    let spec: RunSpec = serde_json::from_str(&sample_spec_json()).unwrap();

    let via_runner = runner::build(&spec, src.path(), utc(CREATED_UTC)).unwrap();
    let via_helpers = sample_bundle(src.path(), utc(CREATED_UTC));
    assert_eq!(via_runner.bundle_id(), via_helpers.bundle_id());
    assert_eq!(via_runner.artifacts(), via_helpers.artifacts());
    assert_eq!(via_runner.outcome(), via_helpers.outcome());
}

// ---------------------------------------------------------------------------
// A tampered file fails hash recomputation, naming the path
// ---------------------------------------------------------------------------

#[test]
fn tampered_parameters_fail_hash_recomputation() {
    let src = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    write_sources(src.path());
    let written = write_sample(src.path(), root.path(), CREATED_UTC);

    tamper(
        &written.dir,
        PARAMETERS_PATH,
        b"{\n  \"commodity\": \"soy\"\n}\n",
    );

    let report = verify_bundle_dir(&written.dir);
    assert!(!report.passed());
    let check = report.check(CHECK_HASH_RECOMPUTATION).unwrap();
    assert!(!check.passed);
    assert!(
        check
            .details
            .iter()
            .any(|d| d.starts_with(PARAMETERS_PATH) && d.contains("hashes.sha256 records")),
        "details do not name {PARAMETERS_PATH}: {:?}",
        check.details
    );
    // Only the tampered file is reported.
    assert!(check
        .details
        .iter()
        .all(|d| d.starts_with(PARAMETERS_PATH)));
}

// ---------------------------------------------------------------------------
// Incomplete provenance refuses to finalize, nothing is written
// ---------------------------------------------------------------------------

#[test]
fn missing_retrieval_method_is_incomplete_and_writes_nothing() {
    let src = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    write_sources(src.path());

    // The first record, hansen_gfc, ends with its retrieval method.
    let raw = sample_spec_json().replacen(
        "\"retrieval_method\": \"https_download\"\n",
        "\"retrieval_method\": null\n",
        1,
    );
    let spec: RunSpec = serde_json::from_str(&raw).unwrap();
    let err = runner::run(
        &spec,
        src.path(),
        utc(CREATED_UTC),
        &BundleWriter::new(EvidenceRoot::new(root.path())),
    )
    .unwrap_err();

    let RunError::Bundle(BundleError::Incomplete(incomplete)) = err else {
        panic!("expected an incomplete bundle, got {err}");
    };
    assert_eq!(incomplete.bundle_id, sample_bundle_id());
    assert_eq!(incomplete.violations.len(), 1, "{:?}", incomplete.violations);
    let message = incomplete.violations[0].to_string();
    assert!(message.contains("hansen_gfc@v1.11"), "{message}");
    assert!(message.contains("retrieval_method"), "{message}");

    assert_eq!(
        std::fs::read_dir(root.path()).unwrap().count(),
        0,
        "an incomplete bundle must leave nothing under the evidence root"
    );
}

// ---------------------------------------------------------------------------
// Conflicting sources
// ---------------------------------------------------------------------------

#[test]
fn unresolvable_conflict_is_undetermined_with_decision_ref() {
    let src = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    write_sources(src.path());

    let mut builder = sample_builder(src.path(), utc(CREATED_UTC));
    builder.add_control(conflicting_control()).unwrap();
    // Both sources are older than five days at evaluation time.
    let bundle = finish_with_window(builder, Some(5));
    assert_eq!(bundle.status(), Status::Undetermined);

    let decision_ref = format!("conflict/{CONTROL_ID}");
    let reasons = &bundle.outcome().reasons;
    assert_eq!(reasons.len(), 1);
    assert!(reasons[0].starts_with(&format!(
        "{CONTROL_ID}: unresolved conflict between [hansen_gfc, jrc_tmf]"
    )));
    assert!(reasons[0].contains("stale"));
    assert!(reasons[0].ends_with(&format!("see {decision_ref}")));

    let written = BundleWriter::new(EvidenceRoot::new(root.path()))
        .write(&bundle)
        .unwrap();
    let decisions = read_json(&written.dir.join(DECISIONS_PATH));
    assert_eq!(decisions["decisions"][0]["decision_id"], decision_ref.as_str());
    assert_eq!(decisions["decisions"][0]["kind"], "conflict_unresolved");
    assert_eq!(decisions["decisions"][0]["selected"], serde_json::Value::Null);
    assert_eq!(
        decisions["decisions"][0]["candidates"],
        serde_json::json!(["hansen_gfc", "jrc_tmf"])
    );

    // An UNDETERMINED bundle is still a valid bundle.
    let report = verify_bundle_dir(&written.dir);
    assert!(report.passed(), "{report}");
    let summary = read_json(&written.dir.join(SUMMARY_PATH));
    assert_eq!(summary["status"], "UNDETERMINED");
}

#[test]
fn resolvable_conflict_follows_the_stronger_source() {
    let src = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    write_sources(src.path());

    let mut builder = sample_builder(src.path(), utc(CREATED_UTC));
    builder.add_control(conflicting_control()).unwrap();
    let bundle = finish_with_window(builder, None);

    // jrc_tmf documents integrity and outranks hansen_gfc.
    assert_eq!(bundle.status(), Status::Fail);
    let control = &bundle.outcome().controls[0];
    let resolution = control.resolution.as_ref().unwrap();
    assert_eq!(resolution.selected_source, "jrc_tmf");
    assert_eq!(resolution.decision_ref, format!("conflict/{CONTROL_ID}"));
    assert_eq!(bundle.decisions().len(), 1);
    assert_eq!(bundle.decisions()[0].kind, DecisionKind::ConflictResolved);
    assert!(bundle
        .outcome()
        .reasons
        .contains(&format!("{CONTROL_ID}: loss detected in 2022")));

    let written = BundleWriter::new(EvidenceRoot::new(root.path()))
        .write(&bundle)
        .unwrap();
    let report = verify_bundle_dir(&written.dir);
    assert!(report.passed(), "{report}");
}

#[test]
fn fresh_source_outranks_stronger_stale_source() {
    let src = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    write_sources(src.path());

    let mut builder = sample_builder(src.path(), utc(CREATED_UTC));
    builder.add_control(conflicting_control()).unwrap();
    // hansen_gfc is 11 days old and passes; jrc_tmf documents integrity but
    // is 21 days old, outside a 15-day window, and fails.
    let bundle = finish_with_window(builder, Some(15));

    assert_eq!(bundle.status(), Status::Pass);
    assert!(bundle.outcome().reasons.is_empty());
    let resolution = bundle.outcome().controls[0].resolution.as_ref().unwrap();
    assert_eq!(resolution.selected_source, "hansen_gfc");

    let written = BundleWriter::new(EvidenceRoot::new(root.path()))
        .write(&bundle)
        .unwrap();
    let decisions = read_json(&written.dir.join(DECISIONS_PATH));
    let decision = &decisions["decisions"][0];
    assert_eq!(decision["kind"], "conflict_resolved");
    assert_eq!(decision["selected"], "hansen_gfc");
    assert_eq!(decision["rejected"][0]["source"], "jrc_tmf");
    assert!(decision["rejected"][0]["reason"]
        .as_str()
        .unwrap()
        .starts_with("stale: 21 days old, window 15 days"));
    assert!(verify_bundle_dir(&written.dir).passed());
}

// ---------------------------------------------------------------------------
// Generated documents as evidence
// ---------------------------------------------------------------------------

#[test]
fn control_citing_parameters_document_passes_and_verifies() {
    let src = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    write_sources(src.path());

    let mut builder = sample_builder(src.path(), utc(CREATED_UTC));
    builder
        .add_control(ControlResult {
            evidence_refs: vec![PARAMETERS_PATH.into(), SUMMARY_PATH.into()],
            dependency_refs: vec!["hansen_gfc".into()],
            ..ControlResult::new("inputs_recorded", Status::Pass)
        })
        .unwrap();
    let bundle = finish(builder);
    assert_eq!(bundle.status(), Status::Pass, "{:?}", bundle.outcome().reasons);

    let written = BundleWriter::new(EvidenceRoot::new(root.path()))
        .write(&bundle)
        .unwrap();
    let report = verify_bundle_dir(&written.dir);
    assert!(report.passed(), "{report}");
    let summary = read_json(&written.dir.join(SUMMARY_PATH));
    assert_eq!(summary["status"], "PASS");
}

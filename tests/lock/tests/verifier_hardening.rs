//! Verifier hardening: every malformed bundle becomes a failed check with
//! details, never a panic or an error return.

use std::path::Path;

use evidence_harness::bundle::{HASH_LIST_PATH, MANIFEST_PATH};
use evidence_harness::verify::{
    verify_bundle_dir, BundleState, BundleVerifier, VerificationReport, CHECK_HASH_RECOMPUTATION,
    CHECK_LAYOUT, CHECK_MANIFEST_PARSE, CHECK_PATH_SAFETY, CHECK_PROVENANCE, CHECK_RERUN,
    CHECK_TRACEABILITY,
};
use evidence_kernel::proof::canon::canonical_json_pretty;
use lock_tests::bundle_test_helpers::{
    append, tamper, write_sample, write_sources, CREATED_UTC, LATER_CREATED_UTC, OVERLAY_FILE,
};

fn written_sample() -> (tempfile::TempDir, tempfile::TempDir, std::path::PathBuf) {
    let src = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    write_sources(src.path());
    let dir = write_sample(src.path(), root.path(), CREATED_UTC).dir;
    (src, root, dir)
}

fn failed_details<'a>(report: &'a VerificationReport, check: &str) -> &'a [String] {
    let result = report
        .check(check)
        .unwrap_or_else(|| panic!("check {check} missing from report"));
    assert!(!result.passed, "{check} unexpectedly passed:\n{report}");
    &result.details
}

fn rewrite_manifest(dir: &Path, edit: impl FnOnce(&mut serde_json::Value)) {
    let path = dir.join(MANIFEST_PATH);
    let mut manifest: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    edit(&mut manifest);
    std::fs::write(path, canonical_json_pretty(&manifest).unwrap()).unwrap();
}

// ---------------------------------------------------------------------------
// Missing and garbage input
// ---------------------------------------------------------------------------

#[test]
fn missing_directory_fails_every_check_without_panicking() {
    let root = tempfile::tempdir().unwrap();
    let report = verify_bundle_dir(&root.path().join("absent"));
    assert!(!report.passed());
    assert_eq!(report.state, BundleState::Incomplete);
    assert!(failed_details(&report, CHECK_LAYOUT)[0].contains("bundle directory missing"));
    failed_details(&report, CHECK_MANIFEST_PARSE);
    failed_details(&report, CHECK_HASH_RECOMPUTATION);
}

#[test]
fn garbage_directory_fails_without_panicking() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(MANIFEST_PATH), b"\x00\xffnot json").unwrap();
    std::fs::write(dir.path().join(HASH_LIST_PATH), b"zz  ../../etc/passwd").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

    let report = verify_bundle_dir(dir.path());
    assert!(!report.passed());
    assert_eq!(report.state, BundleState::Finalized);
    let layout = failed_details(&report, CHECK_LAYOUT);
    assert!(layout.iter().any(|d| d == "unexpected entry notes.txt"));
    assert!(layout.iter().any(|d| d == "missing directory inputs/"));
    assert!(failed_details(&report, CHECK_MANIFEST_PARSE)[0].contains("not valid JSON"));
    failed_details(&report, CHECK_HASH_RECOMPUTATION);
    failed_details(&report, CHECK_PROVENANCE);
    failed_details(&report, CHECK_TRACEABILITY);
}

#[test]
fn report_renders_as_json() {
    let root = tempfile::tempdir().unwrap();
    let report = verify_bundle_dir(&root.path().join("absent"));
    let json = report.to_json();
    assert_eq!(json["passed"], false);
    assert_eq!(json["state"], "incomplete");
    assert_eq!(json["checks"][0]["name"], CHECK_LAYOUT);
}

// ---------------------------------------------------------------------------
// Incomplete bundles
// ---------------------------------------------------------------------------

#[test]
fn missing_hash_list_is_reported_as_incomplete() {
    let (_src, _root, dir) = written_sample();
    std::fs::remove_file(dir.join(HASH_LIST_PATH)).unwrap();

    let report = verify_bundle_dir(&dir);
    assert_eq!(report.state, BundleState::Incomplete);
    assert!(!report.passed());
    assert!(failed_details(&report, CHECK_LAYOUT)
        .iter()
        .any(|d| d.contains("not finalized")));
}

#[test]
fn missing_artifact_is_named() {
    let (_src, _root, dir) = written_sample();
    std::fs::remove_file(dir.join("outputs/overlay.csv")).unwrap();

    let report = verify_bundle_dir(&dir);
    let details = failed_details(&report, CHECK_HASH_RECOMPUTATION);
    assert!(
        details
            .iter()
            .any(|d| d == "outputs/overlay.csv: listed in hashes.sha256 but missing"),
        "{details:?}"
    );
    // The control cites the missing file, but the manifest still lists it.
    assert!(report.check(CHECK_TRACEABILITY).unwrap().passed, "{report}");
}

// ---------------------------------------------------------------------------
// Undeclared and unsafe entries
// ---------------------------------------------------------------------------

#[test]
fn undeclared_file_fails_hash_recomputation() {
    let (_src, _root, dir) = written_sample();
    std::fs::write(dir.join("outputs/extra.txt"), b"sneaked in").unwrap();

    let report = verify_bundle_dir(&dir);
    let details = failed_details(&report, CHECK_HASH_RECOMPUTATION);
    assert_eq!(details, ["outputs/extra.txt: undeclared file"]);
    assert!(report.check(CHECK_LAYOUT).unwrap().passed, "{report}");
}

#[test]
fn unexpected_top_level_entry_fails_layout() {
    let (_src, _root, dir) = written_sample();
    std::fs::write(dir.join("README"), b"hi").unwrap();

    let report = verify_bundle_dir(&dir);
    assert!(failed_details(&report, CHECK_LAYOUT)
        .iter()
        .any(|d| d == "unexpected entry README"));
}

#[test]
fn traversal_in_hash_list_fails_path_safety() {
    let (_src, _root, dir) = written_sample();
    append(
        &dir,
        HASH_LIST_PATH,
        format!("{}  ../outside.txt\n", "0".repeat(64)).as_bytes(),
    );

    let report = verify_bundle_dir(&dir);
    let details = failed_details(&report, CHECK_PATH_SAFETY);
    assert_eq!(details.len(), 1, "{details:?}");
    assert!(details[0].starts_with("hashes.sha256 line 9:"), "{details:?}");
    failed_details(&report, CHECK_HASH_RECOMPUTATION);
}

#[test]
fn absolute_manifest_path_fails_path_safety() {
    let (_src, _root, dir) = written_sample();
    rewrite_manifest(&dir, |m| {
        m["artifacts"][0]["path"] = serde_json::json!("/etc/passwd");
    });

    let report = verify_bundle_dir(&dir);
    assert!(failed_details(&report, CHECK_PATH_SAFETY)
        .iter()
        .any(|d| d.starts_with("/etc/passwd:")));
}

#[cfg(unix)]
#[test]
fn symlink_out_of_bundle_fails_path_safety() {
    let (_src, _root, dir) = written_sample();
    let outside = tempfile::tempdir().unwrap();
    let target = outside.path().join("secret.txt");
    std::fs::write(&target, b"secret").unwrap();
    std::os::unix::fs::symlink(&target, dir.join("outputs/link.txt")).unwrap();

    let report = verify_bundle_dir(&dir);
    assert_eq!(
        failed_details(&report, CHECK_PATH_SAFETY),
        ["outputs/link.txt: resolves outside the bundle"]
    );
}

// ---------------------------------------------------------------------------
// Manifest content
// ---------------------------------------------------------------------------

#[test]
fn non_canonical_manifest_fails_manifest_parse() {
    let (_src, _root, dir) = written_sample();
    let path = dir.join(MANIFEST_PATH);
    let manifest: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    std::fs::write(&path, serde_json::to_vec(&manifest).unwrap()).unwrap();

    let report = verify_bundle_dir(&dir);
    assert_eq!(
        failed_details(&report, CHECK_MANIFEST_PARSE),
        ["manifest.json is not in canonical form"]
    );
}

#[test]
fn manifest_missing_field_fails_manifest_parse() {
    let (_src, _root, dir) = written_sample();
    rewrite_manifest(&dir, |m| {
        m.as_object_mut().unwrap().remove("producer");
    });

    let report = verify_bundle_dir(&dir);
    assert!(failed_details(&report, CHECK_MANIFEST_PARSE)
        .iter()
        .any(|d| d == "missing field producer"));
}

#[test]
fn stripped_provenance_fails_completeness() {
    let (_src, _root, dir) = written_sample();
    rewrite_manifest(&dir, |m| {
        m["dependencies"][0]["retrieval_method"] = serde_json::Value::Null;
    });

    let report = verify_bundle_dir(&dir);
    let details = failed_details(&report, CHECK_PROVENANCE);
    assert!(details
        .iter()
        .any(|d| d == "dependency hansen_gfc@v1.11: retrieval_method: missing"));
    assert!(details
        .iter()
        .any(|d| d.contains("disagrees with manifest dependencies")));
}

#[test]
fn unknown_evidence_ref_fails_traceability() {
    let (_src, _root, dir) = written_sample();
    rewrite_manifest(&dir, |m| {
        m["outcome"]["controls"][0]["evidence_refs"] =
            serde_json::json!(["outputs/never_written.tif"]);
    });

    let report = verify_bundle_dir(&dir);
    assert!(failed_details(&report, CHECK_TRACEABILITY)
        .iter()
        .any(|d| d.contains("outputs/never_written.tif is not a manifest artifact")));
}

#[test]
fn summary_disagreeing_with_manifest_fails_traceability() {
    let (_src, _root, dir) = written_sample();
    rewrite_manifest(&dir, |m| {
        m["outcome"]["status"] = serde_json::json!("FAIL");
        m["outcome"]["reasons"] = serde_json::json!(["deforestation_free: edited"]);
    });

    let report = verify_bundle_dir(&dir);
    assert!(failed_details(&report, CHECK_TRACEABILITY)
        .iter()
        .any(|d| d.contains("status disagrees with manifest outcome")));
}

// ---------------------------------------------------------------------------
// Rerun equivalence
// ---------------------------------------------------------------------------

#[test]
fn rerun_differing_only_in_created_utc_is_equivalent() {
    let src = tempfile::tempdir().unwrap();
    let first_root = tempfile::tempdir().unwrap();
    let second_root = tempfile::tempdir().unwrap();
    write_sources(src.path());
    let first = write_sample(src.path(), first_root.path(), CREATED_UTC);
    let second = write_sample(src.path(), second_root.path(), LATER_CREATED_UTC);

    assert_ne!(
        std::fs::read(first.dir.join(MANIFEST_PATH)).unwrap(),
        std::fs::read(second.dir.join(MANIFEST_PATH)).unwrap()
    );
    assert_eq!(
        std::fs::read(first.dir.join(HASH_LIST_PATH)).unwrap(),
        std::fs::read(second.dir.join(HASH_LIST_PATH)).unwrap()
    );

    let report = BundleVerifier::new()
        .with_baseline(&first.dir)
        .require_rerun_equivalence(true)
        .verify(&second.dir);
    assert!(report.passed(), "{report}");
    assert!(report.check(CHECK_RERUN).unwrap().passed);
}

#[test]
fn rerun_with_changed_output_is_not_equivalent() {
    let src = tempfile::tempdir().unwrap();
    let first_root = tempfile::tempdir().unwrap();
    let second_root = tempfile::tempdir().unwrap();
    write_sources(src.path());
    let first = write_sample(src.path(), first_root.path(), CREATED_UTC);
    std::fs::write(src.path().join(OVERLAY_FILE), b"pixel,loss_year\n1042,2021\n").unwrap();
    let second = write_sample(src.path(), second_root.path(), CREATED_UTC);

    // Advisory by default: reported, verdict unaffected.
    let advisory = BundleVerifier::new()
        .with_baseline(&first.dir)
        .verify(&second.dir);
    assert!(advisory.passed(), "{advisory}");
    let check = advisory.check(CHECK_RERUN).unwrap();
    assert!(check.advisory);
    assert!(!check.passed);
    assert!(check
        .details
        .iter()
        .any(|d| d == "outputs/overlay.csv: content differs"));

    let required = BundleVerifier::new()
        .with_baseline(&first.dir)
        .require_rerun_equivalence(true)
        .verify(&second.dir);
    assert!(!required.passed());
}

#[test]
fn required_rerun_without_baseline_fails() {
    let (_src, _root, dir) = written_sample();
    let report = BundleVerifier::new()
        .require_rerun_equivalence(true)
        .verify(&dir);
    assert!(!report.passed());
    failed_details(&report, CHECK_RERUN);
}

#[test]
fn tampered_file_is_reported_with_its_path() {
    let (_src, _root, dir) = written_sample();
    tamper(&dir, "outputs/overlay.csv", b"edited");
    let report = verify_bundle_dir(&dir);
    let details = failed_details(&report, CHECK_HASH_RECOMPUTATION);
    assert!(details.iter().all(|d| d.starts_with("outputs/overlay.csv:")));
    assert_eq!(report.failures().count(), 1, "{report}");
}

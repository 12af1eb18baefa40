//! Determinism locks: identical inputs give identical bytes, regardless of
//! the order in which a caller assembles the bundle.
//!
//! Golden values here are plain `sha256sum` digests of the fixture bytes.
//! Changing any of them is a format break.

use std::collections::BTreeSet;
use std::path::Path;

use evidence_harness::bundle::{
    ArtifactSource, BundleBuilder, InputValue, GEOMETRY_INPUT, HASH_LIST_PATH, MANIFEST_PATH,
    PARAMETERS_PATH,
};
use evidence_harness::bundle_dir::{list_bundle_files, BundleWriter};
use evidence_harness::config::EvidenceRoot;
use evidence_harness::contract::ArtifactRole;
use evidence_kernel::proof::hash::hash_bytes;
use evidence_kernel::proof::hash_list::parse_hash_list;
use lock_tests::bundle_test_helpers::{
    finish, passing_control, producer, sample_bundle_id, sample_dependencies, utc, write_sample,
    write_sources, CREATED_UTC, GEOMETRY, GEOMETRY_FILE, OVERLAY, OVERLAY_FILE,
};

const GEOMETRY_SHA256: &str = "2b389a86f13d97c7aebba21c6ebe12f564a4907923201a23f6fd3fb5a4a19fa4";
const OVERLAY_SHA256: &str = "0cbe180bb17443f74158166950b68b95adf66f629c154e19eb33a5d65c1c4aca";
const PARAMETERS_SHA256: &str = "624e8d8b54a92787c75279573139a44dbaf4c606104b0b8f132649f4543a947a";

const PARAMETERS_JSON: &str = r#"{
  "commodity": "cattle",
  "from_date": "2024-01-01",
  "geometry": {
    "content_type": "application/geo+json",
    "path": "inputs/geometry.geojson",
    "sha256": "2b389a86f13d97c7aebba21c6ebe12f564a4907923201a23f6fd3fb5a4a19fa4",
    "size_bytes": 88
  },
  "min_area_ha": 0.5,
  "to_date": "2024-03-31"
}
"#;

fn read_tree(dir: &Path) -> Vec<(String, Vec<u8>)> {
    list_bundle_files(dir)
        .unwrap()
        .into_iter()
        .map(|rel| {
            let bytes = std::fs::read(dir.join(&rel)).unwrap();
            (rel, bytes)
        })
        .collect()
}

#[test]
fn bundle_id_is_locked() {
    assert_eq!(hash_bytes(GEOMETRY).as_str(), GEOMETRY_SHA256);
    assert_eq!(sample_bundle_id(), "dmi_2b389a86f13d_2024-01-01_2024-03-31");
}

#[test]
fn parameters_document_is_locked() {
    let src = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    write_sources(src.path());
    let written = write_sample(src.path(), root.path(), CREATED_UTC);

    let bytes = std::fs::read(written.dir.join(PARAMETERS_PATH)).unwrap();
    assert_eq!(String::from_utf8(bytes.clone()).unwrap(), PARAMETERS_JSON);
    assert_eq!(hash_bytes(&bytes).as_str(), PARAMETERS_SHA256);
}

#[test]
fn hash_list_is_locked() {
    let src = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    write_sources(src.path());
    let written = write_sample(src.path(), root.path(), CREATED_UTC);

    let text = std::fs::read_to_string(written.dir.join(HASH_LIST_PATH)).unwrap();
    assert!(text.ends_with('\n') && !text.contains('\r') && !text.ends_with("\n\n"));

    let entries = parse_hash_list(&text).unwrap();
    let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(
        paths,
        [
            "inputs/geometry.geojson",
            "inputs/parameters.json",
            "logs/run.log",
            "method/decisions_applied.json",
            "method/method_version.json",
            "outputs/overlay.csv",
            "outputs/summary.json",
            "provenance/provenance.json",
        ]
    );
    assert!(!paths.contains(&MANIFEST_PATH));

    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], format!("{GEOMETRY_SHA256}  inputs/geometry.geojson"));
    assert_eq!(lines[1], format!("{PARAMETERS_SHA256}  inputs/parameters.json"));
    assert_eq!(lines[5], format!("{OVERLAY_SHA256}  outputs/overlay.csv"));
}

#[test]
fn construction_order_does_not_change_bytes() {
    let src = tempfile::tempdir().unwrap();
    let forward_root = tempfile::tempdir().unwrap();
    let reverse_root = tempfile::tempdir().unwrap();
    write_sources(src.path());

    let forward = write_sample(src.path(), forward_root.path(), CREATED_UTC);

    // Same run, assembled back to front.
    let mut builder =
        BundleBuilder::new(sample_bundle_id(), producer(), utc(CREATED_UTC)).unwrap();
    let mut control = passing_control();
    control.evidence_refs.reverse();
    control.dependency_refs.reverse();
    builder.add_control(control).unwrap();
    builder
        .add_artifact(
            "outputs/overlay.csv",
            ArtifactSource::Bytes(OVERLAY.to_vec()),
            ArtifactRole::Output,
            "text/csv",
        )
        .unwrap();
    for dep in sample_dependencies().into_iter().rev() {
        builder.add_dependency(dep).unwrap();
    }
    builder
        .add_input("min_area_ha", InputValue::Float(0.5))
        .unwrap();
    builder
        .add_input("to_date", InputValue::Text("2024-03-31".into()))
        .unwrap();
    builder
        .add_input("from_date", InputValue::Text("2024-01-01".into()))
        .unwrap();
    builder
        .add_input("commodity", InputValue::Text("cattle".into()))
        .unwrap();
    builder
        .add_input(
            GEOMETRY_INPUT,
            InputValue::File {
                path: src.path().join(GEOMETRY_FILE),
                content_type: "application/geo+json".into(),
            },
        )
        .unwrap();
    let reverse = BundleWriter::new(EvidenceRoot::new(reverse_root.path()))
        .write(&finish(builder))
        .unwrap();

    assert_eq!(read_tree(&forward.dir), read_tree(&reverse.dir));
}

#[test]
fn float_noise_is_absorbed_by_canonical_rounding() {
    let src = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    write_sources(src.path());

    let mut builder =
        BundleBuilder::new(sample_bundle_id(), producer(), utc(CREATED_UTC)).unwrap();
    builder
        .add_input(
            GEOMETRY_INPUT,
            InputValue::File {
                path: src.path().join(GEOMETRY_FILE),
                content_type: "application/geo+json".into(),
            },
        )
        .unwrap();
    builder
        .add_input("commodity", InputValue::Text("cattle".into()))
        .unwrap();
    builder
        .add_input("from_date", InputValue::Text("2024-01-01".into()))
        .unwrap();
    builder
        .add_input("to_date", InputValue::Text("2024-03-31".into()))
        .unwrap();
    // Noise below the sixth decimal place.
    builder
        .add_input("min_area_ha", InputValue::Float(0.5 + 1e-9))
        .unwrap();
    for dep in sample_dependencies() {
        builder.add_dependency(dep).unwrap();
    }
    builder
        .add_artifact(
            "outputs/overlay.csv",
            ArtifactSource::File(src.path().join(OVERLAY_FILE)),
            ArtifactRole::Output,
            "text/csv",
        )
        .unwrap();
    builder.add_control(passing_control()).unwrap();
    let written = BundleWriter::new(EvidenceRoot::new(root.path()))
        .write(&finish(builder))
        .unwrap();

    let bytes = std::fs::read(written.dir.join(PARAMETERS_PATH)).unwrap();
    assert_eq!(hash_bytes(&bytes).as_str(), PARAMETERS_SHA256);
}

#[test]
fn duplicate_reasons_and_refs_collapse() {
    let mut noisy = passing_control();
    noisy.evidence_refs.extend(noisy.evidence_refs.clone());
    noisy.dependency_refs.push("hansen_gfc".into());
    let normalized = noisy.normalized();
    assert_eq!(normalized, passing_control().normalized());

    let unique: BTreeSet<&String> = normalized.evidence_refs.iter().collect();
    assert_eq!(unique.len(), normalized.evidence_refs.len());
}

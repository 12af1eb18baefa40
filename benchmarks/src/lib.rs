//! Shared helpers for evidence benchmark suites.
//!
//! # Panics
//!
//! Helpers panic on I/O or build errors. Benchmark setup failures are fatal.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use evidence_harness::bundle::{
    ArtifactSource, Bundle, BundleBuilder, InputValue, GEOMETRY_INPUT,
};
use evidence_harness::contract::{
    parse_utc, ArtifactRole, ControlResult, DependencyRecord, Producer, Status,
};
use evidence_harness::policy::{build_policy, PolicyConfig};
use serde_json::{json, Value};

pub const CREATED_UTC: &str = "2024-05-02T09:30:00Z";
pub const AS_OF_UTC: &str = "2024-05-01T00:00:00Z";

#[must_use]
pub fn utc(raw: &str) -> DateTime<Utc> {
    parse_utc(raw).unwrap()
}

/// Deterministic pseudo-random bytes (xorshift), so inputs do not compress
/// into trivially cacheable patterns.
#[must_use]
pub fn payload(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state.to_le_bytes()[0]
        })
        .collect()
}

/// Write `count` files of `size` bytes under `dir`.
#[must_use]
pub fn write_payload_files(dir: &Path, count: usize, size: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|i| {
            let path = dir.join(format!("tile_{i:04}.bin"));
            std::fs::write(&path, payload(size, i as u64 + 1)).unwrap();
            path
        })
        .collect()
}

/// A provenance-shaped document with `records` dependency rows.
#[must_use]
pub fn provenance_document(records: usize) -> Value {
    let rows: Vec<Value> = (0..records)
        .map(|i| {
            json!({
                "catalogue_id": format!("source_{i:05}"),
                "dataset_or_service": "synthetic layer",
                "retrieval_method": "https_download",
                "role": "primary",
                "source_timestamp_utc": "2024-04-20T00:00:00Z",
                "version": format!("v{}.{}", i / 10, i % 10),
                "coverage_ratio": (i as f64) / 7.0,
            })
        })
        .collect();
    json!({ "dependencies": rows, "schema_version": "evidence_bundle.v1" })
}

/// Finalize a PASS bundle whose outputs are the given files.
///
/// `geometry` must exist; every entry in `outputs` becomes `outputs/<name>`.
#[must_use]
pub fn build_bundle(geometry: &Path, outputs: &[PathBuf]) -> Bundle {
    let mut builder = BundleBuilder::new(
        "bench_0123456789ab_2024-01-01_2024-03-31",
        Producer::new("evidence-bench", "0.1.0"),
        utc(CREATED_UTC),
    )
    .unwrap();
    builder
        .add_input(
            GEOMETRY_INPUT,
            InputValue::File {
                path: geometry.to_path_buf(),
                content_type: "application/geo+json".into(),
            },
        )
        .unwrap();
    builder
        .add_input("commodity", InputValue::Text("cocoa".into()))
        .unwrap();
    builder
        .add_dependency(DependencyRecord {
            version: Some("v1.11".into()),
            source_timestamp_utc: Some(utc("2024-04-20T00:00:00Z")),
            retrieval_method: Some("https_download".into()),
            ..DependencyRecord::new("hansen_gfc", "Global Forest Change")
        })
        .unwrap();

    let mut refs = Vec::with_capacity(outputs.len());
    for path in outputs {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("output.bin");
        let dest = format!("outputs/{name}");
        builder
            .add_artifact(
                &dest,
                ArtifactSource::File(path.clone()),
                ArtifactRole::Output,
                "application/octet-stream",
            )
            .unwrap();
        refs.push(dest);
    }
    builder
        .add_control(ControlResult {
            evidence_refs: refs,
            dependency_refs: vec!["hansen_gfc".into()],
            ..ControlResult::new("deforestation_free", Status::Pass)
        })
        .unwrap();

    let policy = build_policy(&PolicyConfig::default());
    let evaluation = builder.evaluate(&policy, utc(AS_OF_UTC));
    builder.finalize(evaluation).unwrap()
}

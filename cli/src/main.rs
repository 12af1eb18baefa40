//! `evidence`: produce and verify deterministic evidence bundles.
//!
//! Exit codes: `0` success, `1` verification failed (or a non-PASS outcome
//! under `--strict`), `2` usage or structural error.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, SubsecRound, Utc};
use clap::{Args, Parser, Subcommand};
use evidence_harness::bundle_dir::BundleWriter;
use evidence_harness::config::{EvidenceRoot, EVIDENCE_ROOT_ENV};
use evidence_harness::contract::{parse_utc, Status};
use evidence_harness::runner::{self, RunSpec};
use evidence_harness::verify::{rerun_equivalence, BundleVerifier};
use evidence_kernel::proof::hash::hash_files;
use serde_json::json;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const EXIT_FAILED: u8 = 1;
const EXIT_STRUCTURAL: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "evidence", version, about = "Deterministic evidence bundles")]
struct Cli {
    /// Log filter (`RUST_LOG` syntax); overrides `RUST_LOG`. Logs go to stderr
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build, evaluate and write a bundle from a run spec
    Run(RunArgs),
    /// Verify a bundle directory
    Verify(VerifyArgs),
    /// Compare two bundles for rerun equivalence
    Diff(DiffArgs),
    /// Print sha256sum-style digests of files
    Hash(HashArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Path to the run spec (JSON); relative input paths resolve against its directory
    #[arg(long, value_name = "PATH")]
    spec: PathBuf,

    /// Evidence root; overrides the environment and the default
    #[arg(long, value_name = "DIR")]
    evidence_root: Option<PathBuf>,

    /// Bundle creation time (RFC 3339); overrides the run spec, defaults to now
    #[arg(long, value_name = "TS")]
    created_utc: Option<String>,

    /// Freshness window in days; overrides the run spec
    #[arg(long, value_name = "N")]
    freshness_days: Option<u32>,

    /// Exit 1 unless the outcome is PASS
    #[arg(long)]
    strict: bool,

    /// Print a JSON summary instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct VerifyArgs {
    /// Bundle directory
    #[arg(value_name = "DIR", required_unless_present = "bundle_id")]
    bundle_dir: Option<PathBuf>,

    /// Locate the bundle by id under the evidence root (with --date)
    #[arg(long, requires = "date", conflicts_with = "bundle_dir")]
    bundle_id: Option<String>,

    /// Run date (YYYY-MM-DD) of the bundle located by --bundle-id
    #[arg(long, requires = "bundle_id")]
    date: Option<String>,

    /// Evidence root used with --bundle-id
    #[arg(long, value_name = "DIR")]
    evidence_root: Option<PathBuf>,

    /// Prior run of the same inputs to compare against
    #[arg(long, value_name = "DIR")]
    baseline: Option<PathBuf>,

    /// Fail verification unless the bundle is rerun-equivalent to --baseline
    #[arg(long)]
    require_rerun: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct DiffArgs {
    /// First bundle directory
    left: PathBuf,
    /// Second bundle directory
    right: PathBuf,
}

#[derive(Args, Debug)]
struct HashArgs {
    /// Files to hash
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(level).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    }
    .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let result = match cli.command {
        Commands::Run(args) => cmd_run(&args),
        Commands::Verify(args) => cmd_verify(&args),
        Commands::Diff(args) => cmd_diff(&args),
        Commands::Hash(args) => cmd_hash(&args),
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_STRUCTURAL)
        }
    }
}

/// Flag, then `EUDR_DMI_EVIDENCE_ROOT`, then `<cwd>/audit/evidence`.
fn resolve_root(flag: Option<&Path>) -> Result<EvidenceRoot> {
    let repo_root = std::env::current_dir().context("resolving working directory")?;
    let from_env = std::env::var_os(EVIDENCE_ROOT_ENV).map(PathBuf::from);
    let override_path = flag.map(Path::to_path_buf).or(from_env);
    Ok(EvidenceRoot::resolve(override_path.as_deref(), &repo_root))
}

fn cmd_run(args: &RunArgs) -> Result<ExitCode> {
    let raw = std::fs::read_to_string(&args.spec)
        .with_context(|| format!("reading run spec {}", args.spec.display()))?;
    let mut spec: RunSpec = serde_json::from_str(&raw)
        .with_context(|| format!("parsing run spec {}", args.spec.display()))?;
    if args.freshness_days.is_some() {
        spec.freshness_window_days = args.freshness_days;
    }
    let base_dir = args.spec.parent().unwrap_or_else(|| Path::new("."));

    let created_utc = match &args.created_utc {
        Some(raw) => parse_utc(raw).with_context(|| format!("--created-utc {raw:?}"))?,
        None => spec
            .created_utc
            .unwrap_or_else(|| Utc::now().trunc_subsecs(0)),
    };
    let root = resolve_root(args.evidence_root.as_deref())?;
    tracing::info!(root = %root.path().display(), "evidence root resolved");

    let report = runner::run(&spec, base_dir, created_utc, &BundleWriter::new(root))?;
    if args.json {
        let summary = json!({
            "bundle_dir": report.path.dir.display().to_string(),
            "bundle_id": report.bundle_id,
            "status": report.status.as_str(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "{} {} {}",
            report.status,
            report.bundle_id,
            report.path.dir.display()
        );
    }

    if args.strict && report.status != Status::Pass {
        return Ok(ExitCode::from(EXIT_FAILED));
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_verify(args: &VerifyArgs) -> Result<ExitCode> {
    let dir = match (&args.bundle_dir, &args.bundle_id, &args.date) {
        (Some(dir), _, _) => dir.clone(),
        (None, Some(id), Some(date)) => {
            let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .with_context(|| format!("--date {date:?}"))?;
            resolve_root(args.evidence_root.as_deref())?.bundle_dir(date, id)
        }
        _ => return Err(anyhow!("give a bundle directory or --bundle-id with --date")),
    };

    let mut verifier = BundleVerifier::new().require_rerun_equivalence(args.require_rerun);
    if let Some(baseline) = &args.baseline {
        verifier = verifier.with_baseline(baseline);
    }
    let report = verifier.verify(&dir);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report.to_json())?);
    } else {
        println!("{report}");
    }
    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FAILED)
    })
}

fn cmd_diff(args: &DiffArgs) -> Result<ExitCode> {
    for dir in [&args.left, &args.right] {
        if !dir.is_dir() {
            return Err(anyhow!("not a directory: {}", dir.display()));
        }
    }
    let check = rerun_equivalence(&args.left, &args.right);
    if check.passed {
        println!("equivalent (created_utc ignored)");
        return Ok(ExitCode::SUCCESS);
    }
    for detail in &check.details {
        println!("{detail}");
    }
    Ok(ExitCode::from(EXIT_FAILED))
}

fn cmd_hash(args: &HashArgs) -> Result<ExitCode> {
    for (path, result) in args.files.iter().zip(hash_files(&args.files)) {
        let digest = result?;
        println!("{}  {}", digest.sha256, path.display());
    }
    Ok(ExitCode::SUCCESS)
}

//! Evidence Harness: build, evaluate, write and verify evidence bundles.
//!
//! The harness turns collaborator output (dependency records, control
//! results, artifacts) into a self-contained bundle directory, and verifies
//! such directories independently of the process that wrote them.
//!
//! The harness does NOT hash or canonicalize on its own; it delegates to the
//! kernel. It never reads the clock or the environment: timestamps and the
//! evidence root are always passed in.
//!
//! # Flow
//!
//! ```text
//! runner::build ─► bundle::BundleBuilder ─► outcome::evaluate
//!                        │ finalize
//!                        ▼
//!                  bundle::Bundle ─► bundle_dir::BundleWriter ─► disk
//!                                                                 │
//!                                        verify::BundleVerifier ◄─┘
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod bundle;
pub mod bundle_dir;
pub mod config;
pub mod contract;
pub mod manifest;
pub mod outcome;
pub mod policy;
pub mod runner;
pub mod verify;

//! Evidence Kernel: the deterministic core shared by bundle producers and verifiers.
//!
//! # API Surface
//!
//! - [`proof::canon`] -- canonical JSON bytes (the single serializer-for-hashing)
//! - [`proof::hash`] -- SHA-256 content hashing of bytes and files
//! - [`proof::hash_list`] -- the `hashes.sha256` flat list codec
//! - [`proof::path`] -- bundle-relative path validation and containment
//!
//! # Module Dependency Direction
//!
//! `path` ← `hash_list`; `canon` and `hash` depend on nothing internal.
//!
//! The kernel never reads the clock or the environment. Everything it emits is
//! a function of its arguments.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod proof;

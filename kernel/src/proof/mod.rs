//! Proof module: canonical serialization, content hashing, hash lists, path safety.
//!
//! Nothing in here knows what a bundle is. The harness composes these pieces.

pub mod canon;
pub mod hash;
pub mod hash_list;
pub mod path;

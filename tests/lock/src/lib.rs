//! Lock tests for the evidence bundle pipeline.
//!
//! The library half only carries shared fixtures; the tests live in `tests/`.

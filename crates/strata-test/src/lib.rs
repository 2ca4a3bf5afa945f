//! Strata Test Harness - Reconciliation engine validation
//!
//! This crate provides:
//! - A recording engine adapter with scripted providers
//! - Scenario runs with invariant checks
//! - Randomized render fuzzing

pub mod fuzzer;
pub mod harness;
pub mod recording;

pub use fuzzer::*;
pub use harness::*;
pub use recording::*;

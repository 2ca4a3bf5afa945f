//! Strata Engine - Layer reconciliation
//!
//! This crate implements the reconciliation engine that keeps a rendering
//! engine's layers in step with a declared layer collection:
//! - Declaration merging with option defaults
//! - Per-record reconciliation: no-op, in-place update, or materialization
//! - One cancellable materialization per layer id, superseded on re-render
//! - Aggregate settlement where one failed layer never cancels another
//! - The adapter contract and its capability check

pub mod adapter;
pub mod capability;
pub mod config;
pub mod reconcile;
pub mod report;
mod slot;

pub use adapter::*;
pub use capability::*;
pub use config::*;
pub use reconcile::*;
pub use report::*;

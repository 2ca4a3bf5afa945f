//! Strata Ops - Cancellable asynchronous work
//!
//! This crate provides the cancellation primitive the reconciliation engine
//! tracks per layer, plus the fetch client provider routines use to load
//! remote layer data:
//! - CancellableOperation: spawned work with an explicit cancel signal
//! - OnCancel: cleanup registration handed to the work function
//! - FetchClient: `get`/`post` returning cancellable operations (feature `http`)

pub mod error;
pub mod operation;

#[cfg(feature = "http")]
pub mod fetch;

pub use error::*;
#[cfg(feature = "http")]
pub use fetch::*;
pub use operation::*;

//! Strata Core - Layer data model
//!
//! This crate defines the data the reconciliation engine consumes:
//! - Identifiers and selectors (LayerId, LayerSelector)
//! - Declared layers and the options that fill their defaults
//! - Resolved layer attributes and event bindings
//! - Layer records with applied-state tracking and derived change sets
//! - The error taxonomy shared by every strata crate

pub mod attributes;
pub mod change;
pub mod error;
pub mod id;
pub mod record;

pub use attributes::*;
pub use change::*;
pub use error::*;
pub use id::*;
pub use record::*;

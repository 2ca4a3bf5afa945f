//! Error types for strata

use thiserror::Error;

use crate::LayerId;

/// Layer lifecycle errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayerError {
    // Caller usage errors
    #[error("Invalid layer declaration: {0}")]
    InvalidDeclaration(String),

    #[error("Can't find layers: {0:?}")]
    NotFound(Vec<LayerId>),

    // Per-layer materialization errors
    #[error("{0} provider is not yet supported")]
    ProviderUnsupported(String),

    #[error("Layer construction failed: {0}")]
    ConstructionFailed(String),

    // Adapter errors
    #[error("Adapter is missing required capabilities: {0}")]
    AdapterContract(String),

    #[error("Adapter call failed: {0}")]
    AdapterFailed(String),
}

/// Result type for strata operations
pub type LayerResult<T> = Result<T, LayerError>;

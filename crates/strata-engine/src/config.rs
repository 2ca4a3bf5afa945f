//! Engine configuration

use serde::{Deserialize, Serialize};
use strata_core::LayerOptions;

/// Reconciliation engine configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Options used by `add` when the caller passes none
    pub default_options: LayerOptions,
    /// Refuse adapters with missing capabilities instead of logging them
    pub strict_capabilities: bool,
    /// Rebuild a live layer whose provider changed
    pub rebuild_on_provider_change: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            default_options: LayerOptions::default(),
            strict_capabilities: false,
            rebuild_on_provider_change: true,
        }
    }
}

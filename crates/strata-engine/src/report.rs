//! Reconciliation reports

use strata_core::{LayerError, LayerId, LayerRecord};

/// A failure scoped to one layer
#[derive(Debug, Clone, PartialEq)]
pub struct LayerFailure {
    pub id: LayerId,
    pub error: LayerError,
}

impl LayerFailure {
    pub fn new(id: LayerId, error: impl Into<LayerError>) -> Self {
        LayerFailure {
            id,
            error: error.into(),
        }
    }
}

/// What one `issue` pass did, per record
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IssueSummary {
    /// Live and already in sync
    pub unchanged: u32,
    /// Live and updated in place
    pub updated: u32,
    /// Materializations started
    pub started: u32,
    /// Pending materializations cancelled in favour of a new one
    pub superseded: u32,
    /// Failed before an operation could start
    pub rejected: u32,
}

/// Settled result of a render: the full collection plus per-layer failures
#[derive(Debug)]
pub struct RenderOutcome<'a, H> {
    pub layers: &'a [LayerRecord<H>],
    pub failures: Vec<LayerFailure>,
}

impl<'a, H> RenderOutcome<'a, H> {
    /// True when every layer reconciled
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failure reported for a layer, if any
    pub fn failure(&self, id: &str) -> Option<&LayerError> {
        self.failures
            .iter()
            .find(|f| f.id.as_str() == id)
            .map(|f| &f.error)
    }
}

/// Result of a `remove` call
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RemovalReport {
    pub removed: Vec<LayerId>,
    /// Pending materializations cancelled by the removal
    pub cancelled: u32,
    /// Adapter failures; the layers were removed regardless
    pub failures: Vec<LayerFailure>,
}

/// Result of a direct property push
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PushReport {
    pub pushed: Vec<LayerId>,
    /// Listed ids with no matching layer
    pub missing: Vec<LayerId>,
    pub failures: Vec<LayerFailure>,
}

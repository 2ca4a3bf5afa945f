//! Engine adapter contract
//!
//! An [`EngineAdapter`] translates record-level operations into one rendering
//! engine's native calls. Each mapping engine gets its own implementation;
//! the reconciliation engine only ever talks to the trait.
//!
//! Adapters receive records by shared reference for the duration of a call.
//! They cannot change declared or applied attributes; the only thing they hand
//! back is the engine handle produced by a construction routine.

use std::sync::Arc;

use strata_core::{LayerError, LayerId, LayerRecord};
use strata_ops::CancellableOperation;
use thiserror::Error;
use tracing::{trace, warn};

use crate::{Capability, CapabilitySet};

/// Adapter call failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    #[error("The {0} function is not supported by this adapter")]
    Unsupported(Capability),

    #[error("Layer {0} has no engine layer")]
    NotMaterialized(LayerId),

    #[error("Engine error: {0}")]
    Engine(String),
}

/// Result type for adapter calls
pub type AdapterResult<T> = Result<T, AdapterError>;

impl From<AdapterError> for LayerError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Unsupported(capability) => {
                LayerError::AdapterContract(capability.name().to_string())
            }
            other => LayerError::AdapterFailed(other.to_string()),
        }
    }
}

/// Builds the engine-native layer for a record
///
/// The routine must copy whatever it needs from the record before returning;
/// the returned operation outlives the borrow.
pub type ConstructionRoutine<H> =
    Arc<dyn Fn(&LayerRecord<H>) -> CancellableOperation<H> + Send + Sync>;

/// Capability interface to a rendering engine
///
/// Every method has a default body that refuses the call, so a partial
/// adapter only overrides what it supports and reports it from
/// [`capabilities`](EngineAdapter::capabilities).
pub trait EngineAdapter {
    /// Engine-native layer handle
    type Handle: Send + 'static;

    /// Capabilities this adapter implements
    fn capabilities(&self) -> CapabilitySet;

    /// Attach a materialized layer to the map
    fn add(&mut self, record: &LayerRecord<Self::Handle>) -> AdapterResult<()> {
        let _ = record;
        Err(AdapterError::Unsupported(Capability::Add))
    }

    /// Detach a layer from the map
    fn remove(&mut self, record: &LayerRecord<Self::Handle>) -> AdapterResult<()> {
        let _ = record;
        Err(AdapterError::Unsupported(Capability::Remove))
    }

    fn set_visibility(
        &mut self,
        record: &LayerRecord<Self::Handle>,
        visible: bool,
    ) -> AdapterResult<()> {
        let _ = (record, visible);
        Err(AdapterError::Unsupported(Capability::SetVisibility))
    }

    fn set_opacity(&mut self, record: &LayerRecord<Self::Handle>, opacity: f64) -> AdapterResult<()> {
        let _ = (record, opacity);
        Err(AdapterError::Unsupported(Capability::SetOpacity))
    }

    /// Rebind the record's event handlers
    fn set_events(&mut self, record: &LayerRecord<Self::Handle>) -> AdapterResult<()> {
        let _ = record;
        Err(AdapterError::Unsupported(Capability::SetEvents))
    }

    fn set_z_index(&mut self, record: &LayerRecord<Self::Handle>, z_index: i32) -> AdapterResult<()> {
        let _ = (record, z_index);
        Err(AdapterError::Unsupported(Capability::SetZIndex))
    }

    fn set_layer_config(&mut self, record: &LayerRecord<Self::Handle>) -> AdapterResult<()> {
        let _ = record;
        Err(AdapterError::Unsupported(Capability::SetLayerConfig))
    }

    /// Push query or filter parameters
    fn set_params(&mut self, record: &LayerRecord<Self::Handle>) -> AdapterResult<()> {
        let _ = record;
        Err(AdapterError::Unsupported(Capability::SetParams))
    }

    fn set_decode_params(&mut self, record: &LayerRecord<Self::Handle>) -> AdapterResult<()> {
        let _ = record;
        Err(AdapterError::Unsupported(Capability::SetDecodeParams))
    }

    /// Resolve a provider name to its construction routine
    fn layer_by_provider(&self, provider: &str) -> Option<ConstructionRoutine<Self::Handle>> {
        let _ = provider;
        None
    }
}

/// An adapter whose capabilities were checked once at setup
///
/// Calls into a capability the adapter did not report are refused with
/// [`AdapterError::Unsupported`] instead of reaching the adapter.
pub struct CheckedAdapter<A> {
    inner: A,
    capabilities: CapabilitySet,
}

impl<A: EngineAdapter> CheckedAdapter<A> {
    /// Check the adapter against the contract, logging each missing capability
    pub fn new(inner: A) -> Self {
        let capabilities = inner.capabilities();
        for capability in capabilities.missing() {
            warn!(
                capability = %capability,
                "The {} function is required for layer engine adapters",
                capability
            );
        }
        CheckedAdapter {
            inner,
            capabilities,
        }
    }

    #[inline]
    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut A {
        &mut self.inner
    }

    pub fn into_inner(self) -> A {
        self.inner
    }

    fn guard(&self, capability: Capability, id: &LayerId) -> AdapterResult<()> {
        if self.capabilities.contains(capability) {
            trace!(layer = %id, capability = %capability, "adapter call");
            Ok(())
        } else {
            Err(AdapterError::Unsupported(capability))
        }
    }

    pub fn add(&mut self, record: &LayerRecord<A::Handle>) -> AdapterResult<()> {
        self.guard(Capability::Add, record.id())?;
        self.inner.add(record)
    }

    pub fn remove(&mut self, record: &LayerRecord<A::Handle>) -> AdapterResult<()> {
        self.guard(Capability::Remove, record.id())?;
        self.inner.remove(record)
    }

    pub fn set_visibility(&mut self, record: &LayerRecord<A::Handle>, visible: bool) -> AdapterResult<()> {
        self.guard(Capability::SetVisibility, record.id())?;
        self.inner.set_visibility(record, visible)
    }

    pub fn set_opacity(&mut self, record: &LayerRecord<A::Handle>, opacity: f64) -> AdapterResult<()> {
        self.guard(Capability::SetOpacity, record.id())?;
        self.inner.set_opacity(record, opacity)
    }

    pub fn set_events(&mut self, record: &LayerRecord<A::Handle>) -> AdapterResult<()> {
        self.guard(Capability::SetEvents, record.id())?;
        self.inner.set_events(record)
    }

    pub fn set_z_index(&mut self, record: &LayerRecord<A::Handle>, z_index: i32) -> AdapterResult<()> {
        self.guard(Capability::SetZIndex, record.id())?;
        self.inner.set_z_index(record, z_index)
    }

    pub fn set_layer_config(&mut self, record: &LayerRecord<A::Handle>) -> AdapterResult<()> {
        self.guard(Capability::SetLayerConfig, record.id())?;
        self.inner.set_layer_config(record)
    }

    pub fn set_params(&mut self, record: &LayerRecord<A::Handle>) -> AdapterResult<()> {
        self.guard(Capability::SetParams, record.id())?;
        self.inner.set_params(record)
    }

    pub fn set_decode_params(&mut self, record: &LayerRecord<A::Handle>) -> AdapterResult<()> {
        self.guard(Capability::SetDecodeParams, record.id())?;
        self.inner.set_decode_params(record)
    }

    pub fn layer_by_provider(
        &self,
        record: &LayerRecord<A::Handle>,
    ) -> AdapterResult<Option<ConstructionRoutine<A::Handle>>> {
        self.guard(Capability::LayerByProvider, record.id())?;
        Ok(self.inner.layer_by_provider(record.provider()))
    }
}

//! Recording adapter
//!
//! An in-memory engine adapter that journals every call it receives. Provider
//! behaviour is scripted per provider name: resolve after a delay, reject, or
//! wait on a gate the test opens. Construction starts, cleanups and live
//! operations are tracked so tests can check cancellation directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use strata_core::{EventBindings, LayerId, LayerRecord};
use strata_engine::{
    AdapterError, AdapterResult, Capability, CapabilitySet, ConstructionRoutine, EngineAdapter,
};
use strata_ops::{CancellableOperation, OperationError};
use tokio::sync::oneshot;

// ============================================================================
// ENGINE LAYER
// ============================================================================

/// Engine-native layer produced by a scripted provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineLayer {
    pub id: LayerId,
    pub provider: String,
    /// Construction number across the adapter, starting at 1
    pub serial: u32,
}

/// One journaled adapter call
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Add(LayerId),
    Remove(LayerId),
    SetVisibility(LayerId, bool),
    SetOpacity(LayerId, f64),
    /// Event names bound by the call
    SetEvents(LayerId, Vec<String>),
    SetZIndex(LayerId, i32),
    SetLayerConfig(LayerId),
    SetParams(LayerId),
    SetDecodeParams(LayerId),
}

impl Call {
    pub fn id(&self) -> &LayerId {
        match self {
            Call::Add(id)
            | Call::Remove(id)
            | Call::SetVisibility(id, _)
            | Call::SetOpacity(id, _)
            | Call::SetEvents(id, _)
            | Call::SetZIndex(id, _)
            | Call::SetLayerConfig(id)
            | Call::SetParams(id)
            | Call::SetDecodeParams(id) => id,
        }
    }

    pub fn capability(&self) -> Capability {
        match self {
            Call::Add(_) => Capability::Add,
            Call::Remove(_) => Capability::Remove,
            Call::SetVisibility(..) => Capability::SetVisibility,
            Call::SetOpacity(..) => Capability::SetOpacity,
            Call::SetEvents(..) => Capability::SetEvents,
            Call::SetZIndex(..) => Capability::SetZIndex,
            Call::SetLayerConfig(_) => Capability::SetLayerConfig,
            Call::SetParams(_) => Capability::SetParams,
            Call::SetDecodeParams(_) => Capability::SetDecodeParams,
        }
    }
}

// ============================================================================
// PROVIDER SCRIPTS
// ============================================================================

/// How a scripted provider builds its layers
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderScript {
    /// Fulfil after the delay
    Resolve(Duration),
    /// Reject after the delay
    Reject(Duration, String),
    /// Fulfil once the test opens the gate for the layer
    Gated,
}

/// Shared record of what the adapter and its routines did
#[derive(Debug, Default)]
pub struct Journal {
    pub calls: Vec<Call>,
    /// Ids in construction start order
    pub constructions: Vec<LayerId>,
    /// Ids whose construction was cancelled and cleaned up
    pub cleanups: Vec<LayerId>,
    /// Constructions currently running, per id
    live: HashMap<LayerId, u32>,
    /// Starts that found another construction for the same id still running
    pub overlaps: u32,
    /// Open gates as (id, serial, sender)
    gates: Vec<(LayerId, u32, oneshot::Sender<()>)>,
}

impl Journal {
    fn begin(&mut self, id: &LayerId) {
        self.constructions.push(id.clone());
        let live = self.live.entry(id.clone()).or_insert(0);
        if *live > 0 {
            self.overlaps += 1;
        }
        *live += 1;
    }

    fn end(&mut self, id: &LayerId) {
        if let Some(live) = self.live.get_mut(id) {
            *live = live.saturating_sub(1);
        }
    }

    /// Constructions running right now, across all ids
    pub fn live(&self) -> u32 {
        self.live.values().sum()
    }
}

// ============================================================================
// RECORDING ADAPTER
// ============================================================================

/// Engine adapter that journals calls instead of driving a map
pub struct RecordingAdapter {
    journal: Arc<Mutex<Journal>>,
    providers: HashMap<String, ProviderScript>,
    capabilities: CapabilitySet,
    /// Injected failures per capability
    failures: HashMap<Capability, String>,
    bound: HashMap<LayerId, EventBindings>,
    serial: Arc<AtomicU32>,
}

impl RecordingAdapter {
    /// Adapter implementing the full contract with no providers
    pub fn new() -> Self {
        RecordingAdapter {
            journal: Arc::new(Mutex::new(Journal::default())),
            providers: HashMap::new(),
            capabilities: CapabilitySet::REQUIRED,
            failures: HashMap::new(),
            bound: HashMap::new(),
            serial: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Script a provider
    pub fn with_provider(mut self, name: &str, script: ProviderScript) -> Self {
        self.providers.insert(name.to_string(), script);
        self
    }

    /// Report a reduced capability set
    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Make every call of `capability` fail after being journaled
    pub fn fail_on(&mut self, capability: Capability, message: &str) {
        self.failures.insert(capability, message.to_string());
    }

    pub fn clear_failures(&mut self) {
        self.failures.clear();
    }

    /// Shared journal handle, usable after the adapter moved into an engine
    pub fn journal(&self) -> Arc<Mutex<Journal>> {
        Arc::clone(&self.journal)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.journal.lock().calls.clone()
    }

    pub fn calls_for(&self, id: &str) -> Vec<Call> {
        self.journal
            .lock()
            .calls
            .iter()
            .filter(|call| call.id() == id)
            .cloned()
            .collect()
    }

    /// Number of journaled calls of one capability
    pub fn count(&self, capability: Capability) -> usize {
        self.journal
            .lock()
            .calls
            .iter()
            .filter(|call| call.capability() == capability)
            .count()
    }

    pub fn clear_calls(&self) {
        self.journal.lock().calls.clear();
    }

    pub fn constructions(&self, id: &str) -> usize {
        self.journal
            .lock()
            .constructions
            .iter()
            .filter(|c| *c == id)
            .count()
    }

    pub fn cleanups(&self, id: &str) -> usize {
        self.journal.lock().cleanups.iter().filter(|c| *c == id).count()
    }

    /// Open the oldest gate for `id`; false when none is waiting
    ///
    /// Gates of cancelled constructions are dropped with their cleanup.
    pub fn open_gate(&self, id: &str) -> bool {
        let mut journal = self.journal.lock();
        let Some(index) = journal.gates.iter().position(|(gate, _, _)| gate == id) else {
            return false;
        };
        let (_, _, gate) = journal.gates.remove(index);
        gate.send(()).is_ok()
    }

    /// Fire an engine event at the handlers bound to `id`
    pub fn emit(&self, id: &str, event: &str, payload: &Value) -> bool {
        match self.bound.get(id).and_then(|bindings| bindings.get(event)) {
            Some(handler) => {
                handler.call(payload);
                true
            }
            None => false,
        }
    }

    fn record(&mut self, call: Call) -> AdapterResult<()> {
        let capability = call.capability();
        self.journal.lock().calls.push(call);
        match self.failures.get(&capability) {
            Some(message) => Err(AdapterError::Engine(message.clone())),
            None => Ok(()),
        }
    }

    fn routine(&self, provider: &str, script: ProviderScript) -> ConstructionRoutine<EngineLayer> {
        let journal = Arc::clone(&self.journal);
        let serial = Arc::clone(&self.serial);
        let provider = provider.to_string();

        Arc::new(move |record: &LayerRecord<EngineLayer>| {
            let id = record.id().clone();
            let serial = serial.fetch_add(1, Ordering::SeqCst) + 1;
            let layer = EngineLayer {
                id: id.clone(),
                provider: provider.clone(),
                serial,
            };
            let gate = {
                let mut journal = journal.lock();
                journal.begin(&id);
                match script {
                    ProviderScript::Gated => {
                        let (tx, rx) = oneshot::channel();
                        journal.gates.push((id.clone(), serial, tx));
                        Some(rx)
                    }
                    _ => None,
                }
            };
            let script = script.clone();
            let journal = Arc::clone(&journal);

            CancellableOperation::new(move |on_cancel| {
                let cleanup = Arc::clone(&journal);
                let cleanup_id = id.clone();
                on_cancel.register(move || {
                    let mut journal = cleanup.lock();
                    journal.end(&cleanup_id);
                    journal.gates.retain(|(_, gate, _)| *gate != serial);
                    journal.cleanups.push(cleanup_id);
                });

                async move {
                    let result = match script {
                        ProviderScript::Resolve(delay) => {
                            tokio::time::sleep(delay).await;
                            Ok(layer)
                        }
                        ProviderScript::Reject(delay, reason) => {
                            tokio::time::sleep(delay).await;
                            Err(OperationError::Failed(reason))
                        }
                        ProviderScript::Gated => match gate {
                            Some(rx) => match rx.await {
                                Ok(()) => Ok(layer),
                                Err(_) => Err(OperationError::Abandoned),
                            },
                            None => Err(OperationError::Abandoned),
                        },
                    };
                    journal.lock().end(&id);
                    result
                }
            })
        })
    }
}

impl Default for RecordingAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineAdapter for RecordingAdapter {
    type Handle = EngineLayer;

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    fn add(&mut self, record: &LayerRecord<EngineLayer>) -> AdapterResult<()> {
        if !record.is_materialized() {
            return Err(AdapterError::NotMaterialized(record.id().clone()));
        }
        self.record(Call::Add(record.id().clone()))
    }

    fn remove(&mut self, record: &LayerRecord<EngineLayer>) -> AdapterResult<()> {
        self.bound.remove(record.id());
        self.record(Call::Remove(record.id().clone()))
    }

    fn set_visibility(&mut self, record: &LayerRecord<EngineLayer>, visible: bool) -> AdapterResult<()> {
        self.record(Call::SetVisibility(record.id().clone(), visible))
    }

    fn set_opacity(&mut self, record: &LayerRecord<EngineLayer>, opacity: f64) -> AdapterResult<()> {
        self.record(Call::SetOpacity(record.id().clone(), opacity))
    }

    fn set_events(&mut self, record: &LayerRecord<EngineLayer>) -> AdapterResult<()> {
        let events = record.events();
        let names = events.iter().map(|(name, _)| name.to_string()).collect();
        self.bound.insert(record.id().clone(), events.clone());
        self.record(Call::SetEvents(record.id().clone(), names))
    }

    fn set_z_index(&mut self, record: &LayerRecord<EngineLayer>, z_index: i32) -> AdapterResult<()> {
        self.record(Call::SetZIndex(record.id().clone(), z_index))
    }

    fn set_layer_config(&mut self, record: &LayerRecord<EngineLayer>) -> AdapterResult<()> {
        self.record(Call::SetLayerConfig(record.id().clone()))
    }

    fn set_params(&mut self, record: &LayerRecord<EngineLayer>) -> AdapterResult<()> {
        self.record(Call::SetParams(record.id().clone()))
    }

    fn set_decode_params(&mut self, record: &LayerRecord<EngineLayer>) -> AdapterResult<()> {
        self.record(Call::SetDecodeParams(record.id().clone()))
    }

    fn layer_by_provider(&self, provider: &str) -> Option<ConstructionRoutine<EngineLayer>> {
        self.providers
            .get(provider)
            .map(|script| self.routine(provider, script.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{DeclaredLayer, LayerOptions};
    use strata_ops::{OperationState, Outcome};

    fn record(id: &str, provider: &str) -> LayerRecord<EngineLayer> {
        let layer = DeclaredLayer::new(id, provider);
        let attrs = layer.resolve(&LayerOptions::default());
        LayerRecord::new(layer.id, layer.provider, attrs)
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_script_builds_numbered_layers() {
        let adapter =
            RecordingAdapter::new().with_provider("wms", ProviderScript::Resolve(Duration::from_millis(10)));
        let routine = adapter.layer_by_provider("wms").unwrap();

        let first = routine(&record("a", "wms")).join().await;
        let second = routine(&record("b", "wms")).join().await;

        match (first, second) {
            (Outcome::Fulfilled(a), Outcome::Fulfilled(b)) => {
                assert_eq!((a.serial, b.serial), (1, 2));
                assert_eq!(a.provider, "wms");
            }
            other => panic!("unexpected outcomes: {:?}", other),
        }
        assert_eq!(adapter.journal().lock().live(), 0);
    }

    #[tokio::test]
    async fn test_gated_script_waits_for_gate() {
        let adapter = RecordingAdapter::new().with_provider("slow", ProviderScript::Gated);
        let routine = adapter.layer_by_provider("slow").unwrap();
        let op = routine(&record("a", "slow"));

        tokio::task::yield_now().await;
        assert_eq!(op.state(), OperationState::Pending);
        assert!(adapter.open_gate("a"));
        assert_eq!(op.settled().await, OperationState::Fulfilled);
        assert!(!adapter.open_gate("a"));
    }

    #[tokio::test]
    async fn test_cancel_records_cleanup() {
        let adapter = RecordingAdapter::new().with_provider("slow", ProviderScript::Gated);
        let routine = adapter.layer_by_provider("slow").unwrap();
        let op = routine(&record("a", "slow"));

        assert!(op.cancel());
        assert_eq!(adapter.cleanups("a"), 1);
        assert!(!adapter.open_gate("a"));
        assert_eq!(adapter.journal().lock().live(), 0);
    }

    #[test]
    fn test_injected_failure_is_journaled() {
        let mut adapter = RecordingAdapter::new();
        adapter.fail_on(Capability::SetOpacity, "gl context lost");
        let rec = record("a", "wms");

        assert_eq!(
            adapter.set_opacity(&rec, 0.5),
            Err(AdapterError::Engine("gl context lost".into()))
        );
        assert_eq!(adapter.calls(), vec![Call::SetOpacity(LayerId::new("a"), 0.5)]);
        assert_eq!(adapter.count(Capability::SetOpacity), 1);
    }

    #[test]
    fn test_unknown_provider_resolves_to_none() {
        let adapter = RecordingAdapter::new();
        assert!(adapter.layer_by_provider("nope").is_none());
    }
}

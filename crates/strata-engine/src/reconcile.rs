//! Layer reconciliation pipeline
//!
//! A pass runs in two halves. `issue` walks the collection in order and, per
//! record, either leaves it alone, pushes its changed attributes in place, or
//! starts a materialization. `settle` then waits for every started operation
//! and applies the results. `render` is both halves back to back.

use std::mem;

use strata_core::{
    validate_opacity, Attribute, ChangeSet, DeclaredLayer, LayerAttributes, LayerError, LayerId,
    LayerOptions, LayerRecord, LayerResult, LayerSelector,
};
use strata_ops::{OperationState, Outcome};
use tracing::{debug, warn};

use crate::slot::{Slot, SlotMap, Snapshot};
use crate::{
    AdapterError, AdapterResult, CapabilitySet, CheckedAdapter, EngineAdapter, EngineConfig,
    IssueSummary, LayerFailure, PushReport, RemovalReport, RenderOutcome,
};

/// What `issue` did with one record
enum Step {
    Unchanged,
    Updated,
    Started { superseded: bool },
    Rejected { superseded: bool },
}

/// Layer reconciliation engine
///
/// Owns the ordered layer collection and, during a pass, one slot per layer
/// id. Only the engine writes records; the adapter reports success or failure
/// and hands back engine layers.
pub struct ReconciliationEngine<A: EngineAdapter> {
    adapter: CheckedAdapter<A>,
    config: EngineConfig,
    /// Records in declaration order
    layers: Vec<LayerRecord<A::Handle>>,
    slots: SlotMap<A::Handle>,
    /// Failures not yet handed out by `settle`
    failures: Vec<LayerFailure>,
}

impl<A: EngineAdapter> ReconciliationEngine<A> {
    pub fn new(adapter: A) -> Self {
        Self::build(adapter, EngineConfig::default())
    }

    /// Build with explicit configuration
    ///
    /// With `strict_capabilities` set, an adapter missing part of the
    /// contract is refused instead of logged.
    pub fn with_config(adapter: A, config: EngineConfig) -> LayerResult<Self> {
        config.default_options.validate()?;
        let engine = Self::build(adapter, config);
        if engine.config.strict_capabilities {
            let missing = engine.adapter.capabilities().missing();
            if !missing.is_empty() {
                let names: Vec<&str> = missing.iter().map(|c| c.name()).collect();
                return Err(LayerError::AdapterContract(names.join(", ")));
            }
        }
        Ok(engine)
    }

    fn build(adapter: A, config: EngineConfig) -> Self {
        ReconciliationEngine {
            adapter: CheckedAdapter::new(adapter),
            config,
            layers: Vec::new(),
            slots: SlotMap::new(),
            failures: Vec::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn capabilities(&self) -> CapabilitySet {
        self.adapter.capabilities()
    }

    pub fn adapter(&self) -> &A {
        self.adapter.inner()
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        self.adapter.inner_mut()
    }

    /// All records, in declaration order
    pub fn layers(&self) -> &[LayerRecord<A::Handle>] {
        &self.layers
    }

    pub fn layer(&self, id: &str) -> Option<&LayerRecord<A::Handle>> {
        self.layers.iter().find(|record| record.id() == id)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// State of the materialization tracked for `id` in the current pass
    pub fn operation_state(&self, id: &str) -> Option<OperationState> {
        self.slots.operation_state(&LayerId::new(id))
    }

    /// Number of materializations still in flight
    pub fn pending_operations(&self) -> usize {
        self.slots.pending()
    }

    // ========================================================================
    // Declaration
    // ========================================================================

    /// Merge declared layers into the collection without reconciling
    ///
    /// Every layer is validated first; on error the collection is left
    /// untouched. Existing ids are redeclared in place, new ids are appended.
    pub fn declare(
        &mut self,
        layers: impl IntoIterator<Item = DeclaredLayer>,
        options: &LayerOptions,
    ) -> LayerResult<Vec<LayerId>> {
        options.validate()?;
        let layers: Vec<DeclaredLayer> = layers.into_iter().collect();
        for layer in &layers {
            layer.validate()?;
        }

        let mut ids = Vec::with_capacity(layers.len());
        for layer in layers {
            let attributes = layer.resolve(options);
            match self.layers.iter_mut().find(|r| r.id() == &layer.id) {
                Some(record) => {
                    record.redeclare(layer.provider, attributes);
                    debug!(layer = %layer.id, changes = ?record.changes(), "layer redeclared");
                }
                None => {
                    debug!(layer = %layer.id, provider = %layer.provider, "layer declared");
                    self.layers
                        .push(LayerRecord::new(layer.id.clone(), layer.provider, attributes));
                }
            }
            ids.push(layer.id);
        }
        Ok(ids)
    }

    /// Declare layers with the configured default options and render
    pub async fn add(
        &mut self,
        layers: impl IntoIterator<Item = DeclaredLayer>,
    ) -> LayerResult<RenderOutcome<'_, A::Handle>> {
        let options = self.config.default_options.clone();
        self.add_with(layers, &options).await
    }

    /// Declare layers with explicit options and render
    pub async fn add_with(
        &mut self,
        layers: impl IntoIterator<Item = DeclaredLayer>,
        options: &LayerOptions,
    ) -> LayerResult<RenderOutcome<'_, A::Handle>> {
        self.declare(layers, options)?;
        Ok(self.render().await)
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Reconcile the whole collection and wait for it to settle
    pub async fn render(&mut self) -> RenderOutcome<'_, A::Handle> {
        if self.layers.is_empty() && self.slots.is_empty() {
            return RenderOutcome {
                layers: &self.layers,
                failures: mem::take(&mut self.failures),
            };
        }
        self.issue();
        self.settle().await
    }

    /// Reconcile every record and start the materializations it needs
    ///
    /// Runs synchronously. Materializations still pending from an earlier
    /// issue are cancelled and replaced; ones that already completed are
    /// applied first so their result is kept.
    pub fn issue(&mut self) -> IssueSummary {
        for (id, operation, snapshot) in self.slots.drain_settled() {
            if let Some(outcome) = operation.take_outcome() {
                self.complete(&id, outcome, snapshot);
            }
        }

        let mut summary = IssueSummary::default();
        for index in 0..self.layers.len() {
            match self.reconcile(index) {
                Step::Unchanged => summary.unchanged += 1,
                Step::Updated => summary.updated += 1,
                Step::Started { superseded } => {
                    summary.started += 1;
                    summary.superseded += superseded as u32;
                }
                Step::Rejected { superseded } => {
                    summary.rejected += 1;
                    summary.superseded += superseded as u32;
                }
            }
        }
        debug!(?summary, "reconciliation issued");
        summary
    }

    fn reconcile(&mut self, index: usize) -> Step {
        let record = &mut self.layers[index];
        let id = record.id().clone();

        if record.is_materialized()
            && record.requires_rebuild()
            && self.config.rebuild_on_provider_change
        {
            debug!(layer = %id, provider = record.provider(), "provider changed, rebuilding");
            if let Err(err) = self.adapter.remove(record) {
                self.failures.push(logged(LayerFailure::new(id.clone(), err)));
            }
            record.detach_handle();
        }

        if record.is_materialized() {
            if record.changes().is_empty() {
                self.slots.occupy(id, Slot::Ready);
                return Step::Unchanged;
            }
            let slot = match push_changes(&mut self.adapter, record) {
                Ok(()) => {
                    record.commit();
                    Slot::Ready
                }
                Err(err) => Slot::Failed(err.into()),
            };
            self.slots.occupy(id, slot);
            return Step::Updated;
        }

        let superseded = self.slots.supersede(&id);
        if superseded {
            debug!(layer = %id, "superseded pending materialization");
        }

        let routine = match self.adapter.layer_by_provider(record) {
            Ok(Some(routine)) => routine,
            Ok(None) => {
                let err = LayerError::ProviderUnsupported(record.provider().to_string());
                self.slots.occupy(id, Slot::Failed(err));
                return Step::Rejected { superseded };
            }
            Err(err) => {
                self.slots.occupy(id, Slot::Failed(err.into()));
                return Step::Rejected { superseded };
            }
        };

        let snapshot = Snapshot {
            provider: record.provider().to_string(),
            attributes: record.declared().clone(),
        };
        let operation = routine(&*record);
        debug!(layer = %id, provider = %snapshot.provider, "materialization started");
        self.slots.occupy(
            id,
            Slot::Pending {
                operation,
                snapshot,
            },
        );
        Step::Started { superseded }
    }

    /// Wait for every slot of the current pass and apply the results
    ///
    /// Slots are joined in collection order; a failed slot never cancels
    /// another. Dropping the returned future leaves unsettled slots in place
    /// for the next `settle` or `issue`.
    pub async fn settle(&mut self) -> RenderOutcome<'_, A::Handle> {
        let ids: Vec<LayerId> = self
            .layers
            .iter()
            .map(|record| record.id().clone())
            .filter(|id| self.slots.contains(id))
            .collect();

        for id in ids {
            if let Some(operation) = self.slots.operation(&id).cloned() {
                operation.settled().await;
            }
            match self.slots.take(&id) {
                Some(Slot::Pending {
                    operation,
                    snapshot,
                }) => {
                    if let Some(outcome) = operation.take_outcome() {
                        self.complete(&id, outcome, snapshot);
                    }
                }
                Some(Slot::Failed(error)) => {
                    self.failures.push(logged(LayerFailure { id, error }));
                }
                Some(Slot::Ready) | None => {}
            }
        }
        self.slots.clear();

        let failures = mem::take(&mut self.failures);
        debug!(
            layers = self.layers.len(),
            failures = failures.len(),
            "reconciliation settled"
        );
        RenderOutcome {
            layers: &self.layers,
            failures,
        }
    }

    /// Apply a settled materialization to its record
    fn complete(&mut self, id: &LayerId, outcome: Outcome<A::Handle>, snapshot: Snapshot) {
        let Some(record) = self.layers.iter_mut().find(|r| r.id() == id) else {
            debug!(layer = %id, "layer gone before its materialization settled");
            return;
        };

        match outcome {
            Outcome::Fulfilled(handle) => {
                record.attach_handle(handle);
                if let Err(err) = self.adapter.add(record) {
                    record.detach_handle();
                    self.failures.push(logged(LayerFailure::new(id.clone(), err)));
                    return;
                }
                // the engine layer exists either way; a failed push is
                // retried in place by the next pass
                match apply_initial(&mut self.adapter, record, &snapshot.attributes) {
                    Ok(()) => {
                        record.commit_snapshot(snapshot.provider, snapshot.attributes);
                        debug!(layer = %id, "layer materialized");
                    }
                    Err((unapplied, err)) => {
                        record.commit_snapshot_except(
                            snapshot.provider,
                            snapshot.attributes,
                            unapplied,
                        );
                        self.failures.push(logged(LayerFailure::new(id.clone(), err)));
                    }
                }
            }
            Outcome::Rejected(err) => {
                let err = LayerError::ConstructionFailed(err.to_string());
                self.failures.push(logged(LayerFailure::new(id.clone(), err)));
            }
            Outcome::Cancelled => {
                debug!(layer = %id, "materialization cancelled");
            }
        }
    }

    // ========================================================================
    // Removal and direct pushes
    // ========================================================================

    /// Remove matching layers from the engine and the collection
    ///
    /// An empty selector removes everything. A pending materialization for a
    /// removed id is cancelled. Records are deleted even when the adapter
    /// fails to remove them; those failures are reported.
    pub fn remove(&mut self, selector: impl Into<LayerSelector>) -> LayerResult<RemovalReport> {
        let selector = selector.into();
        selector.validate()?;
        let everything = selector.is_everything();

        let mut report = RemovalReport::default();
        let adapter = &mut self.adapter;
        let slots = &mut self.slots;
        self.layers.retain(|record| {
            if !everything && !selector.matches(record.id()) {
                return true;
            }
            if slots.supersede(record.id()) {
                report.cancelled += 1;
            }
            if let Err(err) = adapter.remove(record) {
                report
                    .failures
                    .push(logged(LayerFailure::new(record.id().clone(), err)));
            }
            report.removed.push(record.id().clone());
            false
        });

        debug!(
            removed = report.removed.len(),
            cancelled = report.cancelled,
            "layers removed"
        );
        Ok(report)
    }

    /// Push an opacity straight to the adapter, bypassing the diff
    pub fn set_opacity(
        &mut self,
        selector: impl Into<LayerSelector>,
        opacity: f64,
    ) -> LayerResult<PushReport> {
        validate_opacity(opacity)?;
        self.push_direct(selector.into(), |adapter, record| {
            adapter.set_opacity(record, opacity)
        })
    }

    pub fn set_visibility(
        &mut self,
        selector: impl Into<LayerSelector>,
        visible: bool,
    ) -> LayerResult<PushReport> {
        self.push_direct(selector.into(), |adapter, record| {
            adapter.set_visibility(record, visible)
        })
    }

    pub fn set_z_index(
        &mut self,
        selector: impl Into<LayerSelector>,
        z_index: i32,
    ) -> LayerResult<PushReport> {
        self.push_direct(selector.into(), |adapter, record| {
            adapter.set_z_index(record, z_index)
        })
    }

    fn push_direct<F>(&mut self, selector: LayerSelector, mut push: F) -> LayerResult<PushReport>
    where
        F: FnMut(&mut CheckedAdapter<A>, &LayerRecord<A::Handle>) -> AdapterResult<()>,
    {
        selector.validate()?;

        let mut report = PushReport::default();
        for record in self.layers.iter().filter(|r| selector.matches(r.id())) {
            match push(&mut self.adapter, record) {
                Ok(()) => report.pushed.push(record.id().clone()),
                Err(err) => report
                    .failures
                    .push(logged(LayerFailure::new(record.id().clone(), err))),
            }
        }
        report.missing = selector
            .listed()
            .iter()
            .filter(|id| !self.layers.iter().any(|r| r.id() == *id))
            .cloned()
            .collect();

        if report.pushed.is_empty() && report.failures.is_empty() {
            warn!(?selector, "Can't find the layer");
            return Err(LayerError::NotFound(report.missing));
        }
        Ok(report)
    }
}

impl<A: EngineAdapter> Drop for ReconciliationEngine<A> {
    fn drop(&mut self) {
        let cancelled = self.slots.clear();
        if cancelled > 0 {
            debug!(cancelled, "engine dropped with pending materializations");
        }
    }
}

/// Push the changed attributes of a live record, in a fixed order
fn push_changes<A: EngineAdapter>(
    adapter: &mut CheckedAdapter<A>,
    record: &LayerRecord<A::Handle>,
) -> AdapterResult<()> {
    let changes = record.changes();
    let declared = record.declared();

    if changes.contains(Attribute::Opacity) {
        adapter.set_opacity(record, declared.opacity)?;
    }
    // hidden layers are shown at zero opacity
    if changes.contains(Attribute::Visibility) {
        adapter.set_opacity(record, declared.effective_opacity())?;
    }
    if changes.contains(Attribute::ZIndex) {
        adapter.set_z_index(record, declared.z_index)?;
    }
    if changes.contains(Attribute::Events) {
        adapter.set_events(record)?;
    }
    if changes.contains(Attribute::LayerConfig) && !declared.layer_config.is_empty() {
        adapter.set_layer_config(record)?;
    }
    if changes.contains(Attribute::Params) && !declared.params.is_empty() {
        adapter.set_params(record)?;
    }
    if changes.contains(Attribute::SqlParams) && !declared.sql_params.is_empty() {
        adapter.set_params(record)?;
    }
    if changes.contains(Attribute::DecodeParams) && !declared.decode_params.is_empty() {
        adapter.set_decode_params(record)?;
    }
    Ok(())
}

/// Initial pushes for a freshly attached engine layer
///
/// On failure, returns the attribute that failed along with every later one.
fn apply_initial<A: EngineAdapter>(
    adapter: &mut CheckedAdapter<A>,
    record: &LayerRecord<A::Handle>,
    attributes: &LayerAttributes,
) -> Result<(), (ChangeSet, AdapterError)> {
    let mut steps = vec![Attribute::ZIndex, Attribute::Opacity, Attribute::Visibility];
    if !attributes.events.is_empty() {
        steps.push(Attribute::Events);
    }

    for (index, attribute) in steps.iter().enumerate() {
        let pushed = match attribute {
            Attribute::ZIndex => adapter.set_z_index(record, attributes.z_index),
            Attribute::Opacity => adapter.set_opacity(record, attributes.opacity),
            Attribute::Visibility => adapter.set_visibility(record, attributes.visibility),
            _ => adapter.set_events(record),
        };
        if let Err(err) = pushed {
            return Err((steps[index..].iter().copied().collect(), err));
        }
    }
    Ok(())
}

fn logged(failure: LayerFailure) -> LayerFailure {
    warn!(layer = %failure.id, error = %failure.error, "layer failed to reconcile");
    failure
}

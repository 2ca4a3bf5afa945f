//! Scenario harness
//!
//! Drives a [`ReconciliationEngine`] over a [`RecordingAdapter`] and checks
//! the engine's invariants against the adapter journal:
//! - Layer ids stay unique in the collection
//! - At most one construction runs per layer id
//! - Nothing is left running once a pass settled
//! - Every engine layer belongs to the record holding it

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use strata_core::{DeclaredLayer, LayerError, LayerId, LayerOptions, LayerResult};
use strata_engine::{Capability, EngineConfig, IssueSummary, LayerFailure, ReconciliationEngine};

use crate::recording::{Call, Journal, ProviderScript, RecordingAdapter};

// ============================================================================
// INVARIANTS
// ============================================================================

/// A broken engine invariant
#[derive(Debug, Clone, PartialEq)]
pub enum InvariantViolation {
    DuplicateId(LayerId),
    /// Constructions started while another for the same id was running
    OverlappingConstruction(u32),
    /// Constructions still running after a settled pass
    OrphanedConstruction(u32),
    /// Slots still pending after a settled pass
    PendingAfterSettle(usize),
    /// Engine layer built for another id or provider
    HandleMismatch(LayerId),
}

// ============================================================================
// LAYER HARNESS
// ============================================================================

/// Engine plus journal, with invariant checks
pub struct LayerHarness {
    engine: ReconciliationEngine<RecordingAdapter>,
    journal: Arc<Mutex<Journal>>,
    /// Failures collected from every settled pass
    failures: Vec<LayerFailure>,
}

impl LayerHarness {
    pub fn new(adapter: RecordingAdapter) -> Self {
        let journal = adapter.journal();
        LayerHarness {
            engine: ReconciliationEngine::new(adapter),
            journal,
            failures: Vec::new(),
        }
    }

    pub fn with_config(adapter: RecordingAdapter, config: EngineConfig) -> LayerResult<Self> {
        let journal = adapter.journal();
        Ok(LayerHarness {
            engine: ReconciliationEngine::with_config(adapter, config)?,
            journal,
            failures: Vec::new(),
        })
    }

    pub fn engine(&self) -> &ReconciliationEngine<RecordingAdapter> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ReconciliationEngine<RecordingAdapter> {
        &mut self.engine
    }

    pub fn adapter(&self) -> &RecordingAdapter {
        self.engine.adapter()
    }

    pub fn failures(&self) -> &[LayerFailure] {
        &self.failures
    }

    pub fn failure(&self, id: &str) -> Option<&LayerError> {
        self.failures
            .iter()
            .rev()
            .find(|f| f.id == id)
            .map(|f| &f.error)
    }

    pub fn declare(&mut self, layers: impl IntoIterator<Item = DeclaredLayer>) -> bool {
        self.engine.declare(layers, &LayerOptions::default()).is_ok()
    }

    pub fn issue(&mut self) -> IssueSummary {
        self.engine.issue()
    }

    /// Settle the pass, keeping its failures
    pub async fn settle(&mut self) {
        let outcome = self.engine.settle().await;
        self.failures.extend(outcome.failures);
    }

    /// Declare and render, keeping the failures
    pub async fn add(&mut self, layers: impl IntoIterator<Item = DeclaredLayer>) -> bool {
        match self.engine.add(layers).await {
            Ok(outcome) => {
                let clean = outcome.is_clean();
                self.failures.extend(outcome.failures);
                clean
            }
            Err(_) => false,
        }
    }

    /// Check invariants that hold at any time
    pub fn check_invariants(&self) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();

        let mut seen = HashSet::new();
        for record in self.engine.layers() {
            if !seen.insert(record.id().clone()) {
                violations.push(InvariantViolation::DuplicateId(record.id().clone()));
            }
            if let Some(layer) = record.handle() {
                let rebuilding = record.requires_rebuild();
                if &layer.id != record.id() || (!rebuilding && layer.provider != record.provider()) {
                    violations.push(InvariantViolation::HandleMismatch(record.id().clone()));
                }
            }
        }

        let overlaps = self.journal.lock().overlaps;
        if overlaps > 0 {
            violations.push(InvariantViolation::OverlappingConstruction(overlaps));
        }
        violations
    }

    /// Check invariants that hold right after `settle`
    pub fn check_settled(&self) -> Vec<InvariantViolation> {
        let mut violations = self.check_invariants();
        let pending = self.engine.pending_operations();
        if pending > 0 {
            violations.push(InvariantViolation::PendingAfterSettle(pending));
        }
        let live = self.journal.lock().live();
        if live > 0 {
            violations.push(InvariantViolation::OrphanedConstruction(live));
        }
        violations
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

/// Result of one scenario
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    pub name: &'static str,
    /// Failed expectations, empty when the scenario passed
    pub mismatches: Vec<String>,
    pub violations: Vec<InvariantViolation>,
}

impl ScenarioResult {
    fn new(name: &'static str) -> Self {
        ScenarioResult {
            name,
            mismatches: Vec::new(),
            violations: Vec::new(),
        }
    }

    fn expect(&mut self, ok: bool, what: &str) {
        if !ok {
            self.mismatches.push(what.to_string());
        }
    }

    pub fn passed(&self) -> bool {
        self.mismatches.is_empty() && self.violations.is_empty()
    }
}

/// A resolvable and an unknown provider in one render
pub async fn scenario_mixed_providers() -> ScenarioResult {
    let mut result = ScenarioResult::new("mixed_providers");
    let adapter = RecordingAdapter::new()
        .with_provider("wms", ProviderScript::Resolve(Duration::from_millis(10)));
    let mut harness = LayerHarness::new(adapter);

    let clean = harness
        .add([
            DeclaredLayer::new("r1", "wms"),
            DeclaredLayer::new("r2", "unknown"),
        ])
        .await;
    result.expect(!clean, "render reports the unknown provider");

    let adapter = harness.adapter();
    result.expect(adapter.count(Capability::Add) == 1, "one add");
    result.expect(adapter.count(Capability::SetZIndex) == 1, "one setZIndex");
    result.expect(adapter.count(Capability::SetOpacity) == 1, "one setOpacity");
    result.expect(
        adapter.count(Capability::SetVisibility) == 1,
        "one setVisibility",
    );
    result.expect(adapter.calls_for("r2").is_empty(), "no calls for r2");
    result.expect(
        harness.failure("r2") == Some(&LayerError::ProviderUnsupported("unknown".into())),
        "r2 fails with ProviderUnsupported",
    );
    result.expect(
        harness.engine().layer("r1").map_or(false, |r| r.is_materialized()),
        "r1 materialized",
    );

    result.violations = harness.check_settled();
    result
}

/// A second pass while the first construction is still running
pub async fn scenario_supersession() -> ScenarioResult {
    let mut result = ScenarioResult::new("supersession");
    let adapter = RecordingAdapter::new().with_provider("slow", ProviderScript::Gated);
    let mut harness = LayerHarness::new(adapter);

    harness.declare([DeclaredLayer::new("a", "slow")]);
    harness.issue();
    harness.declare([DeclaredLayer::new("a", "slow").with_opacity(0.4)]);
    let summary = harness.issue();
    result.expect(summary.superseded == 1, "second issue supersedes the first");
    result.violations = harness.check_invariants();

    result.expect(harness.adapter().open_gate("a"), "live gate present");
    result.expect(!harness.adapter().open_gate("a"), "superseded gate dropped");
    harness.settle().await;

    let adapter = harness.adapter();
    result.expect(adapter.constructions("a") == 2, "two constructions");
    result.expect(adapter.cleanups("a") == 1, "first construction cleaned up once");
    result.expect(adapter.count(Capability::Add) == 1, "only the second result added");
    result.expect(
        adapter
            .calls()
            .contains(&Call::SetOpacity(LayerId::new("a"), 0.4)),
        "second declaration applied",
    );

    result.violations.extend(harness.check_settled());
    result
}

/// Rendering twice without changes does nothing the second time
pub async fn scenario_idempotent_render() -> ScenarioResult {
    let mut result = ScenarioResult::new("idempotent_render");
    let adapter =
        RecordingAdapter::new().with_provider("wms", ProviderScript::Resolve(Duration::from_millis(5)));
    let mut harness = LayerHarness::new(adapter);

    harness
        .add([DeclaredLayer::new("a", "wms"), DeclaredLayer::new("b", "wms")])
        .await;
    let calls = harness.adapter().calls().len();

    let summary = harness.issue();
    harness.settle().await;
    result.expect(summary.unchanged == 2, "both records unchanged");
    result.expect(harness.adapter().calls().len() == calls, "no adapter calls");
    result.expect(harness.adapter().constructions("a") == 1, "no rebuild");

    result.violations = harness.check_settled();
    result
}

/// Run every scenario
pub async fn run_all() -> Vec<ScenarioResult> {
    vec![
        scenario_mixed_providers().await,
        scenario_supersession().await,
        scenario_idempotent_render().await,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_core::LayerSelector;
    use strata_ops::OperationState;

    fn wms(delay_ms: u64) -> RecordingAdapter {
        RecordingAdapter::new()
            .with_provider("wms", ProviderScript::Resolve(Duration::from_millis(delay_ms)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenarios_pass() {
        for result in run_all().await {
            assert!(result.passed(), "{}: {:?}", result.name, result);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_pushes_in_order() {
        let mut harness = LayerHarness::new(wms(10));
        assert!(harness.add([DeclaredLayer::new("r1", "wms")]).await);

        let id = LayerId::new("r1");
        assert_eq!(
            harness.adapter().calls(),
            vec![
                Call::Add(id.clone()),
                Call::SetZIndex(id.clone(), 0),
                Call::SetOpacity(id.clone(), 1.0),
                Call::SetVisibility(id, true),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_opacity_push() {
        let mut harness = LayerHarness::new(wms(1));
        harness.add([DeclaredLayer::new("r3", "wms")]).await;
        harness.adapter().clear_calls();

        let report = harness.engine_mut().set_opacity(["r3"], 0.5).unwrap();
        assert_eq!(report.pushed, vec![LayerId::new("r3")]);
        assert_eq!(
            harness.adapter().calls(),
            vec![Call::SetOpacity(LayerId::new("r3"), 0.5)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_layer_pushed_as_zero_opacity() {
        let mut harness = LayerHarness::new(wms(1));
        harness.add([DeclaredLayer::new("a", "wms").with_opacity(0.7)]).await;
        harness.adapter().clear_calls();

        harness
            .add([DeclaredLayer::new("a", "wms").with_opacity(0.7).with_visibility(false)])
            .await;
        assert_eq!(
            harness.adapter().calls(),
            vec![Call::SetOpacity(LayerId::new("a"), 0.0)]
        );

        harness.adapter().clear_calls();
        harness.add([DeclaredLayer::new("a", "wms").with_opacity(0.7)]).await;
        assert_eq!(
            harness.adapter().calls(),
            vec![Call::SetOpacity(LayerId::new("a"), 0.7)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_subgroups_are_not_pushed() {
        let mut harness = LayerHarness::new(wms(1));
        harness
            .add([DeclaredLayer::new("a", "wms").with_param("year", 2019)])
            .await;
        harness.adapter().clear_calls();

        // params cleared: changed but empty, so nothing to push
        harness
            .add([DeclaredLayer::new("a", "wms").with_decode_param("band", 2)])
            .await;
        assert_eq!(
            harness.adapter().calls(),
            vec![Call::SetDecodeParams(LayerId::new("a"))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_bound_and_fired() {
        let clicks = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&clicks);
        let mut harness = LayerHarness::new(wms(1));

        harness
            .add([DeclaredLayer::new("a", "wms").on("click", move |payload| {
                sink.lock().push(payload.clone());
            })])
            .await;

        assert!(harness
            .adapter()
            .calls()
            .contains(&Call::SetEvents(LayerId::new("a"), vec!["click".into()])));
        assert!(harness.adapter().emit("a", "click", &json!({ "x": 1 })));
        assert!(!harness.adapter().emit("a", "hover", &json!(null)));
        assert_eq!(*clicks.lock(), vec![json!({ "x": 1 })]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_events_no_set_events_call() {
        let mut harness = LayerHarness::new(wms(1));
        harness.add([DeclaredLayer::new("a", "wms")]).await;
        assert_eq!(harness.adapter().count(Capability::SetEvents), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_failure_is_retried_next_render() {
        let mut harness = LayerHarness::new(wms(1));
        harness.add([DeclaredLayer::new("a", "wms")]).await;
        harness.engine_mut().adapter_mut().fail_on(Capability::SetZIndex, "busy");

        assert!(!harness.add([DeclaredLayer::new("a", "wms").with_z_index(4)]).await);
        assert!(matches!(
            harness.failure("a"),
            Some(LayerError::AdapterFailed(_))
        ));
        assert!(!harness.engine().layer("a").unwrap().changes().is_empty());

        harness.engine_mut().adapter_mut().clear_failures();
        harness.issue();
        harness.settle().await;
        let record = harness.engine().layer("a").unwrap();
        assert!(record.changes().is_empty());
        assert_eq!(record.applied().map(|a| a.z_index), Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_construction_is_retried() {
        let adapter = RecordingAdapter::new()
            .with_provider("flaky", ProviderScript::Reject(Duration::from_millis(5), "503".into()));
        let mut harness = LayerHarness::new(adapter);

        assert!(!harness.add([DeclaredLayer::new("a", "flaky")]).await);
        assert_eq!(
            harness.failure("a"),
            Some(&LayerError::ConstructionFailed("Operation failed: 503".into()))
        );
        harness.issue();
        harness.settle().await;
        assert_eq!(harness.adapter().constructions("a"), 2);
        assert!(harness.check_settled().is_empty());
    }

    #[tokio::test]
    async fn test_remove_cancels_pending_construction() {
        let adapter = RecordingAdapter::new().with_provider("slow", ProviderScript::Gated);
        let mut harness = LayerHarness::new(adapter);
        harness.declare([DeclaredLayer::new("a", "slow"), DeclaredLayer::new("b", "slow")]);
        harness.issue();
        assert_eq!(
            harness.engine().operation_state("a"),
            Some(OperationState::Pending)
        );

        let report = harness.engine_mut().remove("a").unwrap();
        assert_eq!(report.cancelled, 1);
        assert_eq!(harness.adapter().cleanups("a"), 1);

        harness.adapter().open_gate("b");
        harness.settle().await;
        assert_eq!(harness.engine().len(), 1);
        assert!(harness.engine().layer("b").unwrap().is_materialized());
        assert!(harness.check_settled().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_everything() {
        let mut harness = LayerHarness::new(wms(1));
        harness
            .add([DeclaredLayer::new("a", "wms"), DeclaredLayer::new("b", "wms")])
            .await;

        let report = harness
            .engine_mut()
            .remove(LayerSelector::from(Vec::<LayerId>::new()))
            .unwrap();
        assert_eq!(report.removed.len(), 2);
        assert!(harness.engine().is_empty());
        assert_eq!(harness.adapter().count(Capability::Remove), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adding_same_layer_twice_touches_only_changes() {
        let mut harness = LayerHarness::new(wms(1));
        harness.add([DeclaredLayer::new("a", "wms").with_opacity(0.5)]).await;
        harness.adapter().clear_calls();

        harness
            .add([DeclaredLayer::new("a", "wms").with_opacity(0.5).with_z_index(9)])
            .await;
        assert_eq!(
            harness.adapter().calls(),
            vec![Call::SetZIndex(LayerId::new("a"), 9)]
        );
        assert_eq!(harness.engine().len(), 1);
        assert_eq!(harness.adapter().constructions("a"), 1);
    }

    #[test]
    fn test_strict_config_refuses_partial_adapter() {
        let adapter = RecordingAdapter::new().with_capabilities(
            strata_engine::CapabilitySet::REQUIRED.without(Capability::SetDecodeParams),
        );
        let config = EngineConfig {
            strict_capabilities: true,
            ..EngineConfig::default()
        };
        assert!(matches!(
            LayerHarness::with_config(adapter, config),
            Err(LayerError::AdapterContract(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebuild_disabled_keeps_engine_layer() {
        let adapter = wms(1).with_provider("tiles", ProviderScript::Resolve(Duration::from_millis(1)));
        let config = EngineConfig {
            rebuild_on_provider_change: false,
            ..EngineConfig::default()
        };
        let mut harness = LayerHarness::with_config(adapter, config).unwrap();
        harness.add([DeclaredLayer::new("a", "wms")]).await;
        harness.add([DeclaredLayer::new("a", "tiles")]).await;

        assert_eq!(harness.adapter().constructions("a"), 1);
        assert_eq!(harness.adapter().count(Capability::Remove), 0);
    }

    #[tokio::test]
    async fn test_partial_adapter_fails_per_layer() {
        let adapter = RecordingAdapter::new()
            .with_provider("wms", ProviderScript::Resolve(Duration::ZERO))
            .with_capabilities(
                strata_engine::CapabilitySet::REQUIRED.without(Capability::SetVisibility),
            );
        let mut harness = LayerHarness::new(adapter);

        assert!(!harness.add([DeclaredLayer::new("a", "wms")]).await);
        assert_eq!(
            harness.failure("a"),
            Some(&LayerError::AdapterContract("setVisibility".into()))
        );
    }

    #[tokio::test]
    async fn test_failed_initial_push_is_finished_in_place() {
        let adapter = RecordingAdapter::new()
            .with_provider("wms", ProviderScript::Resolve(Duration::ZERO))
            .with_capabilities(
                strata_engine::CapabilitySet::REQUIRED.without(Capability::SetVisibility),
            );
        let mut harness = LayerHarness::new(adapter);
        assert!(!harness.add([DeclaredLayer::new("a", "wms")]).await);
        assert!(harness.engine().layer("a").is_some_and(|r| r.is_materialized()));

        // hidden state is pushed through opacity, which the adapter supports
        harness.adapter().clear_calls();
        harness.issue();
        harness.settle().await;
        assert_eq!(
            harness.adapter().calls_for("a"),
            vec![Call::SetOpacity(LayerId::new("a"), 1.0)]
        );
        assert!(harness.engine().layer("a").is_some_and(|r| r.changes().is_empty()));

        for _ in 0..2 {
            harness.issue();
            harness.settle().await;
        }
        assert_eq!(harness.adapter().constructions("a"), 1);
        assert_eq!(harness.adapter().count(Capability::Add), 0);
        assert_eq!(harness.adapter().count(Capability::Remove), 0);
        assert_eq!(harness.adapter().calls_for("a").len(), 1);
        assert_eq!(harness.failures().len(), 1);
        assert!(harness.check_settled().is_empty());
    }
}

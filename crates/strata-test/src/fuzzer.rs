//! Render Fuzzer - Randomized reconciliation sequences
//!
//! Interleaves declarations, partial passes, removals, direct pushes and
//! time advances against a scripted adapter, checking after every step:
//! - At most one construction per layer id is ever running
//! - Settled passes leave nothing pending or running
//! - Layer ids stay unique and handles stay with their records

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata_core::{DeclaredLayer, LayerId};
use tracing::trace;

use crate::harness::{InvariantViolation, LayerHarness};
use crate::recording::{ProviderScript, RecordingAdapter};

/// Fuzzer configuration
#[derive(Clone, Debug)]
pub struct FuzzerConfig {
    /// Size of the layer id pool
    pub layer_count: usize,
    /// Number of steps to generate
    pub step_count: usize,
    /// Probability a declaration names an unknown provider
    pub unknown_provider_prob: f64,
    /// Probability a declaration names the rejecting provider
    pub reject_prob: f64,
    /// Probability a step removes layers
    pub remove_prob: f64,
    /// Probability a step settles the current pass
    pub settle_prob: f64,
    /// Slowest construction, in milliseconds
    pub max_delay_ms: u64,
    /// Random seed
    pub seed: u64,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        FuzzerConfig {
            layer_count: 8,
            step_count: 500,
            unknown_provider_prob: 0.05,
            reject_prob: 0.1,
            remove_prob: 0.1,
            settle_prob: 0.25,
            max_delay_ms: 50,
            seed: 42,
        }
    }
}

impl FuzzerConfig {
    /// Light fuzzing for quick tests
    pub fn light() -> Self {
        FuzzerConfig {
            layer_count: 4,
            step_count: 60,
            ..FuzzerConfig::default()
        }
    }

    /// Heavy fuzzing: many ids, rare settles, lots of supersession
    pub fn heavy() -> Self {
        FuzzerConfig {
            layer_count: 32,
            step_count: 5000,
            settle_prob: 0.05,
            max_delay_ms: 200,
            ..FuzzerConfig::default()
        }
    }
}

/// One generated step
#[derive(Debug)]
enum FuzzStep {
    Declare(Vec<DeclaredLayer>),
    Issue,
    Settle,
    Remove(Vec<LayerId>),
    SetOpacity(LayerId, f64),
    Advance(Duration),
}

/// Fuzzing result
#[derive(Debug, Default)]
pub struct FuzzResult {
    pub steps: usize,
    pub settles: u32,
    /// Layer failures reported by settled passes
    pub failures: usize,
    /// Layers materialized after the final pass
    pub materialized: usize,
    pub violations: Vec<InvariantViolation>,
}

impl FuzzResult {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Render fuzzer
pub struct RenderFuzzer {
    config: FuzzerConfig,
    harness: LayerHarness,
    ids: Vec<LayerId>,
    rng: StdRng,
}

impl RenderFuzzer {
    pub fn new(config: FuzzerConfig) -> Self {
        let adapter = RecordingAdapter::new()
            .with_provider("fast", ProviderScript::Resolve(Duration::from_millis(1)))
            .with_provider(
                "slow",
                ProviderScript::Resolve(Duration::from_millis(config.max_delay_ms)),
            )
            .with_provider(
                "flaky",
                ProviderScript::Reject(Duration::from_millis(config.max_delay_ms / 2), "503".into()),
            );
        let ids = (0..config.layer_count)
            .map(|i| LayerId::new(format!("layer-{}", i)))
            .collect();

        RenderFuzzer {
            rng: StdRng::seed_from_u64(config.seed),
            harness: LayerHarness::new(adapter),
            ids,
            config,
        }
    }

    pub fn harness(&self) -> &LayerHarness {
        &self.harness
    }

    /// Run every step, then a final full render
    pub async fn run(&mut self) -> FuzzResult {
        let mut result = FuzzResult::default();

        for _ in 0..self.config.step_count {
            let step = self.generate_step();
            trace!(?step, "fuzz step");
            let settled = matches!(step, FuzzStep::Settle);
            self.apply(step).await;

            result.steps += 1;
            let violations = if settled {
                result.settles += 1;
                self.harness.check_settled()
            } else {
                self.harness.check_invariants()
            };
            merge(&mut result.violations, violations);
        }

        self.harness.issue();
        self.harness.settle().await;
        result.settles += 1;
        merge(&mut result.violations, self.harness.check_settled());

        result.failures = self.harness.failures().len();
        result.materialized = self
            .harness
            .engine()
            .layers()
            .iter()
            .filter(|r| r.is_materialized())
            .count();
        result
    }

    async fn apply(&mut self, step: FuzzStep) {
        match step {
            FuzzStep::Declare(layers) => {
                self.harness.declare(layers);
            }
            FuzzStep::Issue => {
                self.harness.issue();
            }
            FuzzStep::Settle => self.harness.settle().await,
            // ids are picked at random, so removing or pushing to a layer
            // that was never declared is an expected outcome
            FuzzStep::Remove(ids) => {
                let _ = self.harness.engine_mut().remove(ids);
            }
            FuzzStep::SetOpacity(id, opacity) => {
                let _ = self.harness.engine_mut().set_opacity(id, opacity);
            }
            FuzzStep::Advance(duration) => tokio::time::sleep(duration).await,
        }
    }

    fn generate_step(&mut self) -> FuzzStep {
        let roll: f64 = self.rng.gen();
        if roll < self.config.settle_prob {
            return FuzzStep::Settle;
        }
        let roll: f64 = self.rng.gen();
        if roll < self.config.remove_prob {
            let count = self.rng.gen_range(1..=2);
            return FuzzStep::Remove((0..count).map(|_| self.pick_id()).collect());
        }

        match self.rng.gen_range(0..4) {
            0 => {
                let count = self.rng.gen_range(1..=3);
                FuzzStep::Declare((0..count).map(|_| self.generate_layer()).collect())
            }
            1 => FuzzStep::Issue,
            2 => {
                let opacity = self.rng.gen_range(0..=10) as f64 / 10.0;
                FuzzStep::SetOpacity(self.pick_id(), opacity)
            }
            _ => FuzzStep::Advance(Duration::from_millis(
                self.rng.gen_range(0..=self.config.max_delay_ms),
            )),
        }
    }

    fn generate_layer(&mut self) -> DeclaredLayer {
        let roll: f64 = self.rng.gen();
        let provider = if roll < self.config.unknown_provider_prob {
            "unknown"
        } else if roll < self.config.unknown_provider_prob + self.config.reject_prob {
            "flaky"
        } else if self.rng.gen_bool(0.5) {
            "fast"
        } else {
            "slow"
        };

        let mut layer = DeclaredLayer::new(self.pick_id(), provider)
            .with_opacity(self.rng.gen_range(0..=10) as f64 / 10.0)
            .with_z_index(self.rng.gen_range(0..5));
        if self.rng.gen_bool(0.2) {
            layer = layer.with_visibility(false);
        }
        if self.rng.gen_bool(0.3) {
            layer = layer.with_param("t", self.rng.gen_range(0..3u32));
        }
        layer
    }

    fn pick_id(&mut self) -> LayerId {
        let index = self.rng.gen_range(0..self.ids.len());
        self.ids[index].clone()
    }
}

fn merge(into: &mut Vec<InvariantViolation>, violations: Vec<InvariantViolation>) {
    for violation in violations {
        if !into.contains(&violation) {
            into.push(violation);
        }
    }
}

//! Strata Layer Demo
//!
//! Reconciles a declared layer set against the console engine:
//! - Initial render, including a failing provider
//! - In-place updates on re-render
//! - Supersession of a pending materialization
//! - Direct property pushes and removal
//!
//! Usage: `layer-demo [config.json]`. Log filtering follows `RUST_LOG`.

mod console;

use std::env;
use std::error::Error;
use std::fs;
use std::time::Duration;

use serde::Deserialize;
use strata_core::{DeclaredLayer, LayerSelector};
use strata_engine::{EngineConfig, ReconciliationEngine, RenderOutcome};
use tracing_subscriber::EnvFilter;

use console::{ConsoleAdapter, ConsoleLayer};

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Demo configuration file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DemoConfig {
    engine: EngineConfig,
    log_format: LogFormat,
    /// Tile provider latency in milliseconds
    tile_delay_ms: u64,
    /// Layers for the first render; a built-in set when empty
    layers: Vec<DeclaredLayer>,
}

fn load_config(path: Option<&str>) -> Result<DemoConfig, Box<dyn Error>> {
    match path {
        Some(path) => Ok(serde_json::from_str(&fs::read_to_string(path)?)?),
        None => Ok(DemoConfig {
            tile_delay_ms: 30,
            ..DemoConfig::default()
        }),
    }
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn default_layers() -> Vec<DeclaredLayer> {
    vec![
        DeclaredLayer::new("basemap", "tiles").with_z_index(0),
        DeclaredLayer::new("labels", "tiles")
            .with_z_index(2)
            .on("click", |payload| println!("   labels clicked: {}", payload)),
        DeclaredLayer::new("parcels", "geojson").with_z_index(1),
        DeclaredLayer::new("heatmap", "webgl").with_opacity(0.6),
    ]
}

fn print_outcome(outcome: &RenderOutcome<'_, ConsoleLayer>) {
    for record in outcome.layers {
        let state = if record.is_materialized() { "live" } else { "not rendered" };
        println!("   {:<10} {:<9} {}", record.id().as_str(), record.provider(), state);
    }
    for failure in &outcome.failures {
        println!("   ! {}: {}", failure.id, failure.error);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let path = env::args().nth(1);
    let config = load_config(path.as_deref())?;
    init_logging(config.log_format);

    let layers = if config.layers.is_empty() {
        default_layers()
    } else {
        config.layers
    };
    let adapter = ConsoleAdapter::new(Duration::from_millis(config.tile_delay_ms));
    let mut engine = ReconciliationEngine::with_config(adapter, config.engine)?;

    println!("=== Strata Layer Demo ===\n");

    // 1. Initial render
    println!("1. Initial render");
    let outcome = engine.add(layers).await?;
    print_outcome(&outcome);
    engine.adapter().print_map();

    // 2. Re-render with changes: only the differences reach the engine
    println!("\n2. Fade the basemap, hide the labels");
    let outcome = engine
        .add([
            DeclaredLayer::new("basemap", "tiles").with_opacity(0.5),
            DeclaredLayer::new("labels", "tiles")
                .with_z_index(2)
                .with_visibility(false),
        ])
        .await?;
    print_outcome(&outcome);
    engine.adapter().print_map();

    // 3. A second pass while a layer is still materializing
    println!("\n3. Redeclare a layer before it finished loading");
    let options = engine.config().default_options.clone();
    engine.declare([DeclaredLayer::new("roads", "tiles").with_z_index(3)], &options)?;
    engine.issue();
    engine.declare([DeclaredLayer::new("roads", "tiles").with_z_index(4)], &options)?;
    let summary = engine.issue();
    println!(
        "   started {}, superseded {}",
        summary.started, summary.superseded
    );
    let outcome = engine.settle().await;
    print_outcome(&outcome);
    engine.adapter().print_map();

    // 4. Direct pushes bypass the diff
    println!("\n4. Push opacity directly");
    let report = engine.set_opacity(["roads", "missing"], 0.8)?;
    println!("   pushed {:?}, missing {:?}", report.pushed, report.missing);
    engine.adapter().print_map();

    // 5. Removal
    println!("\n5. Remove labels, then everything");
    engine.remove("labels")?;
    engine.adapter().print_map();
    let report = engine.remove(LayerSelector::All)?;
    println!("   removed {:?}", report.removed);

    Ok(())
}

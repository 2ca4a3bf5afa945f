//! Console engine
//!
//! A stand-in rendering engine that keeps layer state in memory and logs each
//! adapter call. Two providers are known:
//! - `tiles`: resolves after a short delay
//! - `geojson`: fetches the document at `layer_config.url` and counts its features

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use strata_core::{LayerId, LayerRecord};
use strata_engine::{AdapterError, AdapterResult, CapabilitySet, ConstructionRoutine, EngineAdapter};
use strata_ops::{CancellableOperation, FetchClient, OperationError, Outcome};
use tracing::info;

/// Layer living in the console engine
#[derive(Debug, Clone)]
pub struct ConsoleLayer {
    pub id: LayerId,
    pub provider: String,
    pub features: usize,
}

#[derive(Debug, Clone)]
struct Placement {
    opacity: f64,
    visible: bool,
    z_index: i32,
    events: Vec<String>,
}

impl Default for Placement {
    fn default() -> Self {
        Placement {
            opacity: 1.0,
            visible: true,
            z_index: 0,
            events: Vec::new(),
        }
    }
}

pub struct ConsoleAdapter {
    client: FetchClient,
    tile_delay: Duration,
    /// Layers currently on the map
    map: BTreeMap<LayerId, Placement>,
}

impl ConsoleAdapter {
    pub fn new(tile_delay: Duration) -> Self {
        ConsoleAdapter {
            client: FetchClient::new(),
            tile_delay,
            map: BTreeMap::new(),
        }
    }

    fn placement(&mut self, record: &LayerRecord<ConsoleLayer>) -> AdapterResult<&mut Placement> {
        self.map
            .get_mut(record.id())
            .ok_or_else(|| AdapterError::NotMaterialized(record.id().clone()))
    }

    /// Print the map, bottom layer first
    pub fn print_map(&self) {
        let mut layers: Vec<_> = self.map.iter().collect();
        layers.sort_by_key(|(_, p)| p.z_index);

        println!("   layer          z-index  opacity  shown   events");
        for (id, p) in layers {
            println!(
                "   {:<14} {:>7}  {:>7.2}  {:<6}  {}",
                id.as_str(),
                p.z_index,
                p.opacity,
                p.visible,
                p.events.join(",")
            );
        }
    }

    fn tiles(&self) -> ConstructionRoutine<ConsoleLayer> {
        let delay = self.tile_delay;
        Arc::new(move |record: &LayerRecord<ConsoleLayer>| {
            let layer = ConsoleLayer {
                id: record.id().clone(),
                provider: record.provider().to_string(),
                features: 0,
            };
            CancellableOperation::from_future(async move {
                tokio::time::sleep(delay).await;
                Ok(layer)
            })
        })
    }

    fn geojson(&self) -> ConstructionRoutine<ConsoleLayer> {
        let client = self.client.clone();
        Arc::new(move |record: &LayerRecord<ConsoleLayer>| {
            let Some(url) = record
                .declared()
                .layer_config
                .get("url")
                .and_then(Value::as_str)
            else {
                return CancellableOperation::rejected(OperationError::Failed(
                    "geojson layers need layer_config.url".into(),
                ));
            };

            let id = record.id().clone();
            let provider = record.provider().to_string();
            let fetch = client.get(url);
            let abort = fetch.canceller();

            CancellableOperation::new(move |on_cancel| {
                on_cancel.register(move || {
                    abort.cancel();
                });
                async move {
                    let response = match fetch.join().await {
                        Outcome::Fulfilled(response) => response,
                        Outcome::Rejected(err) => return Err(err),
                        Outcome::Cancelled => return Err(OperationError::Cancelled),
                    };
                    let document = match response.error_for_status().and_then(|r| r.json::<Value>()) {
                        Ok(document) => document,
                        Err(err) => return Err(err),
                    };
                    let features = document
                        .get("features")
                        .and_then(Value::as_array)
                        .map_or(0, Vec::len);
                    Ok(ConsoleLayer {
                        id,
                        provider,
                        features,
                    })
                }
            })
        })
    }
}

impl EngineAdapter for ConsoleAdapter {
    type Handle = ConsoleLayer;

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::REQUIRED
    }

    fn add(&mut self, record: &LayerRecord<ConsoleLayer>) -> AdapterResult<()> {
        let features = record.handle().map_or(0, |layer| layer.features);
        info!(layer = %record.id(), provider = record.provider(), features, "add");
        self.map.insert(record.id().clone(), Placement::default());
        Ok(())
    }

    fn remove(&mut self, record: &LayerRecord<ConsoleLayer>) -> AdapterResult<()> {
        info!(layer = %record.id(), "remove");
        self.map.remove(record.id());
        Ok(())
    }

    fn set_visibility(&mut self, record: &LayerRecord<ConsoleLayer>, visible: bool) -> AdapterResult<()> {
        info!(layer = %record.id(), visible, "setVisibility");
        self.placement(record)?.visible = visible;
        Ok(())
    }

    fn set_opacity(&mut self, record: &LayerRecord<ConsoleLayer>, opacity: f64) -> AdapterResult<()> {
        info!(layer = %record.id(), opacity, "setOpacity");
        self.placement(record)?.opacity = opacity;
        Ok(())
    }

    fn set_events(&mut self, record: &LayerRecord<ConsoleLayer>) -> AdapterResult<()> {
        let events: Vec<String> = record.events().iter().map(|(e, _)| e.to_string()).collect();
        info!(layer = %record.id(), ?events, "setEvents");
        self.placement(record)?.events = events;
        Ok(())
    }

    fn set_z_index(&mut self, record: &LayerRecord<ConsoleLayer>, z_index: i32) -> AdapterResult<()> {
        info!(layer = %record.id(), z_index, "setZIndex");
        self.placement(record)?.z_index = z_index;
        Ok(())
    }

    fn set_layer_config(&mut self, record: &LayerRecord<ConsoleLayer>) -> AdapterResult<()> {
        info!(layer = %record.id(), config = ?record.declared().layer_config, "setLayerConfig");
        Ok(())
    }

    fn set_params(&mut self, record: &LayerRecord<ConsoleLayer>) -> AdapterResult<()> {
        let declared = record.declared();
        info!(
            layer = %record.id(),
            params = ?declared.params,
            sql_params = ?declared.sql_params,
            "setParams"
        );
        Ok(())
    }

    fn set_decode_params(&mut self, record: &LayerRecord<ConsoleLayer>) -> AdapterResult<()> {
        info!(layer = %record.id(), decode = ?record.declared().decode_params, "setDecodeParams");
        Ok(())
    }

    fn layer_by_provider(&self, provider: &str) -> Option<ConstructionRoutine<ConsoleLayer>> {
        match provider {
            "tiles" => Some(self.tiles()),
            "geojson" => Some(self.geojson()),
            _ => None,
        }
    }
}

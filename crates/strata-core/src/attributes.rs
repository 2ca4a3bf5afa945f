//! Layer attributes
//!
//! A [`DeclaredLayer`] is what callers hand to the engine. Missing style
//! values are filled from [`LayerOptions`] to produce the resolved
//! [`LayerAttributes`] stored on a record.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{LayerError, LayerId, LayerResult};

/// Opaque key/value group (query params, decode params, provider config)
pub type AttributeMap = serde_json::Map<String, Value>;

/// Callback bound to a named layer event
///
/// Handlers compare by identity: rebinding the same handler is not a change.
#[derive(Clone)]
pub struct EventHandler(Arc<dyn Fn(&Value) + Send + Sync>);

impl EventHandler {
    pub fn new(handler: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        EventHandler(Arc::new(handler))
    }

    /// Invoke the handler with an engine event payload
    pub fn call(&self, payload: &Value) {
        (self.0)(payload)
    }
}

impl PartialEq for EventHandler {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventHandler({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

/// Event name to handler bindings
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventBindings(BTreeMap<String, EventHandler>);

impl EventBindings {
    pub fn new() -> Self {
        EventBindings::default()
    }

    /// Bind a handler, replacing any previous handler for the event
    pub fn bind(&mut self, event: impl Into<String>, handler: EventHandler) {
        self.0.insert(event.into(), handler);
    }

    pub fn get(&self, event: &str) -> Option<&EventHandler> {
        self.0.get(event)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EventHandler)> {
        self.0.iter().map(|(name, handler)| (name.as_str(), handler))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Defaults applied to declared layers that leave a style value unset
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerOptions {
    pub opacity: f64,
    pub visibility: bool,
    pub z_index: i32,
    pub interactivity: Option<Value>,
}

impl Default for LayerOptions {
    fn default() -> Self {
        LayerOptions {
            opacity: 1.0,
            visibility: true,
            z_index: 0,
            interactivity: None,
        }
    }
}

impl LayerOptions {
    pub fn validate(&self) -> LayerResult<()> {
        validate_opacity(self.opacity)
    }
}

/// Check that an opacity is a finite value in `[0, 1]`
pub fn validate_opacity(opacity: f64) -> LayerResult<()> {
    if opacity.is_finite() && (0.0..=1.0).contains(&opacity) {
        Ok(())
    } else {
        Err(LayerError::InvalidDeclaration(format!(
            "opacity must be within [0, 1], got {}",
            opacity
        )))
    }
}

/// Resolved attributes of a layer, as declared or as last applied
#[derive(Clone, Debug, PartialEq)]
pub struct LayerAttributes {
    pub opacity: f64,
    pub visibility: bool,
    pub z_index: i32,
    /// Query parameters
    pub params: AttributeMap,
    /// Filter parameters for SQL-backed providers
    pub sql_params: AttributeMap,
    pub decode_params: AttributeMap,
    /// Provider specific layer configuration
    pub layer_config: AttributeMap,
    pub events: EventBindings,
    pub interactivity: Option<Value>,
}

impl Default for LayerAttributes {
    fn default() -> Self {
        LayerAttributes::from_options(&LayerOptions::default())
    }
}

impl LayerAttributes {
    /// Attributes carrying only the option defaults
    pub fn from_options(options: &LayerOptions) -> Self {
        LayerAttributes {
            opacity: options.opacity,
            visibility: options.visibility,
            z_index: options.z_index,
            params: AttributeMap::new(),
            sql_params: AttributeMap::new(),
            decode_params: AttributeMap::new(),
            layer_config: AttributeMap::new(),
            events: EventBindings::new(),
            interactivity: options.interactivity.clone(),
        }
    }

    /// Opacity the engine should show, zero while hidden
    pub fn effective_opacity(&self) -> f64 {
        if self.visibility {
            self.opacity
        } else {
            0.0
        }
    }
}

/// A layer as declared by the caller
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeclaredLayer {
    pub id: LayerId,
    pub provider: String,
    pub opacity: Option<f64>,
    pub visibility: Option<bool>,
    pub z_index: Option<i32>,
    pub params: AttributeMap,
    pub sql_params: AttributeMap,
    pub decode_params: AttributeMap,
    pub layer_config: AttributeMap,
    #[serde(skip)]
    pub events: EventBindings,
    pub interactivity: Option<Value>,
}

impl DeclaredLayer {
    pub fn new(id: impl Into<LayerId>, provider: impl Into<String>) -> Self {
        DeclaredLayer {
            id: id.into(),
            provider: provider.into(),
            ..DeclaredLayer::default()
        }
    }

    pub fn with_opacity(mut self, opacity: f64) -> Self {
        self.opacity = Some(opacity);
        self
    }

    pub fn with_visibility(mut self, visibility: bool) -> Self {
        self.visibility = Some(visibility);
        self
    }

    pub fn with_z_index(mut self, z_index: i32) -> Self {
        self.z_index = Some(z_index);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_sql_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.sql_params.insert(key.into(), value.into());
        self
    }

    pub fn with_decode_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.decode_params.insert(key.into(), value.into());
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.layer_config.insert(key.into(), value.into());
        self
    }

    pub fn with_interactivity(mut self, interactivity: impl Into<Value>) -> Self {
        self.interactivity = Some(interactivity.into());
        self
    }

    /// Bind an event handler
    pub fn on(
        mut self,
        event: impl Into<String>,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Self {
        self.events.bind(event, EventHandler::new(handler));
        self
    }

    /// Reject declarations the engine cannot reconcile
    pub fn validate(&self) -> LayerResult<()> {
        if self.id.is_empty() {
            return Err(LayerError::InvalidDeclaration(
                "layer id must not be empty".into(),
            ));
        }
        if self.provider.is_empty() {
            return Err(LayerError::InvalidDeclaration(format!(
                "layer {} has no provider",
                self.id
            )));
        }
        if let Some(opacity) = self.opacity {
            validate_opacity(opacity)?;
        }
        Ok(())
    }

    /// Merge with options: values set on the layer win, options fill the rest
    pub fn resolve(&self, options: &LayerOptions) -> LayerAttributes {
        LayerAttributes {
            opacity: self.opacity.unwrap_or(options.opacity),
            visibility: self.visibility.unwrap_or(options.visibility),
            z_index: self.z_index.unwrap_or(options.z_index),
            params: self.params.clone(),
            sql_params: self.sql_params.clone(),
            decode_params: self.decode_params.clone(),
            layer_config: self.layer_config.clone(),
            events: self.events.clone(),
            interactivity: self
                .interactivity
                .clone()
                .or_else(|| options.interactivity.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_options_fill_unset_values() {
        let options = LayerOptions {
            opacity: 0.8,
            visibility: false,
            z_index: 3,
            interactivity: Some(json!(["name"])),
        };
        let layer = DeclaredLayer::new("a", "wms").with_z_index(7);

        let attrs = layer.resolve(&options);
        assert_eq!(attrs.opacity, 0.8);
        assert!(!attrs.visibility);
        assert_eq!(attrs.z_index, 7);
        assert_eq!(attrs.interactivity, Some(json!(["name"])));
    }

    #[test]
    fn test_default_options() {
        let attrs = DeclaredLayer::new("a", "wms").resolve(&LayerOptions::default());
        assert_eq!(attrs.opacity, 1.0);
        assert!(attrs.visibility);
        assert_eq!(attrs.z_index, 0);
        assert_eq!(attrs.interactivity, None);
    }

    #[test]
    fn test_validation() {
        assert!(DeclaredLayer::new("a", "wms").validate().is_ok());
        assert!(DeclaredLayer::new("", "wms").validate().is_err());
        assert!(DeclaredLayer::new("a", "").validate().is_err());
        assert!(DeclaredLayer::new("a", "wms")
            .with_opacity(f64::NAN)
            .validate()
            .is_err());
        assert!(DeclaredLayer::new("a", "wms")
            .with_opacity(1.5)
            .validate()
            .is_err());
    }

    #[test]
    fn test_event_handlers_compare_by_identity() {
        let handler = EventHandler::new(|_| {});
        let mut a = EventBindings::new();
        let mut b = EventBindings::new();
        a.bind("click", handler.clone());
        b.bind("click", handler);
        assert_eq!(a, b);

        b.bind("click", EventHandler::new(|_| {}));
        assert_ne!(a, b);
    }

    #[test]
    fn test_effective_opacity() {
        let mut attrs = LayerAttributes::default();
        attrs.opacity = 0.4;
        assert_eq!(attrs.effective_opacity(), 0.4);
        attrs.visibility = false;
        assert_eq!(attrs.effective_opacity(), 0.0);
    }

    #[test]
    fn test_declared_layer_from_json() {
        let layer: DeclaredLayer = serde_json::from_value(json!({
            "id": "roads",
            "provider": "carto",
            "opacity": 0.5,
            "sql_params": { "where": "type = 'highway'" }
        }))
        .unwrap();
        assert_eq!(layer.id, "roads");
        assert_eq!(layer.opacity, Some(0.5));
        assert_eq!(layer.sql_params.len(), 1);
        assert!(layer.events.is_empty());
    }
}

use crate::config::{Config, ServiceMetadata};
use crate::descriptor::LayerDescriptor;
use crate::errors::{ConfigError, ResolutionError};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// A configuration problem that doesn't prevent the layer from working.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Diagnostic {
    pub layer: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer {}: {}", self.layer, self.message)
    }
}

/// All configured layers. Never modified after it is built; a reload builds
/// a new registry.
#[derive(Debug)]
pub struct Registry {
    service: ServiceMetadata,
    layers: IndexMap<String, Arc<LayerDescriptor>>,
    diagnostics: Vec<Diagnostic>,
}

impl Registry {
    pub fn build(config: &Config) -> Result<Self, ConfigError> {
        let mut layers = IndexMap::new();
        let mut diagnostics = Vec::new();

        for (name, layer_config) in config.layers.entries() {
            if layers.contains_key(name) {
                return Err(ConfigError::DuplicateLayer(name.to_string()));
            }

            let mut messages = Vec::new();
            let layer =
                LayerDescriptor::from_config(name, layer_config, &config.globals, &mut messages)?;
            for message in messages {
                tracing::warn!(layer = name, "{message}");
                diagnostics.push(Diagnostic {
                    layer: name.to_string(),
                    message,
                });
            }
            layers.insert(name.to_string(), Arc::new(layer));
        }

        tracing::info!(
            layers = layers.len(),
            diagnostics = diagnostics.len(),
            "built layer registry"
        );

        Ok(Registry {
            service: config.service.md.clone(),
            layers,
            diagnostics,
        })
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<LayerDescriptor>, ResolutionError> {
        self.layers
            .get(name)
            .cloned()
            .ok_or_else(|| ResolutionError::UnknownLayer(name.to_string()))
    }

    /// Layers in configuration order.
    pub fn layers(&self) -> impl Iterator<Item = &Arc<LayerDescriptor>> {
        self.layers.values()
    }

    pub fn service(&self) -> &ServiceMetadata {
        &self.service
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

/// Registry handle shared by all requests. Requests work on a snapshot, so a
/// reload never changes the layers of a request in progress.
#[derive(Clone)]
pub struct SharedRegistry {
    current: Arc<RwLock<Arc<Registry>>>,
}

impl SharedRegistry {
    pub fn new(registry: Registry) -> Self {
        SharedRegistry {
            current: Arc::new(RwLock::new(Arc::new(registry))),
        }
    }

    pub fn snapshot(&self) -> Arc<Registry> {
        Arc::clone(&self.current.read())
    }

    pub fn replace(&self, registry: Registry) {
        *self.current.write() = Arc::new(registry);
    }

    /// Builds a registry from `config` and swaps it in. The current registry
    /// stays in place if the build fails.
    pub fn reload(&self, config: &Config) -> Result<(), ConfigError> {
        let registry = Registry::build(config)?;
        self.replace(registry);
        tracing::info!("layer registry reloaded");
        Ok(())
    }
}

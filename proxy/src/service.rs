use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::errors::{ConfigError, ProxyError};
use crate::metrics_defs::DISPATCH_ERRORS;
use crate::output::Response;
use crate::registry::{Registry, SharedRegistry};
use crate::resolver::{ClientParams, resolve};
use crate::transport::Transport;
use shared::counter;
use std::sync::Arc;
use store::CacheStore;

/// Entry point for map requests: looks up the layer, resolves the request
/// parameters and dispatches the resulting plan.
pub struct MapService {
    registry: SharedRegistry,
    dispatcher: Dispatcher,
}

impl MapService {
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CacheStore>,
    ) -> Result<Self, ConfigError> {
        Ok(MapService {
            registry: SharedRegistry::new(Registry::build(config)?),
            dispatcher: Dispatcher::new(transport, store),
        })
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub async fn handle(&self, layer: &str, params: ClientParams) -> Result<Response, ProxyError> {
        // The snapshot keeps the layer alive across a concurrent reload
        let registry = self.registry.snapshot();
        let descriptor = registry.lookup(layer)?;
        let plan = resolve(&descriptor, params)?;

        let result = match &plan.feature_info {
            Some(query) => self
                .dispatcher
                .feature_info(&plan, query)
                .await
                .map(Response::FeatureInfo),
            None => self.dispatcher.dispatch(&plan).await.map(Response::Map),
        };

        result.map_err(|e| {
            counter!(DISPATCH_ERRORS, "layer" => layer.to_string(), "kind" => e.kind())
                .increment(1);
            tracing::error!(layer, error = %e, "request failed");
            ProxyError::from(e)
        })
    }
}

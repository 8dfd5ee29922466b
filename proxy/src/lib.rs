//! Caching map proxy core.
//!
//! Layers are built once from configuration into a [`Registry`]. Each client
//! request is resolved against its layer into a [`RequestPlan`], which the
//! [`Dispatcher`] executes against the layer's sources, caching what the
//! sources allow and merging multi-source results.
pub mod cache_key;
pub mod config;
pub mod descriptor;
pub mod dispatcher;
pub mod errors;
pub mod format;
mod inflight;
pub mod merge;
pub mod metrics_defs;
pub mod output;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod spatial;
pub mod transport;
pub mod wms;

#[cfg(test)]
mod testutils;

pub use config::Config;
pub use dispatcher::Dispatcher;
pub use errors::{ConfigError, DispatchError, ProxyError, ResolutionError};
pub use registry::{Registry, SharedRegistry};
pub use resolver::{ClientParams, RequestPlan, resolve};
pub use service::MapService;

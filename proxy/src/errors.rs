use crate::spatial::BBox;

/// Invalid layer configuration. Fatal at startup.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("duplicate layer name: {0}")]
    DuplicateLayer(String),
    #[error("empty layer name")]
    EmptyLayerName,
    #[error("layer {layer}: no sources configured")]
    NoSources { layer: String },
    #[error("layer {layer}: unknown source type {kind:?} (expected direct, cache_wms or cache_tms)")]
    UnknownSourceType { layer: String, kind: String },
    #[error("layer {layer}: unsupported WMS version {version:?} (expected 1.0.0, 1.1.1 or 1.3.0)")]
    UnsupportedVersion { layer: String, version: String },
    #[error("layer {layer}: invalid bbox: {reason}")]
    InvalidBBox { layer: String, reason: String },
    #[error("layer {layer}: unsupported format {format:?}")]
    UnsupportedFormat { layer: String, format: String },
    #[error("unsupported default format {0:?}")]
    UnsupportedDefaultFormat(String),
    #[error("layer {layer}: invalid cache_dir {cache_dir:?}")]
    InvalidCacheDir { layer: String, cache_dir: String },
    #[error("layer {layer}: source {index}: {reason}")]
    InvalidSource {
        layer: String,
        index: usize,
        reason: String,
    },
}

/// Client request that can't be served by the layer. Raised before any
/// upstream call.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ResolutionError {
    #[error("unknown layer: {0}")]
    UnknownLayer(String),
    #[error("layer {layer} does not support SRS {srs:?}")]
    UnsupportedSrs { layer: String, srs: Option<String> },
    #[error("layer {layer} does not support format {format:?}")]
    UnsupportedFormat { layer: String, format: String },
    #[error("bbox {bbox} is outside of layer {layer}")]
    OutOfBounds { layer: String, bbox: BBox },
    #[error("layer {layer} needs a tile coordinate")]
    MissingTileCoord { layer: String },
    #[error("layer {layer} is not queryable")]
    FeatureInfoNotSupported { layer: String },
}

/// Failure while serving a resolved request. The whole request fails, there
/// are no retries.
///
/// Cloneable because one result is handed to every request waiting on the
/// same coalesced fetch.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("upstream error from {source_id}: {reason}")]
    Upstream { source_id: String, reason: String },
    #[error("timeout waiting for {source_id}")]
    TransportTimeout { source_id: String },
    #[error("cache store error for {key}: {reason}")]
    CacheStore { key: String, reason: String },
    #[error("could not encode merged image: {0}")]
    Encode(String),
}

impl DispatchError {
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Upstream { .. } => "upstream",
            DispatchError::TransportTimeout { .. } => "timeout",
            DispatchError::CacheStore { .. } => "cache_store",
            DispatchError::Encode(_) => "encode",
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl ProxyError {
    /// True if the request itself was at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ProxyError::Resolution(_))
    }
}

use crate::cache_key::CacheKey;
use crate::descriptor::{LayerDescriptor, SourceDescriptor};
use crate::errors::DispatchError;
use crate::format::OutputFormat;
use crate::inflight::InFlight;
use crate::merge::{MergeError, encode, merge};
use crate::metrics_defs::{CACHE_HIT, CACHE_MISS, CACHE_SINGLE_COLOR_LINKED, CACHE_STORE_ERROR};
use crate::output::{FeatureInfo, Image};
use crate::resolver::{FeatureInfoQuery, RequestPlan};
use crate::spatial::SpatialParams;
use crate::transport::{Transport, TransportError, UpstreamRequest};
use crate::wms;
use bytes::Bytes;
use futures::future::try_join_all;
use shared::counter;
use std::sync::Arc;
use store::{CacheStore, StoreError};

/// Executes request plans against the configured sources.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CacheStore>,
    in_flight: InFlight,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn CacheStore>) -> Self {
        Dispatcher {
            transport,
            store,
            in_flight: InFlight::new(),
        }
    }

    /// Renders the map image of `plan`, merging the results of all sources.
    pub async fn dispatch(&self, plan: &RequestPlan) -> Result<Image, DispatchError> {
        let layer = &plan.layer;

        let images = if layer.concurrent_sources && layer.sources.len() > 1 {
            // try_join_all keeps the input order, whatever order the fetches finish in
            try_join_all(
                layer
                    .sources
                    .iter()
                    .enumerate()
                    .map(|(index, source)| self.dispatch_source(plan, index, source)),
            )
            .await?
        } else {
            let mut images = Vec::with_capacity(layer.sources.len());
            for (index, source) in layer.sources.iter().enumerate() {
                images.push(self.dispatch_source(plan, index, source).await?);
            }
            images
        };

        merge(&images, plan.format).map_err(|e| match e {
            MergeError::Decode { index, reason } => DispatchError::Upstream {
                source_id: layer.source_id(index),
                reason: format!("invalid image: {reason}"),
            },
            other => DispatchError::Encode(other.to_string()),
        })
    }

    /// Forwards a GetFeatureInfo request to every queryable source and
    /// concatenates the responses in source order. Never cached.
    pub async fn feature_info(
        &self,
        plan: &RequestPlan,
        query: &FeatureInfoQuery,
    ) -> Result<FeatureInfo, DispatchError> {
        let layer = &plan.layer;
        let mut data = Vec::new();
        let mut content_type = None;

        for (index, source) in layer.sources.iter().enumerate() {
            let SourceDescriptor::CacheWms {
                request,
                version,
                featureinfo: true,
            } = source
            else {
                continue;
            };

            let upstream = UpstreamRequest {
                url: wms::feature_info_url(
                    request,
                    *version,
                    &plan.spatial,
                    plan.format,
                    query,
                    &plan.extra,
                ),
                credentials: request.credentials.clone(),
                expect_image: false,
            };
            let response = self
                .transport
                .fetch(&upstream)
                .await
                .map_err(|e| transport_error(&layer.source_id(index), e))?;

            if content_type.is_none() {
                content_type = response.content_type;
            }
            data.extend_from_slice(&response.data);
        }

        Ok(FeatureInfo {
            data: data.into(),
            content_type,
        })
    }

    async fn dispatch_source(
        &self,
        plan: &RequestPlan,
        index: usize,
        source: &SourceDescriptor,
    ) -> Result<Image, DispatchError> {
        let layer = &plan.layer;
        let source_id = layer.source_id(index);

        match source {
            SourceDescriptor::Direct { request } => {
                let upstream = UpstreamRequest {
                    url: wms::map_url(
                        request,
                        plan.version,
                        &plan.spatial,
                        plan.format,
                        &plan.extra,
                    ),
                    credentials: request.credentials.clone(),
                    expect_image: true,
                };
                self.fetch_image(&source_id, &upstream, plan.format).await
            }
            SourceDescriptor::CacheWms {
                request, version, ..
            } => {
                let key = CacheKey::derive(
                    &layer.cache_dir,
                    source,
                    &plan.spatial,
                    plan.format,
                    Some(*version),
                );
                let upstream = UpstreamRequest {
                    url: wms::map_url(request, *version, &plan.spatial, plan.format, &[]),
                    credentials: request.credentials.clone(),
                    expect_image: true,
                };
                self.cached(layer, source, &source_id, key, upstream, plan.format)
                    .await
            }
            SourceDescriptor::CacheTms {
                url_template,
                credentials,
            } => {
                let tile = plan.spatial.tile.ok_or_else(|| DispatchError::Upstream {
                    source_id: source_id.clone(),
                    reason: "tile coordinate required".to_string(),
                })?;
                let url = wms::tile_url(url_template, tile, plan.format).map_err(|e| {
                    DispatchError::Upstream {
                        source_id: source_id.clone(),
                        reason: format!("invalid tile URL: {e}"),
                    }
                })?;

                // Tiles are addressed by their coordinate alone
                let spatial = SpatialParams {
                    tile: Some(tile),
                    ..Default::default()
                };
                let key = CacheKey::derive(&layer.cache_dir, source, &spatial, plan.format, None);
                let upstream = UpstreamRequest {
                    url,
                    credentials: credentials.clone(),
                    expect_image: true,
                };
                self.cached(layer, source, &source_id, key, upstream, plan.format)
                    .await
            }
        }
    }

    async fn cached(
        &self,
        layer: &LayerDescriptor,
        source: &SourceDescriptor,
        source_id: &str,
        key: CacheKey,
        upstream: UpstreamRequest,
        format: OutputFormat,
    ) -> Result<Image, DispatchError> {
        let kind = source.kind().as_str();

        match self.store.get(key.as_str()).await {
            Ok(Some(data)) => {
                counter!(CACHE_HIT, "layer" => layer.name.clone(), "source_kind" => kind)
                    .increment(1);
                tracing::debug!(key = %key, "cache hit");
                return Ok(Image::new(data, format.mime_type()));
            }
            Ok(None) => {}
            Err(e) => self.store_failed(layer, &key, "get", e)?,
        }

        counter!(CACHE_MISS, "layer" => layer.name.clone(), "source_kind" => kind).increment(1);
        tracing::debug!(key = %key, "cache miss");

        self.in_flight
            .run(key.as_str(), || async {
                // A flight for this key may have finished and stored its image
                // after the lookup above
                if let Ok(Some(data)) = self.store.get(key.as_str()).await {
                    tracing::debug!(key = %key, "stored by concurrent request");
                    return Ok(Image::new(data, format.mime_type()));
                }

                let image = self.fetch_image(source_id, &upstream, format).await?;
                self.store_image(layer, &key, &image, format).await?;
                Ok::<_, DispatchError>(image)
            })
            .await
    }

    async fn store_image(
        &self,
        layer: &LayerDescriptor,
        key: &CacheKey,
        image: &Image,
        format: OutputFormat,
    ) -> Result<(), DispatchError> {
        if layer.link_single_color_images
            && let Some(rgba) = image.single_color()
        {
            let target = CacheKey::single_color(&layer.cache_dir, rgba, format);
            if let Err(e) = self.store.put(target.as_str(), image.data.clone()).await {
                return self.store_failed(layer, &target, "put", e);
            }
            if let Err(e) = self.store.link(key.as_str(), target.as_str()).await {
                return self.store_failed(layer, key, "link", e);
            }
            counter!(CACHE_SINGLE_COLOR_LINKED).increment(1);
            tracing::debug!(key = %key, target = %target, "linked single color image");
            return Ok(());
        }

        if let Err(e) = self.store.put(key.as_str(), image.data.clone()).await {
            return self.store_failed(layer, key, "put", e);
        }
        Ok(())
    }

    /// Failed store operations are logged and otherwise ignored, unless the
    /// layer asks for strict cache handling.
    fn store_failed(
        &self,
        layer: &LayerDescriptor,
        key: &CacheKey,
        operation: &'static str,
        error: StoreError,
    ) -> Result<(), DispatchError> {
        counter!(CACHE_STORE_ERROR, "operation" => operation).increment(1);
        if layer.strict_cache {
            return Err(DispatchError::CacheStore {
                key: key.to_string(),
                reason: error.to_string(),
            });
        }
        tracing::warn!(key = %key, operation, error = %error, "cache store failed");
        Ok(())
    }

    async fn fetch_image(
        &self,
        source_id: &str,
        upstream: &UpstreamRequest,
        format: OutputFormat,
    ) -> Result<Image, DispatchError> {
        let response = self
            .transport
            .fetch(upstream)
            .await
            .map_err(|e| transport_error(source_id, e))?;
        normalize_image(source_id, response.data, format)
    }
}

/// Checks that `data` is a decodable image and converts it to `format` if the
/// upstream sent something else.
fn normalize_image(
    source_id: &str,
    data: Bytes,
    format: OutputFormat,
) -> Result<Image, DispatchError> {
    let decoded = image::load_from_memory(&data).map_err(|e| DispatchError::Upstream {
        source_id: source_id.to_string(),
        reason: format!("invalid image: {e}"),
    })?;

    match image::guess_format(&data) {
        Ok(actual) if actual == format.image_format() => Ok(Image::new(data, format.mime_type())),
        actual => {
            tracing::debug!(
                source_id,
                actual = ?actual.ok(),
                expected = format.mime_type(),
                "re-encoding upstream image"
            );
            encode(decoded, format).map_err(|e| DispatchError::Encode(e.to_string()))
        }
    }
}

fn transport_error(source_id: &str, error: TransportError) -> DispatchError {
    match error {
        TransportError::Timeout { .. } => DispatchError::TransportTimeout {
            source_id: source_id.to_string(),
        },
        other => DispatchError::Upstream {
            source_id: source_id.to_string(),
            reason: other.to_string(),
        },
    }
}

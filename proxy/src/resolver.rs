use crate::descriptor::{LayerDescriptor, WmsVersion};
use crate::errors::ResolutionError;
use crate::format::OutputFormat;
use crate::spatial::{BBox, BBoxPolicy, SpatialParams, TileCoord};
use std::sync::Arc;

/// Request parameters as sent by a client, already split into fields.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClientParams {
    pub srs: Option<String>,
    /// MIME type or short format name
    pub format: Option<String>,
    pub bbox: Option<BBox>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub version: Option<WmsVersion>,
    pub tile: Option<TileCoord>,
    pub feature_info: Option<FeatureInfoQuery>,
    /// Other query parameters, forwarded to direct sources
    pub extra: Vec<(String, String)>,
}

/// Pixel position of a GetFeatureInfo request.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureInfoQuery {
    pub x: u32,
    pub y: u32,
    pub info_format: Option<String>,
}

/// A validated request against one layer.
#[derive(Clone, Debug)]
pub struct RequestPlan {
    pub layer: Arc<LayerDescriptor>,
    pub spatial: SpatialParams,
    pub format: OutputFormat,
    /// Version the client spoke. Direct sources are queried with it.
    pub version: WmsVersion,
    pub feature_info: Option<FeatureInfoQuery>,
    pub extra: Vec<(String, String)>,
}

/// Checks `params` against the constraints of `layer`.
pub fn resolve(
    layer: &Arc<LayerDescriptor>,
    params: ClientParams,
) -> Result<RequestPlan, ResolutionError> {
    if !layer.srs_list.is_empty() {
        let supported = params
            .srs
            .as_ref()
            .is_some_and(|srs| layer.srs_list.contains(srs));
        if !supported {
            return Err(ResolutionError::UnsupportedSrs {
                layer: layer.name.clone(),
                srs: params.srs,
            });
        }
    }

    let format = match &params.format {
        None => layer.format,
        Some(requested) => {
            let unsupported = || ResolutionError::UnsupportedFormat {
                layer: layer.name.clone(),
                format: requested.clone(),
            };
            let format = OutputFormat::from_mime(requested).ok_or_else(unsupported)?;
            if layer.format_fixed && format != layer.format {
                return Err(unsupported());
            }
            format
        }
    };

    let mut spatial = SpatialParams {
        srs: params.srs,
        bbox: params.bbox,
        width: params.width,
        height: params.height,
        tile: params.tile,
    };
    if let (Some(limit), Some(bbox)) = (layer.bbox, params.bbox) {
        spatial = apply_bbox_limit(layer, &limit, &bbox, spatial)?;
    }

    if params.feature_info.is_some() {
        if !layer.is_queryable() {
            return Err(ResolutionError::FeatureInfoNotSupported {
                layer: layer.name.clone(),
            });
        }
    } else if layer.needs_tile_coord() && spatial.tile.is_none() {
        return Err(ResolutionError::MissingTileCoord {
            layer: layer.name.clone(),
        });
    }

    Ok(RequestPlan {
        layer: Arc::clone(layer),
        spatial,
        format,
        version: params.version.unwrap_or_default(),
        feature_info: params.feature_info,
        extra: params.extra,
    })
}

fn apply_bbox_limit(
    layer: &LayerDescriptor,
    limit: &BBox,
    bbox: &BBox,
    mut spatial: SpatialParams,
) -> Result<SpatialParams, ResolutionError> {
    let out_of_bounds = || ResolutionError::OutOfBounds {
        layer: layer.name.clone(),
        bbox: *bbox,
    };

    let Some(intersection) = limit.intersection(bbox) else {
        return Err(out_of_bounds());
    };
    if limit.contains(bbox) {
        return Ok(spatial);
    }

    match layer.bbox_policy {
        BBoxPolicy::Allow => Ok(spatial),
        BBoxPolicy::Reject => Err(out_of_bounds()),
        BBoxPolicy::Clip => {
            spatial.width = spatial
                .width
                .map(|w| scale(w, intersection.width() / bbox.width()));
            spatial.height = spatial
                .height
                .map(|h| scale(h, intersection.height() / bbox.height()));
            spatial.bbox = Some(intersection);
            Ok(spatial)
        }
    }
}

fn scale(size: u32, factor: f64) -> u32 {
    ((f64::from(size) * factor).round() as u32).max(1)
}

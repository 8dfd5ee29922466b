//! Upstream request URLs for WMS and TMS sources.
use crate::descriptor::{RequestTemplate, WmsVersion};
use crate::format::OutputFormat;
use crate::resolver::FeatureInfoQuery;
use crate::spatial::{SpatialParams, TileCoord};
use url::Url;

/// Parameters the proxy sets itself. Clients can't override them.
const RESERVED_PARAMS: &[&str] = &[
    "service",
    "version",
    "wmtver",
    "request",
    "layers",
    "layer",
    "query_layers",
    "srs",
    "crs",
    "bbox",
    "width",
    "height",
    "format",
    "info_format",
    "x",
    "y",
    "i",
    "j",
];

fn base_url(template: &RequestTemplate) -> Url {
    let mut url = template.url.clone();
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in &template.params {
            query.append_pair(key, value);
        }
    }
    url
}

fn has_param(template: &RequestTemplate, name: &str) -> bool {
    template
        .url
        .query_pairs()
        .any(|(key, _)| key.eq_ignore_ascii_case(name))
        || template
            .params
            .iter()
            .any(|(key, _)| key.eq_ignore_ascii_case(name))
}

fn append_map_params(
    url: &mut Url,
    template: &RequestTemplate,
    version: WmsVersion,
    request: &str,
    spatial: &SpatialParams,
    format: OutputFormat,
) {
    let mut query = url.query_pairs_mut();
    match version {
        WmsVersion::V1_0_0 => {
            query.append_pair("wmtver", version.as_str());
        }
        WmsVersion::V1_1_1 | WmsVersion::V1_3_0 => {
            query.append_pair("service", "WMS");
            query.append_pair("version", version.as_str());
        }
    }
    query.append_pair("request", request);

    if let Some(srs) = &spatial.srs {
        let name = if version == WmsVersion::V1_3_0 {
            "crs"
        } else {
            "srs"
        };
        query.append_pair(name, srs);
    }
    if let Some(bbox) = &spatial.bbox {
        query.append_pair("bbox", &bbox.to_string());
    }
    if let Some(width) = spatial.width {
        query.append_pair("width", &width.to_string());
    }
    if let Some(height) = spatial.height {
        query.append_pair("height", &height.to_string());
    }

    let format_name = match version {
        WmsVersion::V1_0_0 => format.wms_1_0_0_name(),
        _ => format.mime_type(),
    };
    query.append_pair("format", format_name);

    if !has_param(template, "styles") {
        query.append_pair("styles", "");
    }
}

fn append_extra_params(url: &mut Url, template: &RequestTemplate, extra: &[(String, String)]) {
    let mut query = url.query_pairs_mut();
    for (key, value) in extra {
        let lower = key.to_ascii_lowercase();
        if RESERVED_PARAMS.contains(&lower.as_str()) || has_param(template, &lower) {
            continue;
        }
        query.append_pair(key, value);
    }
}

/// GetMap URL for `template` in the query dialect of `version`.
pub fn map_url(
    template: &RequestTemplate,
    version: WmsVersion,
    spatial: &SpatialParams,
    format: OutputFormat,
    extra: &[(String, String)],
) -> Url {
    let request = match version {
        WmsVersion::V1_0_0 => "map",
        _ => "GetMap",
    };
    let mut url = base_url(template);
    append_map_params(&mut url, template, version, request, spatial, format);
    append_extra_params(&mut url, template, extra);
    url
}

/// GetFeatureInfo URL for `template`. Queries the layers of the template.
pub fn feature_info_url(
    template: &RequestTemplate,
    version: WmsVersion,
    spatial: &SpatialParams,
    format: OutputFormat,
    query: &FeatureInfoQuery,
    extra: &[(String, String)],
) -> Url {
    let request = match version {
        WmsVersion::V1_0_0 => "feature_info",
        _ => "GetFeatureInfo",
    };
    let mut url = base_url(template);
    append_map_params(&mut url, template, version, request, spatial, format);
    {
        let mut pairs = url.query_pairs_mut();
        if let Some(layers) = template.layers() {
            pairs.append_pair("query_layers", layers);
        }
        let (x, y) = match version {
            WmsVersion::V1_3_0 => ("i", "j"),
            _ => ("x", "y"),
        };
        pairs.append_pair(x, &query.x.to_string());
        pairs.append_pair(y, &query.y.to_string());
        if let Some(info_format) = &query.info_format {
            pairs.append_pair("info_format", info_format);
        }
    }
    append_extra_params(&mut url, template, extra);
    url
}

/// Tile URL for a TMS template.
pub fn tile_url(
    url_template: &str,
    tile: TileCoord,
    format: OutputFormat,
) -> Result<Url, url::ParseError> {
    let url = if url_template.contains("{z}") {
        url_template
            .replace("{z}", &tile.z.to_string())
            .replace("{x}", &tile.x.to_string())
            .replace("{y}", &tile.y.to_string())
    } else {
        let separator = if url_template.ends_with('/') { "" } else { "/" };
        format!("{url_template}{separator}{tile}.{}", format.extension())
    };
    Url::parse(&url)
}

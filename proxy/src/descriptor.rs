use crate::config::{Globals, LayerConfig, RequestConfig, SourceConfig};
use crate::errors::ConfigError;
use crate::format::OutputFormat;
use crate::spatial::{BBox, BBoxPolicy};
use crate::transport::{Credentials, auth_data_from_url};
use std::fmt;
use url::Url;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum WmsVersion {
    V1_0_0,
    #[default]
    V1_1_1,
    V1_3_0,
}

impl WmsVersion {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "1.0.0" => Some(WmsVersion::V1_0_0),
            "1.1.1" => Some(WmsVersion::V1_1_1),
            "1.3.0" => Some(WmsVersion::V1_3_0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WmsVersion::V1_0_0 => "1.0.0",
            WmsVersion::V1_1_1 => "1.1.1",
            WmsVersion::V1_3_0 => "1.3.0",
        }
    }
}

impl fmt::Display for WmsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Direct,
    CacheWms,
    CacheTms,
}

impl SourceKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "direct" => Some(SourceKind::Direct),
            "cache_wms" => Some(SourceKind::CacheWms),
            "cache_tms" => Some(SourceKind::CacheTms),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Direct => "direct",
            SourceKind::CacheWms => "cache_wms",
            SourceKind::CacheTms => "cache_tms",
        }
    }
}

/// Base URL and fixed query parameters of a WMS source.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestTemplate {
    /// Credentials are stripped from the URL and kept separately
    pub url: Url,
    pub credentials: Option<Credentials>,
    pub params: Vec<(String, String)>,
}

impl RequestTemplate {
    /// Value of the `layers` (or `layer`) parameter.
    pub fn layers(&self) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == "layers" || key == "layer")
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SourceDescriptor {
    /// Passed through to the upstream WMS on every request
    Direct { request: RequestTemplate },
    /// WMS upstream with cached results
    CacheWms {
        request: RequestTemplate,
        version: WmsVersion,
        featureinfo: bool,
    },
    /// Tile server with cached results. The template may contain `{z}`, `{x}`
    /// and `{y}`; without them `z/x/y.ext` is appended.
    CacheTms {
        url_template: String,
        credentials: Option<Credentials>,
    },
}

impl SourceDescriptor {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceDescriptor::Direct { .. } => SourceKind::Direct,
            SourceDescriptor::CacheWms { .. } => SourceKind::CacheWms,
            SourceDescriptor::CacheTms { .. } => SourceKind::CacheTms,
        }
    }

    /// Everything that makes this source return different data than another
    /// source. Credentials are not part of it.
    pub fn identity(&self) -> String {
        match self {
            SourceDescriptor::Direct { request } | SourceDescriptor::CacheWms { request, .. } => {
                let params = request
                    .params
                    .iter()
                    .map(|(key, value)| format!("{key}={value}"))
                    .collect::<Vec<_>>()
                    .join("&");
                format!("{}|{params}", request.url)
            }
            SourceDescriptor::CacheTms { url_template, .. } => url_template.clone(),
        }
    }

    pub fn supports_feature_info(&self) -> bool {
        matches!(
            self,
            SourceDescriptor::CacheWms {
                featureinfo: true,
                ..
            }
        )
    }

    /// Builds a source from its configuration. Warnings about ignored options
    /// are appended to `diagnostics`.
    pub fn from_config(
        layer: &str,
        index: usize,
        config: &SourceConfig,
        diagnostics: &mut Vec<String>,
    ) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidSource {
            layer: layer.to_string(),
            index,
            reason,
        };

        let kind = SourceKind::parse(&config.r#type).ok_or_else(|| {
            ConfigError::UnknownSourceType {
                layer: layer.to_string(),
                kind: config.r#type.clone(),
            }
        })?;

        if kind != SourceKind::CacheWms
            && let Some(wms_opts) = &config.wms_opts
        {
            if wms_opts.featureinfo {
                diagnostics.push(format!(
                    "source {index}: featureinfo is only supported by cache_wms sources, ignored"
                ));
            } else {
                diagnostics.push(format!(
                    "source {index}: wms_opts only apply to cache_wms sources, ignored"
                ));
            }
        }

        match kind {
            SourceKind::Direct => {
                let req = config
                    .req
                    .as_ref()
                    .ok_or_else(|| invalid("direct source needs req.url".to_string()))?;
                Ok(SourceDescriptor::Direct {
                    request: request_template(req).map_err(invalid)?,
                })
            }
            SourceKind::CacheWms => {
                let req = config
                    .req
                    .as_ref()
                    .ok_or_else(|| invalid("cache_wms source needs req.url".to_string()))?;
                let request = request_template(req).map_err(invalid)?;
                if request.layers().is_none() {
                    return Err(invalid("cache_wms source needs req.layers".to_string()));
                }

                let wms_opts = config.wms_opts.clone().unwrap_or_default();
                let version = match &wms_opts.version {
                    Some(version) => WmsVersion::parse(version).ok_or_else(|| {
                        ConfigError::UnsupportedVersion {
                            layer: layer.to_string(),
                            version: version.clone(),
                        }
                    })?,
                    None => WmsVersion::default(),
                };

                Ok(SourceDescriptor::CacheWms {
                    request,
                    version,
                    featureinfo: wms_opts.featureinfo,
                })
            }
            SourceKind::CacheTms => {
                if config.req.is_some() {
                    diagnostics.push(format!(
                        "source {index}: req is ignored for cache_tms sources, use url"
                    ));
                }
                let url = config
                    .url
                    .as_deref()
                    .ok_or_else(|| invalid("cache_tms source needs url".to_string()))?;
                let (url_template, credentials) = auth_data_from_url(url);
                let sample = url_template
                    .replace("{z}", "0")
                    .replace("{x}", "0")
                    .replace("{y}", "0");
                check_http_url(&sample).map_err(invalid)?;

                Ok(SourceDescriptor::CacheTms {
                    url_template,
                    credentials,
                })
            }
        }
    }
}

fn check_http_url(url: &str) -> Result<Url, String> {
    let parsed = Url::parse(url).map_err(|e| format!("invalid url {url:?}: {e}"))?;
    if !matches!(parsed.scheme(), "http" | "https") || !parsed.has_host() {
        return Err(format!("url {url:?} is not an absolute http(s) URL"));
    }
    Ok(parsed)
}

fn request_template(req: &RequestConfig) -> Result<RequestTemplate, String> {
    let (url, credentials) = auth_data_from_url(&req.url);
    let url = check_http_url(&url)?;

    let mut params = Vec::new();
    if let Some(layers) = &req.layers {
        params.push(("layers".to_string(), layers.clone()));
    } else if let Some(layer) = &req.layer {
        params.push(("layer".to_string(), layer.clone()));
    }
    if let Some(styles) = &req.styles {
        params.push(("styles".to_string(), styles.clone()));
    }
    if let Some(transparent) = req.transparent {
        let value = if transparent { "TRUE" } else { "FALSE" };
        params.push(("transparent".to_string(), value.to_string()));
    }

    Ok(RequestTemplate {
        url,
        credentials,
        params,
    })
}

/// A named layer. Immutable once the registry is built.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerDescriptor {
    pub name: String,
    pub title: Option<String>,
    pub r#abstract: Option<String>,
    pub cache_dir: String,
    pub format: OutputFormat,
    /// Set when the layer configures its own format. Clients can't request
    /// another one then.
    pub format_fixed: bool,
    pub srs_list: Vec<String>,
    pub bbox: Option<BBox>,
    pub link_single_color_images: bool,
    pub bbox_policy: BBoxPolicy,
    pub concurrent_sources: bool,
    pub strict_cache: bool,
    /// Bottom to top
    pub sources: Vec<SourceDescriptor>,
}

impl LayerDescriptor {
    pub fn from_config(
        name: &str,
        config: &LayerConfig,
        globals: &Globals,
        diagnostics: &mut Vec<String>,
    ) -> Result<Self, ConfigError> {
        if name.is_empty() {
            return Err(ConfigError::EmptyLayerName);
        }
        if config.sources.is_empty() {
            return Err(ConfigError::NoSources {
                layer: name.to_string(),
            });
        }

        let cache_dir = config
            .cache_dir
            .clone()
            .unwrap_or_else(|| name.to_string());
        if !is_valid_cache_dir(&cache_dir) {
            return Err(ConfigError::InvalidCacheDir {
                layer: name.to_string(),
                cache_dir,
            });
        }

        let (format, format_fixed) = match &config.param.format {
            Some(format) => {
                let parsed = OutputFormat::from_mime(format).ok_or_else(|| {
                    ConfigError::UnsupportedFormat {
                        layer: name.to_string(),
                        format: format.clone(),
                    }
                })?;
                (parsed, true)
            }
            None => {
                let parsed = OutputFormat::from_mime(&globals.format)
                    .ok_or_else(|| ConfigError::UnsupportedDefaultFormat(globals.format.clone()))?;
                (parsed, false)
            }
        };

        let bbox = config
            .param
            .bbox
            .as_deref()
            .map(|bbox| {
                bbox.parse::<BBox>().map_err(|e| ConfigError::InvalidBBox {
                    layer: name.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        let sources = config
            .sources
            .iter()
            .enumerate()
            .map(|(index, source)| {
                SourceDescriptor::from_config(name, index, source, diagnostics)
            })
            .collect::<Result<Vec<_>, _>>()?;

        if config.param.link_single_color_images
            && !sources.iter().any(|s| s.kind() != SourceKind::Direct)
        {
            diagnostics.push(
                "link_single_color_images has no effect without cached sources".to_string(),
            );
        }

        Ok(LayerDescriptor {
            name: name.to_string(),
            title: config.md.title.clone(),
            r#abstract: config.md.r#abstract.clone(),
            cache_dir,
            format,
            format_fixed,
            srs_list: config.param.srs.clone(),
            bbox,
            link_single_color_images: config.param.link_single_color_images,
            bbox_policy: globals.bbox_policy,
            concurrent_sources: globals.concurrent_sources,
            strict_cache: globals.strict_cache,
            sources,
        })
    }

    /// Name of a source in errors and logs.
    pub fn source_id(&self, index: usize) -> String {
        match self.sources.get(index) {
            Some(source) => format!("{}[{index}] ({})", self.name, source.kind().as_str()),
            None => format!("{}[{index}]", self.name),
        }
    }

    pub fn needs_tile_coord(&self) -> bool {
        self.sources
            .iter()
            .any(|s| s.kind() == SourceKind::CacheTms)
    }

    pub fn is_queryable(&self) -> bool {
        self.sources.iter().any(|s| s.supports_feature_info())
    }
}

/// A relative path of plain segments.
fn is_valid_cache_dir(cache_dir: &str) -> bool {
    !cache_dir.is_empty()
        && !cache_dir.starts_with('/')
        && !cache_dir.contains('\\')
        && cache_dir
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}

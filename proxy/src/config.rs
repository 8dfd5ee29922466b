use crate::spatial::BBoxPolicy;
use indexmap::IndexMap;
use serde::Deserialize;

pub const DEFAULT_FORMAT: &str = "image/png";

/// Layer and service configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Defaults applied to every layer
    #[serde(default)]
    pub globals: Globals,
    /// Service level metadata
    #[serde(default)]
    pub service: ServiceConfig,
    /// Layer definitions, either keyed by name or as a list of named entries
    pub layers: LayersConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Globals {
    /// Output format of layers that don't set their own
    #[serde(default = "default_format")]
    pub format: String,
    /// What to do with a request bbox that only partially overlaps the layer bbox
    #[serde(default)]
    pub bbox_policy: BBoxPolicy,
    /// Fetch the sources of a multi-source layer concurrently
    #[serde(default)]
    pub concurrent_sources: bool,
    /// Fail requests on cache read/write errors instead of treating them as misses
    #[serde(default)]
    pub strict_cache: bool,
}

impl Default for Globals {
    fn default() -> Self {
        Globals {
            format: default_format(),
            bbox_policy: BBoxPolicy::default(),
            concurrent_sources: false,
            strict_cache: false,
        }
    }
}

fn default_format() -> String {
    DEFAULT_FORMAT.to_string()
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ServiceConfig {
    #[serde(default)]
    pub md: ServiceMetadata,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ServiceMetadata {
    pub title: Option<String>,
    pub r#abstract: Option<String>,
    pub online_resource: Option<String>,
    pub contact: Option<Contact>,
    pub access_constraints: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Contact {
    pub person: Option<String>,
    pub position: Option<String>,
    pub organization: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postcode: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
    pub fax: Option<String>,
    pub email: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum LayersConfig {
    Map(IndexMap<String, LayerConfig>),
    List(Vec<NamedLayerConfig>),
}

impl LayersConfig {
    /// Layers in declaration order. Names may repeat in the list form.
    pub fn entries(&self) -> Vec<(&str, &LayerConfig)> {
        match self {
            LayersConfig::Map(map) => map
                .iter()
                .map(|(name, layer)| (name.as_str(), layer))
                .collect(),
            LayersConfig::List(list) => list
                .iter()
                .map(|named| (named.name.as_str(), &named.layer))
                .collect(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct NamedLayerConfig {
    pub name: String,
    #[serde(flatten)]
    pub layer: LayerConfig,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct LayerConfig {
    #[serde(default)]
    pub md: LayerMetadata,
    /// Cache namespace, defaults to the layer name
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub param: LayerParams,
    /// Sources from bottom to top
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct LayerMetadata {
    pub title: Option<String>,
    pub r#abstract: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct LayerParams {
    /// Fixed output format. Clients may only request this one when set.
    pub format: Option<String>,
    #[serde(default)]
    pub srs: Vec<String>,
    /// "minx,miny,maxx,maxy"
    pub bbox: Option<String>,
    #[serde(default)]
    pub link_single_color_images: bool,
}

/// One upstream source of a layer.
///
/// The type is kept as a string so an unknown type can be reported together
/// with the layer it appears in.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SourceConfig {
    pub r#type: String,
    pub req: Option<RequestConfig>,
    pub wms_opts: Option<WmsOptions>,
    /// Tile URL template of `cache_tms` sources
    pub url: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RequestConfig {
    pub url: String,
    pub layers: Option<String>,
    pub layer: Option<String>,
    pub styles: Option<String>,
    pub transparent: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct WmsOptions {
    pub version: Option<String>,
    #[serde(default)]
    pub featureinfo: bool,
}

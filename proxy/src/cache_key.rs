use crate::descriptor::{SourceDescriptor, WmsVersion};
use crate::format::OutputFormat;
use crate::spatial::SpatialParams;
use sha2::{Digest, Sha256};
use std::fmt;

/// Key of a cached image, e.g. `osm/cache_wms/3f/3f9a...c2.png`.
///
/// Keys are derived from everything that influences the upstream response, so
/// changing any parameter yields a different key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(
        cache_dir: &str,
        source: &SourceDescriptor,
        spatial: &SpatialParams,
        format: OutputFormat,
        version: Option<WmsVersion>,
    ) -> Self {
        let kind = source.kind().as_str();

        let mut hasher = Sha256::new();
        let mut field = |name: &str, value: &str| {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        };
        field("cache_dir", cache_dir);
        field("kind", kind);
        field("source", &source.identity());
        field("srs", spatial.srs.as_deref().unwrap_or_default());
        field("bbox", &display_or_empty(spatial.bbox));
        field("width", &display_or_empty(spatial.width));
        field("height", &display_or_empty(spatial.height));
        field("tile", &display_or_empty(spatial.tile));
        field("format", format.mime_type());
        field("version", &display_or_empty(version));

        let hash = format!("{:x}", hasher.finalize());
        CacheKey(format!(
            "{cache_dir}/{kind}/{}/{hash}.{}",
            &hash[..2],
            format.extension()
        ))
    }

    /// Shared key for images consisting of a single RGBA color.
    pub fn single_color(cache_dir: &str, rgba: [u8; 4], format: OutputFormat) -> Self {
        let [r, g, b, a] = rgba;
        CacheKey(format!(
            "{cache_dir}/single_color/{r:02x}{g:02x}{b:02x}{a:02x}.{}",
            format.extension()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn display_or_empty<T: fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::RequestTemplate;
    use crate::spatial::{BBox, TileCoord};
    use url::Url;

    fn wms_source(layers: &str) -> SourceDescriptor {
        SourceDescriptor::CacheWms {
            request: RequestTemplate {
                url: Url::parse("http://localhost:42423/service").unwrap(),
                credentials: None,
                params: vec![("layers".to_string(), layers.to_string())],
            },
            version: WmsVersion::V1_1_1,
            featureinfo: false,
        }
    }

    fn spatial() -> SpatialParams {
        SpatialParams {
            srs: Some("EPSG:4326".to_string()),
            bbox: Some(BBox::new(-180.0, -90.0, 180.0, 90.0)),
            width: Some(256),
            height: Some(256),
            tile: None,
        }
    }

    fn key(
        cache_dir: &str,
        source: &SourceDescriptor,
        spatial: &SpatialParams,
        format: OutputFormat,
        version: Option<WmsVersion>,
    ) -> CacheKey {
        CacheKey::derive(cache_dir, source, spatial, format, version)
    }

    #[test]
    fn test_key_layout() {
        let key = key(
            "osm",
            &wms_source("foo"),
            &spatial(),
            OutputFormat::Png,
            Some(WmsVersion::V1_1_1),
        );
        let parts: Vec<&str> = key.as_str().split('/').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "osm");
        assert_eq!(parts[1], "cache_wms");
        assert_eq!(parts[2].len(), 2);
        assert!(parts[3].starts_with(parts[2]));
        assert!(parts[3].ends_with(".png"));
        assert_eq!(parts[3].len(), 64 + ".png".len());
    }

    #[test]
    fn test_key_is_deterministic() {
        let source = wms_source("foo");
        let version = Some(WmsVersion::V1_1_1);
        assert_eq!(
            key("osm", &source, &spatial(), OutputFormat::Png, version),
            key("osm", &source, &spatial(), OutputFormat::Png, version)
        );
    }

    #[test]
    fn test_every_parameter_changes_key() {
        let source = wms_source("foo");
        let version = Some(WmsVersion::V1_1_1);
        let base = key("osm", &source, &spatial(), OutputFormat::Png, version);

        let mut variants = vec![
            key("osm2", &source, &spatial(), OutputFormat::Png, version),
            key("osm", &wms_source("bar"), &spatial(), OutputFormat::Png, version),
            key("osm", &source, &spatial(), OutputFormat::Jpeg, version),
            key("osm", &source, &spatial(), OutputFormat::Png, Some(WmsVersion::V1_3_0)),
            key("osm", &source, &spatial(), OutputFormat::Png, None),
        ];

        let changes: Vec<Box<dyn Fn(&mut SpatialParams)>> = vec![
            Box::new(|s| s.srs = Some("EPSG:900913".to_string())),
            Box::new(|s| s.srs = None),
            Box::new(|s| s.bbox = Some(BBox::new(-180.0, -90.0, 0.0, 90.0))),
            Box::new(|s| s.width = Some(512)),
            Box::new(|s| s.height = Some(512)),
            Box::new(|s| s.tile = Some(TileCoord { z: 0, x: 0, y: 0 })),
        ];
        for change in changes {
            let mut spatial = spatial();
            change(&mut spatial);
            variants.push(key("osm", &source, &spatial, OutputFormat::Png, version));
        }

        let tms = SourceDescriptor::CacheTms {
            url_template: "http://localhost:42423/service".to_string(),
            credentials: None,
        };
        variants.push(key("osm", &tms, &spatial(), OutputFormat::Png, version));

        for (i, variant) in variants.iter().enumerate() {
            assert_ne!(&base, variant, "variant {i}");
        }
        let mut unique = variants.clone();
        unique.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        unique.dedup();
        assert_eq!(unique.len(), variants.len());
    }

    #[test]
    fn test_single_color_key() {
        assert_eq!(
            CacheKey::single_color("osm", [255, 0, 16, 255], OutputFormat::Png).as_str(),
            "osm/single_color/ff0010ff.png"
        );
    }
}

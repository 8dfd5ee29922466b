use crate::transport::{Transport, TransportError, UpstreamRequest, UpstreamResponse};
use async_trait::async_trait;
use bytes::Bytes;
use image::{ImageFormat, Rgba, RgbaImage};
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn encode_png(image: RgbaImage) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
}

pub fn solid_png(rgba: [u8; 4], width: u32, height: u32) -> Vec<u8> {
    encode_png(RgbaImage::from_pixel(width, height, Rgba(rgba)))
}

/// Left half in `rgba`, right half transparent.
pub fn half_png(rgba: [u8; 4], width: u32, height: u32) -> Vec<u8> {
    encode_png(RgbaImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgba(rgba)
        } else {
            Rgba([0, 0, 0, 0])
        }
    }))
}

pub fn gradient_png(width: u32, height: u32) -> Vec<u8> {
    encode_png(RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x * 16) as u8, (y * 16) as u8, 128, 255])
    }))
}

type Responder =
    Box<dyn Fn(&UpstreamRequest) -> Result<UpstreamResponse, TransportError> + Send + Sync>;
type Delay = Box<dyn Fn(&UpstreamRequest) -> Duration + Send + Sync>;

/// Transport that answers from a closure and records every request.
pub struct FakeTransport {
    responder: Responder,
    delay: Option<Delay>,
    calls: AtomicUsize,
    requests: Mutex<Vec<UpstreamRequest>>,
}

impl FakeTransport {
    pub fn new(
        responder: impl Fn(&UpstreamRequest) -> Result<UpstreamResponse, TransportError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        FakeTransport {
            responder: Box::new(responder),
            delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers every request with the same PNG.
    pub fn png(rgba: [u8; 4]) -> Self {
        let data = Bytes::from(solid_png(rgba, 4, 4));
        Self::new(move |_| Ok(response(data.clone(), "image/png")))
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.with_delay_fn(move |_| delay)
    }

    pub fn with_delay_fn(
        mut self,
        delay: impl Fn(&UpstreamRequest) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.delay = Some(Box::new(delay));
        self
    }

    /// Number of fetches started, including ones that never finished.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<UpstreamRequest> {
        self.requests.lock().clone()
    }

    /// Query parameter `name` of every request made so far.
    pub fn param_values(&self, name: &str) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .filter_map(|request| query_param(&request.url, name))
            .collect()
    }
}

pub fn query_param(url: &url::Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

pub fn response(data: impl Into<Bytes>, content_type: &str) -> UpstreamResponse {
    UpstreamResponse {
        status: 200,
        data: data.into(),
        content_type: Some(content_type.to_string()),
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn fetch(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        if let Some(delay) = &self.delay {
            tokio::time::sleep(delay(request)).await;
        }
        (self.responder)(request)
    }
}

const FIXTURE: &str = r#"
service:
  md:
    title: MapProxy test fixture
    abstract: This is MapProxy.
    online_resource: http://mapproxy.org/
layers:
  direct:
    md:
      title: Direct Layer
    sources:
      - type: direct
        req:
          url: http://localhost:42423/service
          layers: bar
  wms_cache:
    md:
      title: WMS Cache Layer
    param:
      format: image/jpeg
    sources:
      - type: cache_wms
        req:
          url: http://localhost:42423/service
          layers: foo,bar
  tms_cache:
    md:
      title: TMS Cache Layer
    sources:
      - type: cache_tms
        url: http://localhost:42423/tiles/
  wms_cache_multi:
    md:
      title: WMS Cache Multi Layer
    param:
      srs: ['EPSG:4326', 'EPSG:900913']
    sources:
      - type: cache_wms
        req:
          url: http://localhost:42423/service
          layers: foo,bar
  wms_cache_130:
    md:
      title: WMS Cache Layer 1.3.0
    sources:
      - type: cache_wms
        wms_opts:
          version: '1.3.0'
          featureinfo: true
        req:
          url: http://localhost:42423/service
          layers: foo,bar
  wms_cache_link_single:
    md:
      title: WMS Cache Layer with linked single color images
    param:
      link_single_color_images: true
    sources:
      - type: cache_wms
        req:
          url: http://localhost:42423/service
          layers: foo
  wms_merge:
    md:
      title: Merged Layer
    sources:
      - type: direct
        req:
          url: http://localhost:42423/service
          layers: buz
      - type: cache_wms
        req:
          url: http://localhost:42423/service
          layers: bar
"#;

/// Layer configuration shared by registry and dispatcher tests.
pub fn fixture_config() -> crate::config::Config {
    serde_yaml::from_str(FIXTURE).unwrap()
}

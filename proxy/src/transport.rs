//! Upstream transport.
//!
//! The dispatcher only sees the [`Transport`] trait. [`HttpTransport`] is the
//! production implementation on top of reqwest.
use crate::metrics_defs::UPSTREAM_REQUEST_DURATION;
use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use shared::histogram;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use url::Url;

const HIDDEN_URL: &str = "(see logs for URL and reason)";

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct UpstreamRequest {
    pub url: Url,
    pub credentials: Option<Credentials>,
    /// Reject responses that don't declare an image content type
    pub expect_image: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub data: Bytes,
    pub content_type: Option<String>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("invalid HTTP client configuration: {0}")]
    Config(String),
    #[error("no response from URL {url}: {reason}")]
    Request { url: String, reason: String },
    #[error("timeout waiting for URL {url}")]
    Timeout { url: String },
    #[error("HTTP error {status} from URL {url}")]
    Status { url: String, status: u16 },
    #[error("HTTP error \"204 No Content\" from URL {url}")]
    NoContent { url: String },
    #[error("response from URL {url} is not an image ({content_type})")]
    NotAnImage { url: String, content_type: String },
}

impl TransportError {
    fn without_details(self) -> Self {
        let url = HIDDEN_URL.to_string();
        match self {
            TransportError::Config(reason) => TransportError::Config(reason),
            TransportError::Request { .. } => TransportError::Request {
                url,
                reason: "request failed".to_string(),
            },
            TransportError::Timeout { .. } => TransportError::Timeout { url },
            TransportError::Status { status, .. } => TransportError::Status { url, status },
            TransportError::NoContent { .. } => TransportError::NoContent { url },
            TransportError::NotAnImage { content_type, .. } => {
                TransportError::NotAnImage { url, content_type }
            }
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, TransportError>;
}

/// HTTP client settings shared by all upstream requests.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct HttpConfig {
    /// Timeout for the whole request, body included
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub user_agent: Option<String>,
    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    /// Accept invalid TLS certificates
    #[serde(default)]
    pub insecure: bool,
    /// PEM bundle of additional root certificates for HTTPS upstreams
    pub ssl_ca_certs: Option<PathBuf>,
    /// Keep upstream URLs and failure reasons out of returned errors. They
    /// are still logged.
    #[serde(default)]
    pub hide_error_details: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            timeout_secs: default_timeout_secs(),
            user_agent: None,
            headers: IndexMap::new(),
            insecure: false,
            ssl_ca_certs: None,
            hide_error_details: false,
        }
    }
}

fn default_timeout_secs() -> u64 {
    60
}

pub struct HttpTransport {
    client: reqwest::Client,
    hide_error_details: bool,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Config(format!("header {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Config(format!("header {name}: {e}")))?;
            headers.insert(name, value);
        }

        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(|| format!("tileproxy/{}", env!("CARGO_PKG_VERSION")));

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(user_agent)
            .default_headers(headers)
            .danger_accept_invalid_certs(config.insecure);
        if let Some(path) = &config.ssl_ca_certs {
            for certificate in load_ca_certs(path)? {
                builder = builder.add_root_certificate(certificate);
            }
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Config(e.to_string()))?;

        Ok(HttpTransport {
            client,
            hide_error_details: config.hide_error_details,
        })
    }

    async fn send(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, TransportError> {
        let url = request.url.to_string();
        let mut builder = self.client.get(request.url.clone());
        if let Some(credentials) = &request.credentials {
            builder = builder.basic_auth(&credentials.username, credentials.password.as_deref());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| reqwest_error(&url, e))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Err(TransportError::NoContent { url });
        }
        if !status.is_success() {
            return Err(TransportError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // A missing content type is accepted, only a wrong one is an error
        if request.expect_image
            && let Some(content_type) = &content_type
            && !content_type.to_ascii_lowercase().starts_with("image")
        {
            return Err(TransportError::NotAnImage {
                url,
                content_type: content_type.clone(),
            });
        }

        let data = response.bytes().await.map_err(|e| reqwest_error(&url, e))?;

        Ok(UpstreamResponse {
            status: status.as_u16(),
            data,
            content_type,
        })
    }
}

fn load_ca_certs(path: &Path) -> Result<Vec<reqwest::Certificate>, TransportError> {
    let ca_error = |reason: String| {
        TransportError::Config(format!("CA certificates {}: {reason}", path.display()))
    };

    let pem = std::fs::read(path).map_err(|e| ca_error(e.to_string()))?;
    let certificates =
        reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| ca_error(e.to_string()))?;
    if certificates.is_empty() {
        return Err(ca_error("no certificates found".to_string()));
    }
    Ok(certificates)
}

fn reqwest_error(url: &str, error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
        }
    } else {
        TransportError::Request {
            url: url.to_string(),
            reason: error.to_string(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, TransportError> {
        let start = Instant::now();
        let result = self.send(request).await;
        let duration = start.elapsed();

        let status = match &result {
            Ok(response) => response.status.to_string(),
            Err(TransportError::Status { status, .. }) => status.to_string(),
            Err(TransportError::NoContent { .. }) => "204".to_string(),
            Err(_) => "error".to_string(),
        };
        histogram!(UPSTREAM_REQUEST_DURATION, "status" => status.clone())
            .record(duration.as_secs_f64());

        match result {
            Ok(response) => {
                tracing::debug!(
                    url = %request.url,
                    status = %status,
                    size = response.data.len(),
                    duration_ms = duration.as_millis() as u64,
                    "upstream request"
                );
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(
                    url = %request.url,
                    status = %status,
                    duration_ms = duration.as_millis() as u64,
                    error = %e,
                    "upstream request failed"
                );
                if self.hide_error_details {
                    Err(e.without_details())
                } else {
                    Err(e)
                }
            }
        }
    }
}

/// Splits credentials off a URL.
///
/// Everything before the last `@` of the authority is user info, so passwords
/// may contain `@` and `:`. An `@` in the path is left alone. Strings without
/// a scheme are returned unchanged.
pub fn auth_data_from_url(url: &str) -> (String, Option<Credentials>) {
    let Some((scheme, rest)) = url.split_once("://") else {
        return (url.to_string(), None);
    };
    let (host, path) = rest.split_once('/').unwrap_or((rest, ""));

    let Some((auth, host)) = host.rsplit_once('@') else {
        return (url.to_string(), None);
    };
    let credentials = match auth.split_once(':') {
        Some((username, password)) => Credentials {
            username: username.to_string(),
            password: Some(password.to_string()),
        },
        None => Credentials {
            username: auth.to_string(),
            password: None,
        },
    };
    (format!("{scheme}://{host}/{path}"), Some(credentials))
}

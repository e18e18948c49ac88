//! HTTP capability used to fetch fragments

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use http::header::CACHE_CONTROL;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ProxyError;

/// Default user agent sent with every fragment request
pub const DEFAULT_USER_AGENT: &str = concat!("esi-cache/", env!("CARGO_PKG_VERSION"));

/// A single outbound GET request
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Fully-qualified URL
    pub url: String,
    /// Request headers, already merged with defaults
    pub headers: HeaderMap,
}

/// Raw upstream response, before any status interpretation
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    /// Body decoded as UTF-8 (invalid sequences are replaced)
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Raw `Cache-Control` header value, if present and valid ASCII
    pub fn cache_control(&self) -> Option<&str> {
        self.headers
            .get(CACHE_CONTROL)
            .and_then(|h| h.to_str().ok())
    }
}

/// Pluggable transport for fragment fetches.
///
/// Implementations return every response they receive, including error
/// statuses; status interpretation belongs to the caller. Transport
/// failures (connection refused, timeouts) are reported as `Err`.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, request: FetchRequest) -> Result<HttpResponse, ProxyError>;
}

/// HTTP client configuration
#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    /// Total request timeout
    pub timeout: Duration,
    /// Value for the `User-Agent` header
    pub user_agent: String,
    /// Skip TLS certificate verification
    pub skip_tls_verify: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            skip_tls_verify: false,
        }
    }
}

/// `reqwest` backed [`HttpClient`]
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    /// Create a new client
    pub fn new(config: HttpClientConfig) -> Result<Self, ProxyError> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone());

        if config.skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| ProxyError::Configuration(e.to_string()))?;

        info!(
            "Created fragment HTTP client (timeout: {:?}, user agent: {})",
            config.timeout, config.user_agent
        );

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, request: FetchRequest) -> Result<HttpResponse, ProxyError> {
        debug!("GET {}", request.url);

        let response = self
            .client
            .get(&request.url)
            .headers(request.headers)
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        debug!("GET {} -> {} ({} bytes)", request.url, status, body.len());

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

//! Fragment data provider
//!
//! Wraps an [`HttpClient`] with everything a fragment fetch needs:
//! - resolving relative include paths against a base URL
//! - building request headers (defaults merged with caller headers)
//! - mapping upstream error statuses to [`ProxyError::Status`]
//! - collapsing concurrent identical requests into one upstream call

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use http::header::{ACCEPT, CACHE_CONTROL, HeaderName, HeaderValue, USER_AGENT};
use http::HeaderMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::client::{DEFAULT_USER_AGENT, FetchRequest, HttpClient};
use crate::error::ProxyError;

/// `Accept` header sent with every fragment request
pub const DEFAULT_ACCEPT: &str = "text/html, application/xhtml+xml, application/xml";

/// Per-call request options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Extra request headers; these win over the defaults on conflict
    pub headers: BTreeMap<String, String>,
    /// Base URL overriding the provider's own for relative paths
    pub base_url: Option<String>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a request header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the base URL for relative paths
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

/// Data provider configuration
#[derive(Debug, Clone)]
pub struct DataProviderConfig {
    /// Base URL for relative include paths
    pub base_url: Option<String>,
    /// Value for the `User-Agent` header
    pub user_agent: String,
}

impl Default for DataProviderConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// A successfully fetched fragment
#[derive(Debug, Clone)]
pub struct Fragment {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl Fragment {
    /// Raw `Cache-Control` header value
    pub fn cache_control(&self) -> Option<&str> {
        self.headers
            .get(CACHE_CONTROL)
            .and_then(|h| h.to_str().ok())
    }
}

/// Identity of a request for de-duplication: URL plus effective headers
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RequestKey {
    url: String,
    headers: Vec<(String, String)>,
}

impl RequestKey {
    fn from_request(request: &FetchRequest) -> Self {
        let mut headers: Vec<(String, String)> = request
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        headers.sort();

        Self {
            url: request.url.clone(),
            headers,
        }
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<Fragment, ProxyError>>>;
type PendingMap = Arc<Mutex<HashMap<RequestKey, SharedFetch>>>;

/// Resolves and fetches fragments through an [`HttpClient`]
pub struct DataProvider {
    base_url: Option<Url>,
    user_agent: HeaderValue,
    client: Arc<dyn HttpClient>,
    pending: PendingMap,
}

impl DataProvider {
    /// Create a new data provider
    pub fn new(config: DataProviderConfig, client: Arc<dyn HttpClient>) -> Result<Self, ProxyError> {
        let base_url = match config.base_url.as_deref().map(str::trim) {
            Some(base) if !base.is_empty() => Some(
                Url::parse(base).map_err(|e| ProxyError::InvalidUrl(format!("{}: {}", base, e)))?,
            ),
            _ => None,
        };

        let user_agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|_| ProxyError::Configuration(format!("invalid user agent: {}", config.user_agent)))?;

        Ok(Self {
            base_url,
            user_agent,
            client,
            pending: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// The configured base URL, if any
    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    /// Number of requests currently in flight
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Resolve `url_or_path` to an absolute URL.
    ///
    /// Absolute http(s) URLs are returned unchanged. Relative values are
    /// joined onto `base_override` when given, else onto the configured base
    /// URL. Without any base the input is returned as is.
    pub fn to_fully_qualified_url(&self, url_or_path: &str, base_override: Option<&str>) -> String {
        if is_absolute_http(url_or_path) {
            return url_or_path.to_string();
        }

        let base = base_override
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .and_then(|b| Url::parse(b).ok())
            .or_else(|| self.base_url.clone());

        match base {
            Some(base) => base
                .join(url_or_path)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| url_or_path.to_string()),
            None => url_or_path.to_string(),
        }
    }

    /// Build the outbound request for `src`
    pub fn build_request(&self, src: &str, options: &RequestOptions) -> FetchRequest {
        let url = self.to_fully_qualified_url(src, options.base_url.as_deref());

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
        headers.insert(USER_AGENT, self.user_agent.clone());

        for (name, value) in &options.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!("Skipping invalid request header: {}", name),
            }
        }

        FetchRequest { url, headers }
    }

    /// Fetch a fragment.
    ///
    /// Concurrent calls resolving to the same URL and headers share a single
    /// upstream request. The request runs on its own task, so it completes
    /// and leaves the in-flight registry even when every caller stops
    /// waiting. Failures are never reused by later calls.
    pub async fn get(&self, src: &str, options: &RequestOptions) -> Result<Fragment, ProxyError> {
        let request = self.build_request(src, options);
        let key = RequestKey::from_request(&request);

        let shared = {
            let mut pending = self.pending.lock();
            match pending.get(&key) {
                Some(in_flight) => {
                    debug!("Joining in-flight request for {}", request.url);
                    in_flight.clone()
                }
                None => {
                    let task = tokio::spawn(Self::fetch(
                        self.client.clone(),
                        request,
                        self.pending.clone(),
                        key.clone(),
                    ));
                    let fetch = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(ProxyError::Transport(format!("fetch task failed: {}", e)))
                        })
                    }
                    .boxed()
                    .shared();
                    pending.insert(key, fetch.clone());
                    fetch
                }
            }
        };

        shared.await
    }

    /// Runs detached from the callers; the registry lock taken here waits for
    /// `get` to finish inserting the entry
    async fn fetch(
        client: Arc<dyn HttpClient>,
        request: FetchRequest,
        pending: PendingMap,
        key: RequestKey,
    ) -> Result<Fragment, ProxyError> {
        let result = Self::send(client.as_ref(), request).await;
        pending.lock().remove(&key);
        result
    }

    async fn send(client: &dyn HttpClient, request: FetchRequest) -> Result<Fragment, ProxyError> {
        if !is_absolute_http(&request.url) {
            return Err(ProxyError::InvalidUrl(request.url));
        }

        metrics::counter!("esi_upstream_requests_total").increment(1);

        let url = request.url.clone();
        let response = client.get(request).await?;

        if response.status >= 400 {
            debug!("Upstream returned {} for {}", response.status, url);
            return Err(ProxyError::Status {
                status: response.status,
            });
        }

        Ok(Fragment {
            status: response.status,
            body: response.text(),
            headers: response.headers,
        })
    }
}

fn is_absolute_http(value: &str) -> bool {
    Url::parse(value)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::HttpResponse;
    use async_trait::async_trait;

    struct UnreachableClient;

    #[async_trait]
    impl HttpClient for UnreachableClient {
        async fn get(&self, _request: FetchRequest) -> Result<HttpResponse, ProxyError> {
            Err(ProxyError::Transport("unreachable".to_string()))
        }
    }

    fn provider(base_url: Option<&str>) -> DataProvider {
        DataProvider::new(
            DataProviderConfig {
                base_url: base_url.map(|b| b.to_string()),
                ..Default::default()
            },
            Arc::new(UnreachableClient),
        )
        .unwrap()
    }

    #[test]
    fn test_absolute_urls_pass_through() {
        let provider = provider(Some("http://example.com"));
        assert_eq!(
            provider.to_fully_qualified_url("http://other:8080/x?a=1", None),
            "http://other:8080/x?a=1"
        );
        assert_eq!(
            provider.to_fully_qualified_url("https://other", None),
            "https://other"
        );
    }

    #[test]
    fn test_relative_urls_use_base() {
        let provider = provider(Some("http://localhost:3000"));
        assert_eq!(
            provider.to_fully_qualified_url("/header", None),
            "http://localhost:3000/header"
        );
        assert_eq!(
            provider.to_fully_qualified_url("header", None),
            "http://localhost:3000/header"
        );
    }

    #[test]
    fn test_base_override_wins() {
        let provider = provider(Some("http://localhost:3000"));
        assert_eq!(
            provider.to_fully_qualified_url("/header", Some("http://other:4000/page")),
            "http://other:4000/header"
        );
    }

    #[test]
    fn test_relative_without_base_is_unchanged() {
        let provider = provider(None);
        assert_eq!(provider.to_fully_qualified_url("/header", None), "/header");
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let result = DataProvider::new(
            DataProviderConfig {
                base_url: Some("not a url".to_string()),
                ..Default::default()
            },
            Arc::new(UnreachableClient),
        );
        assert!(matches!(result, Err(ProxyError::InvalidUrl(_))));
    }

    #[test]
    fn test_request_headers_merge() {
        let provider = provider(Some("http://localhost"));
        let options = RequestOptions::new()
            .with_header("x-custom-header", "blah")
            .with_header("accept", "text/plain");

        let request = provider.build_request("/", &options);

        assert_eq!(request.url, "http://localhost/");
        assert_eq!(request.headers.get("accept").unwrap(), "text/plain");
        assert_eq!(request.headers.get("x-custom-header").unwrap(), "blah");
        assert!(request.headers.get("user-agent").is_some());
    }

    #[test]
    fn test_default_accept_header() {
        let provider = provider(Some("http://localhost"));
        let request = provider.build_request("/", &RequestOptions::default());
        assert_eq!(request.headers.get("accept").unwrap(), DEFAULT_ACCEPT);
    }

    #[tokio::test]
    async fn test_relative_without_base_fails_with_invalid_url() {
        let provider = provider(None);
        let result = provider.get("header", &RequestOptions::default()).await;
        assert!(matches!(result, Err(ProxyError::InvalidUrl(_))));
        assert_eq!(provider.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_request_leaves_no_pending_entry() {
        let provider = provider(Some("http://localhost"));
        let result = provider.get("/", &RequestOptions::default()).await;
        assert_eq!(result.unwrap_err(), ProxyError::Transport("unreachable".to_string()));
        assert_eq!(provider.pending_count(), 0);
    }
}

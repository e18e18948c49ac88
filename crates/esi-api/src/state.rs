//! Application state

use axum::http::{HeaderMap, HeaderName};
use esi_core::{EsiProcessor, ProcessOptions};
use esi_proxy::HttpClient;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tracing::warn;

/// Handle used to render the Prometheus exposition
pub type MetricsHandle = PrometheusHandle;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub processor: EsiProcessor,
    pub client: Arc<dyn HttpClient>,
    /// Origin that serves the pages, without trailing slash
    pub origin: String,
    /// Request headers passed on to the origin and to fragment requests
    pub forward_headers: Arc<Vec<HeaderName>>,
}

impl AppState {
    pub fn new(
        processor: EsiProcessor,
        client: Arc<dyn HttpClient>,
        origin: &str,
        forward_headers: &[String],
    ) -> Self {
        let forward_headers = forward_headers
            .iter()
            .filter_map(|name| match HeaderName::try_from(name.trim()) {
                Ok(header) => Some(header),
                Err(_) => {
                    warn!("Ignoring invalid forward header name: {}", name);
                    None
                }
            })
            .collect();

        Self {
            processor,
            client,
            origin: origin.trim_end_matches('/').to_string(),
            forward_headers: Arc::new(forward_headers),
        }
    }

    /// The forwarded subset of `headers`
    pub fn forwarded(&self, headers: &HeaderMap) -> HeaderMap {
        let mut forwarded = HeaderMap::new();
        for name in self.forward_headers.iter() {
            for value in headers.get_all(name) {
                forwarded.append(name.clone(), value.clone());
            }
        }
        forwarded
    }

    /// Fragment request options for an incoming request
    pub fn process_options(&self, headers: &HeaderMap) -> ProcessOptions {
        let mut options = ProcessOptions::new();
        for name in self.forward_headers.iter() {
            if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
                options.headers.insert(name.as_str().to_string(), value.to_string());
            }
        }
        options
    }
}

//! Core error types

use esi_proxy::ProxyError;
use thiserror::Error;

/// Construction and cache errors
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Proxy error: {0}")]
    Proxy(#[from] ProxyError),

    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("Invalid host pattern '{pattern}': {source}")]
    InvalidHostPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Cache entry not found")]
    CacheMiss,
}

/// Why a single include could not be resolved.
///
/// These never escape `EsiProcessor::process`; they are handed to the
/// configured error hook instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IncludeError {
    #[error("{url} is not included in allowedHosts or baseUrl.")]
    Blocked { url: String },

    #[error("esi:include tag has no src attribute")]
    MissingSource,

    #[error(transparent)]
    Fetch(#[from] ProxyError),
}

impl IncludeError {
    /// Whether the host allow-list rejected the URL
    pub fn is_blocked(&self) -> bool {
        matches!(self, IncludeError::Blocked { .. })
    }

    /// Upstream status code for HTTP error responses
    pub fn status(&self) -> Option<u16> {
        match self {
            IncludeError::Fetch(e) => e.status(),
            _ => None,
        }
    }
}

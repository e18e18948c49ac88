//! Proxy error types

use thiserror::Error;

/// Errors raised while fetching a fragment from upstream.
///
/// The enum is `Clone` so that a single settled result can be handed to every
/// caller waiting on a de-duplicated request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
    #[error("HTTP error: status code {status}")]
    Status { status: u16 },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Client configuration error: {0}")]
    Configuration(String),
}

impl ProxyError {
    /// Upstream status code, when the failure was an HTTP error status
    pub fn status(&self) -> Option<u16> {
        match self {
            ProxyError::Status { status } => Some(*status),
            _ => None,
        }
    }

    /// Whether the request never produced a response
    pub fn is_transport(&self) -> bool {
        matches!(self, ProxyError::Timeout(_) | ProxyError::Transport(_))
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProxyError::Timeout(err.to_string())
        } else if err.is_builder() {
            ProxyError::InvalidUrl(err.to_string())
        } else if err.is_decode() || err.is_body() {
            ProxyError::InvalidResponse(err.to_string())
        } else {
            ProxyError::Transport(err.to_string())
        }
    }
}

//! ESI Cache Upstream Proxy
//!
//! This crate provides the HTTP side of fragment resolution: the pluggable
//! client capability, a reqwest implementation of it, and the data provider
//! that resolves, fetches and de-duplicates fragment requests.

pub mod client;
pub mod error;
pub mod provider;

pub use client::{
    DEFAULT_USER_AGENT, FetchRequest, HttpClient, HttpClientConfig, HttpResponse, ReqwestClient,
};
pub use error::ProxyError;
pub use provider::{DEFAULT_ACCEPT, DataProvider, DataProviderConfig, Fragment, RequestOptions};

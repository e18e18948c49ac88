//! ESI Cache HTTP API
//!
//! This crate provides the Axum integration for ESI Cache: the response
//! middleware that resolves includes in text bodies, the origin pass-through
//! handler, and the health and metrics endpoints.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use middleware::{EsiProcessed, esi_middleware};
pub use routes::create_router;
pub use state::{AppState, MetricsHandle};

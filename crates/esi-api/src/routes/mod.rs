//! API routes

mod health;
pub mod metrics;
mod origin;

use axum::{Router, middleware};
use std::sync::Arc;

use crate::middleware::esi_middleware;
use crate::state::{AppState, MetricsHandle};

/// Create the main router
///
/// Every request that does not hit a built-in endpoint is fetched from the
/// origin; text responses pass through the ESI middleware on the way out.
pub fn create_router(state: AppState, metrics_handle: Option<Arc<MetricsHandle>>) -> Router {
    let mut router = Router::new()
        // Health check
        .merge(health::routes())
        // Pages from the origin
        .fallback(origin::proxy_origin)
        .layer(middleware::from_fn_with_state(state.clone(), esi_middleware))
        .with_state(state);

    // Add metrics endpoint if handle is provided
    if let Some(handle) = metrics_handle {
        router = router.merge(metrics::routes(handle));
    }

    router
}

//! Liveness endpoint reporting the include engine's state

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub origin: String,
    pub max_depth: u32,
    /// Fragment fetches currently shared between waiting includes
    pub in_flight_fragments: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    metrics::counter!("esi_health_checks_total").increment(1);

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        origin: state.origin.clone(),
        max_depth: state.processor.max_depth(),
        in_flight_fragments: state.processor.data_provider().pending_count(),
    })
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
}

//! ESI response middleware
//!
//! Buffers textual response bodies, resolves their include tags and sends
//! the result without the origin's validators. Use with `axum::middleware::from_fn_with_state`.

use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{
        HeaderMap,
        header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED},
    },
    middleware::Next,
    response::Response,
};
use esi_core::ProcessOptions;
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

/// Largest body the middleware will buffer
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Response extension marking a body that was already processed
#[derive(Debug, Clone, Copy, Default)]
pub struct EsiProcessed;

/// Resolve includes in text and XML responses.
///
/// Fragment requests use the [`ProcessOptions`] found in the request
/// extensions, or else the configured forwarded headers of the request.
pub async fn esi_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let options = request
        .extensions()
        .get::<ProcessOptions>()
        .cloned()
        .unwrap_or_else(|| state.process_options(request.headers()));

    let response = next.run(request).await;

    if response.extensions().get::<EsiProcessed>().is_some() || !is_processable(response.headers())
    {
        return Ok(response);
    }

    let (mut parts, body) = response.into_parts();
    let bytes = to_bytes(body, MAX_BODY_SIZE)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to buffer response body: {}", e)))?;

    let Ok(html) = std::str::from_utf8(&bytes) else {
        debug!("Response body is not valid UTF-8, skipping ESI processing");
        return Ok(Response::from_parts(parts, Body::from(bytes)));
    };

    let processed = state.processor.process(html, &options).await;

    // Validators describe the origin's bytes, not the processed body
    parts.headers.remove(CONTENT_LENGTH);
    parts.headers.remove(ETAG);
    parts.headers.remove(LAST_MODIFIED);
    parts.extensions.insert(EsiProcessed);

    Ok(Response::from_parts(parts, Body::from(processed)))
}

/// `text/*` and XML bodies are processed, everything else passes through
fn is_processable(headers: &HeaderMap) -> bool {
    let Some(content_type) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return false;
    };

    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    mime.starts_with("text/") || mime.ends_with("/xml") || mime.ends_with("+xml")
}

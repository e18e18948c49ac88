//! Origin pass-through

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::Response,
};
use esi_proxy::FetchRequest;
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

/// Response headers copied from the origin
const PASSED_HEADERS: [header::HeaderName; 4] = [
    header::CONTENT_TYPE,
    header::CACHE_CONTROL,
    header::ETAG,
    header::LAST_MODIFIED,
];

/// Fetch `origin + path?query` and return it unchanged
pub async fn proxy_origin(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if method != Method::GET && method != Method::HEAD {
        return Err(ApiError::MethodNotAllowed);
    }

    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let url = format!("{}{}", state.origin, path_and_query);
    debug!("Fetching page from origin: {}", url);

    let upstream = state
        .client
        .get(FetchRequest {
            url,
            headers: state.forwarded(&headers),
        })
        .await?;

    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);

    for name in PASSED_HEADERS {
        if let Some(value) = upstream.headers.get(&name) {
            response.headers_mut().insert(name, value.clone());
        }
    }

    Ok(response)
}

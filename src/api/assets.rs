use std::sync::Arc;

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rustc_hash::FxHashSet;

use crate::state::AppState;
use crate::transport::UpstreamErrorKind;

/// Headers copied from the upstream asset response.
const FORWARDED_HEADERS: [http::HeaderName; 4] = [
    http::header::CONTENT_TYPE,
    http::header::CONTENT_LENGTH,
    http::header::ETAG,
    http::header::LAST_MODIFIED,
];

/// `GET /assets/{path}`: stream an upstream asset using a pooled credential.
///
/// Unauthenticated, so media URLs handed to clients stay usable as-is.
pub async fn handler(state: Arc<AppState>, path: &str) -> Response {
    if !is_safe_asset_path(path) {
        return StatusCode::NOT_FOUND.into_response();
    }
    let Some(credential) = state.credentials.get_random(&FxHashSet::default()) else {
        return (StatusCode::SERVICE_UNAVAILABLE, "no upstream credential available")
            .into_response();
    };

    let upstream = match state.upstream.fetch_asset(&credential, path).await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(
                credential_id = %credential.id,
                asset = %path,
                error = %err,
                "asset fetch failed"
            );
            let status = match (err.kind, err.status) {
                (_, Some(404)) => StatusCode::NOT_FOUND,
                (UpstreamErrorKind::RateLimited, _) => StatusCode::TOO_MANY_REQUESTS,
                _ => StatusCode::BAD_GATEWAY,
            };
            return status.into_response();
        }
    };

    let mut response = Response::new(Body::empty());
    let headers = response.headers_mut();
    for name in &FORWARDED_HEADERS {
        if let Some(value) = upstream.headers().get(name) {
            headers.insert(name.clone(), value.clone());
        }
    }
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("public, max-age=86400"),
    );
    *response.body_mut() = Body::from_stream(upstream.bytes_stream());
    response
}

/// Relative, non-empty, and free of traversal segments.
fn is_safe_asset_path(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && !path.contains("://")
        && path
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}

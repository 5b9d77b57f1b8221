use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{self, Body};
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::api::{assets, health, images, messages, models, videos};
use crate::state::AppState;

enum RouteMatch<'a> {
    Health,
    Models,
    ImageGenerations,
    ImageEdits,
    VideoGenerations,
    Messages,
    Asset { path: &'a str },
    MethodNotAllowed,
    NotFound,
}

/// Dispatch a raw HTTP request to the matching ingress handler.
///
/// # Errors
///
/// This function currently never returns `Err` and uses `Infallible`.
pub async fn dispatch_request(
    state: Arc<AppState>,
    base_path: Arc<str>,
    request: Request<Body>,
) -> Result<Response, Infallible> {
    let (parts, body) = request.into_parts();
    let route = match_route(&parts.method, parts.uri.path(), base_path.as_ref());

    let response = match route {
        RouteMatch::Health => health::health_handler(State(state)).into_response(),
        RouteMatch::Models => models::handler(State(state), &parts.headers).await,
        RouteMatch::Asset { path } => assets::handler(state, path).await,
        RouteMatch::ImageGenerations => {
            let body_bytes = match read_request_body(body, state.config.server.max_body_bytes).await {
                Ok(bytes) => bytes,
                Err(response) => return Ok(response),
            };
            images::generations(State(state), parts.headers, body_bytes).await
        }
        RouteMatch::ImageEdits => {
            let body_bytes = match read_request_body(body, state.config.server.max_body_bytes).await {
                Ok(bytes) => bytes,
                Err(response) => return Ok(response),
            };
            images::edits(State(state), parts.headers, body_bytes).await
        }
        RouteMatch::VideoGenerations => {
            let body_bytes = match read_request_body(body, state.config.server.max_body_bytes).await {
                Ok(bytes) => bytes,
                Err(response) => return Ok(response),
            };
            videos::generations(State(state), parts.headers, body_bytes).await
        }
        RouteMatch::Messages => {
            let body_bytes = match read_request_body(body, state.config.server.max_body_bytes).await {
                Ok(bytes) => bytes,
                Err(response) => return Ok(response),
            };
            messages::handler(State(state), parts.headers, body_bytes).await
        }
        RouteMatch::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        RouteMatch::NotFound => StatusCode::NOT_FOUND.into_response(),
    };

    Ok(response)
}

#[must_use]
pub fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("/{}", trimmed.trim_end_matches('/'))
    }
}

async fn read_request_body(body: Body, limit: usize) -> Result<bytes::Bytes, Response> {
    body::to_bytes(body, limit).await.map_err(|_| {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Request body too large (max {limit} bytes)"),
        )
            .into_response()
    })
}

fn post_only<'a>(method: &Method, route: RouteMatch<'a>) -> RouteMatch<'a> {
    if method == Method::POST {
        route
    } else {
        RouteMatch::MethodNotAllowed
    }
}

fn get_only<'a>(method: &Method, route: RouteMatch<'a>) -> RouteMatch<'a> {
    if method == Method::GET {
        route
    } else {
        RouteMatch::MethodNotAllowed
    }
}

fn match_route<'a>(method: &Method, path: &'a str, base_path: &str) -> RouteMatch<'a> {
    let Some(path) = strip_base_path(path, base_path) else {
        return RouteMatch::NotFound;
    };

    match path {
        "/" => get_only(method, RouteMatch::Health),
        "/v1/models" => get_only(method, RouteMatch::Models),
        "/v1/images/generations" => post_only(method, RouteMatch::ImageGenerations),
        "/v1/images/edits" => post_only(method, RouteMatch::ImageEdits),
        "/v1/videos/generations" => post_only(method, RouteMatch::VideoGenerations),
        "/v1/messages" => post_only(method, RouteMatch::Messages),
        _ => match path.strip_prefix("/assets/") {
            Some("") | None => RouteMatch::NotFound,
            Some(asset) => get_only(method, RouteMatch::Asset { path: asset }),
        },
    }
}

fn strip_base_path<'a>(path: &'a str, base_path: &str) -> Option<&'a str> {
    if base_path.is_empty() {
        return Some(path);
    }

    let remainder = path.strip_prefix(base_path)?;
    if remainder.is_empty() {
        Some("/")
    } else if remainder.starts_with('/') {
        Some(remainder)
    } else {
        None
    }
}

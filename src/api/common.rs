//! Helpers shared by the ingress handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::response::{IntoResponse, Json, Response};
use base64::Engine as _;
use bytes::Bytes;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;

use crate::config::validation::KNOWN_ASPECT_RATIOS;
use crate::config::Modality;
use crate::error::{into_axum_response, GatewayError};
use crate::protocol::openai_media::{encode_event, render_response};
use crate::protocol::{IngressApi, RenderContext};
use crate::relay::{collect, relay, GenerationRequest, SourceImage};
use crate::routing::ResolvedModel;
use crate::state::AppState;

#[inline]
pub(crate) fn sse_ok_response(body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}

/// Deserialize a JSON request body.
///
/// # Errors
///
/// Returns `GatewayError::InvalidRequest` with the serde message.
pub(crate) fn parse_json_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, GatewayError> {
    serde_json::from_slice(body)
        .map_err(|err| GatewayError::InvalidRequest(format!("Invalid JSON body: {err}")))
}

/// Resolve `model` and require that it produces `modality`.
pub(crate) fn resolve_model(
    state: &AppState,
    model: &str,
    modality: Modality,
) -> Result<ResolvedModel, GatewayError> {
    let resolved = state.models.resolve(model)?;
    if resolved.modality != modality {
        return Err(GatewayError::InvalidRequest(format!(
            "model '{model}' serves {} requests, not {modality}",
            resolved.modality
        )));
    }
    Ok(resolved)
}

pub(crate) fn require_prompt(prompt: &str) -> Result<(), GatewayError> {
    if prompt.trim().is_empty() {
        return Err(GatewayError::InvalidRequest(
            "'prompt' must not be empty".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_aspect_ratio(value: &str) -> Result<String, GatewayError> {
    let trimmed = value.trim();
    if KNOWN_ASPECT_RATIOS.contains(&trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err(GatewayError::InvalidRequest(format!(
            "unsupported aspect ratio '{trimmed}', expected one of {}",
            KNOWN_ASPECT_RATIOS.join(", ")
        )))
    }
}

/// Decode an image given as a data URL or bare base64.
pub(crate) fn decode_inline_image(value: &str) -> Result<SourceImage, GatewayError> {
    let (declared_mime, payload) = match value.strip_prefix("data:") {
        Some(rest) => {
            let (header, data) = rest.split_once(',').ok_or_else(|| {
                GatewayError::InvalidRequest("malformed data URL".to_string())
            })?;
            let mime = header.strip_suffix(";base64").ok_or_else(|| {
                GatewayError::InvalidRequest("data URL must be base64 encoded".to_string())
            })?;
            (Some(mime.to_string()), data)
        }
        None => (None, value),
    };

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|err| GatewayError::InvalidRequest(format!("invalid base64 image: {err}")))?;
    if bytes.is_empty() {
        return Err(GatewayError::InvalidRequest("image is empty".to_string()));
    }

    let mime = declared_mime
        .filter(|m| m.starts_with("image/"))
        .or_else(|| sniff_image_mime(&bytes).map(str::to_string))
        .ok_or_else(|| GatewayError::InvalidRequest("unrecognized image format".to_string()))?;
    let file_name = format!("image.{}", extension_for(&mime));
    Ok(SourceImage::Inline {
        bytes: Bytes::from(bytes),
        mime,
        file_name,
    })
}

/// Source image from either a remote URL or inline data.
pub(crate) fn parse_source_image(value: &str) -> Result<SourceImage, GatewayError> {
    let trimmed = value.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        url::Url::parse(trimmed)
            .map_err(|err| GatewayError::InvalidRequest(format!("invalid image URL: {err}")))?;
        return Ok(SourceImage::Remote(trimmed.to_string()));
    }
    decode_inline_image(trimmed)
}

fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

fn extension_for(mime: &str) -> &str {
    match mime {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "png",
    }
}

pub(crate) fn render_context(
    state: &AppState,
    request: &GenerationRequest,
    id_prefix: &str,
) -> RenderContext {
    RenderContext {
        id: state.next_id(id_prefix),
        model: request.model.public_id.to_string(),
        prompt: request.prompt.clone(),
        target: request.target,
        modality: request.modality,
        aspect_ratio: request.aspect_ratio.clone(),
        created: crate::util::unix_now_secs(),
        input_tokens: crate::observability::token_counter::estimate_tokens(&request.prompt),
    }
}

/// Run a media generation and answer in the OpenAI-style media protocol.
pub(crate) async fn respond_openai_media(
    state: &AppState,
    key_id: Arc<str>,
    request: GenerationRequest,
    stream: bool,
) -> Response {
    let ctx = render_context(state, &request, "gen-");
    tracing::info!(
        request_id = %ctx.id,
        model = %ctx.model,
        modality = %ctx.modality,
        target = ctx.target,
        stream,
        "media request accepted"
    );
    let events = relay(state.relay_context(key_id), request);

    if stream {
        let frames = events.filter_map(move |event| {
            let frame = encode_event(&ctx, &event).map(|f| Ok::<_, Infallible>(Bytes::from(f)));
            async move { frame }
        });
        return sse_ok_response(Body::from_stream(frames));
    }

    match collect(events).await {
        Ok(outcome) => Json(render_response(&ctx, &outcome)).into_response(),
        Err(err) => into_axum_response(&GatewayError::Relay(err), IngressApi::OpenAiMedia),
    }
}

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use serde_json::Value;

use super::common::{decode_inline_image, parse_json_body, render_context, sse_ok_response};
use crate::config::Modality;
use crate::error::{into_axum_response, GatewayError};
use crate::protocol::anthropic::{render_message, AnthropicRequest, AnthropicStreamEncoder};
use crate::protocol::IngressApi;
use crate::relay::{collect, relay, GenerationRequest, RelayEvent, SourceImage};
use crate::state::AppState;

const INGRESS: IngressApi = IngressApi::Anthropic;

type EventStream = BoxStream<'static, RelayEvent>;

pub async fn handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let key_id = match state.authenticate(INGRESS, &headers) {
        Ok(id) => id,
        Err(err) => return into_axum_response(&err, INGRESS),
    };
    let request = match parse_json_body::<AnthropicRequest>(&body) {
        Ok(request) => request,
        Err(err) => return into_axum_response(&err, INGRESS),
    };
    let stream = request.stream.unwrap_or(false);
    let generation = match build_generation(&state, &request) {
        Ok(generation) => generation,
        Err(err) => return into_axum_response(&err, INGRESS),
    };

    let ctx = render_context(&state, &generation, "msg_");
    tracing::info!(
        request_id = %ctx.id,
        model = %ctx.model,
        modality = %ctx.modality,
        stream,
        "messages request accepted"
    );
    let events = relay(state.relay_context(key_id), generation);

    if stream {
        let encoder = AnthropicStreamEncoder::new(ctx);
        return sse_ok_response(Body::from_stream(envelope_stream(events.boxed(), encoder)));
    }

    match collect(events).await {
        Ok(outcome) => Json(render_message(&ctx, &outcome)).into_response(),
        Err(err) => into_axum_response(&GatewayError::Relay(err), INGRESS),
    }
}

/// Encoded frames for the whole envelope; closes it even if the relay stops early.
fn envelope_stream(
    events: EventStream,
    encoder: AnthropicStreamEncoder,
) -> impl futures_util::Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    stream::unfold(Some((events, encoder)), |state| async move {
        let (mut events, mut encoder) = state?;
        let (chunk, next) = match events.next().await {
            Some(event) => {
                let chunk = encoder.encode(&event);
                let next = (!encoder.is_closed()).then_some((events, encoder));
                (chunk, next)
            }
            None => (encoder.finish(), None),
        };
        Some((Ok(Bytes::from(chunk)), next))
    })
    .filter(|chunk| {
        let keep = chunk.as_ref().map_or(true, |bytes| !bytes.is_empty());
        futures_util::future::ready(keep)
    })
}

fn build_generation(
    state: &AppState,
    request: &AnthropicRequest,
) -> Result<GenerationRequest, GatewayError> {
    if request.messages.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "'messages' must not be empty".to_string(),
        ));
    }
    let model = state.models.resolve(&request.model)?;
    let modality = model.modality;

    let prompt = if modality == Modality::Text {
        flatten_conversation(request)
    } else {
        last_user_text(request)
    };
    let source_image = match modality {
        Modality::ImageEdit | Modality::Video => last_user_image(request)?,
        Modality::Text | Modality::Image => None,
    };
    if modality == Modality::ImageEdit && !matches!(source_image, Some(SourceImage::Inline { .. }))
    {
        return Err(GatewayError::InvalidRequest(
            "image edit requires a base64 image block in the last user message".to_string(),
        ));
    }
    // An edit may run on the source image alone.
    if prompt.trim().is_empty() && modality != Modality::ImageEdit {
        return Err(GatewayError::InvalidRequest(
            "conversation contains no text".to_string(),
        ));
    }

    let mut generation = GenerationRequest::new(model, prompt);
    generation.nsfw = state.config.features.enable_nsfw;
    generation.source_image = source_image;
    if modality == Modality::Video {
        generation.video.length_secs = state.config.features.video_length_secs;
        generation.video.resolution = state.config.features.video_resolution.clone();
    }
    Ok(generation)
}

/// Text of a `content` value: a string or an array of blocks.
fn content_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(blocks) => {
            let mut out = String::new();
            for block in blocks {
                if block.get("type").and_then(Value::as_str) == Some("text") {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        if !out.is_empty() {
                            out.push('\n');
                        }
                        out.push_str(text);
                    }
                }
            }
            out
        }
        _ => String::new(),
    }
}

/// One prompt for the upstream's single-turn chat.
fn flatten_conversation(request: &AnthropicRequest) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = request.system.as_ref().map(content_text) {
        if !system.trim().is_empty() {
            parts.push(format!("system: {system}"));
        }
    }
    if request.messages.len() == 1 && parts.is_empty() {
        return content_text(&request.messages[0].content);
    }
    for message in &request.messages {
        let text = content_text(&message.content);
        if !text.trim().is_empty() {
            parts.push(format!("{}: {text}", message.role));
        }
    }
    parts.join("\n\n")
}

fn last_user_text(request: &AnthropicRequest) -> String {
    request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| content_text(&m.content))
        .unwrap_or_default()
}

fn last_user_image(request: &AnthropicRequest) -> Result<Option<SourceImage>, GatewayError> {
    let Some(message) = request.messages.iter().rev().find(|m| m.role == "user") else {
        return Ok(None);
    };
    let Some(blocks) = message.content.as_array() else {
        return Ok(None);
    };
    for block in blocks {
        if block.get("type").and_then(Value::as_str) != Some("image") {
            continue;
        }
        let Some(source) = block.get("source") else {
            continue;
        };
        match source.get("type").and_then(Value::as_str) {
            Some("base64") => {
                let data = source.get("data").and_then(Value::as_str).unwrap_or("");
                let media_type = source
                    .get("media_type")
                    .and_then(Value::as_str)
                    .unwrap_or("image/png");
                return decode_inline_image(&format!("data:{media_type};base64,{data}")).map(Some);
            }
            Some("url") => {
                if let Some(url) = source.get("url").and_then(Value::as_str) {
                    return Ok(Some(SourceImage::Remote(url.to_string())));
                }
            }
            _ => {}
        }
    }
    Ok(None)
}

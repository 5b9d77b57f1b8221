use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use bytes::Bytes;
use serde::Deserialize;

use super::common::{
    decode_inline_image, parse_json_body, require_prompt, resolve_model, respond_openai_media,
    validate_aspect_ratio,
};
use crate::config::Modality;
use crate::error::{into_axum_response, GatewayError};
use crate::protocol::openai_media::aspect_ratio_from_size;
use crate::protocol::IngressApi;
use crate::relay::GenerationRequest;
use crate::state::AppState;

const INGRESS: IngressApi = IngressApi::OpenAiMedia;

/// `POST /v1/images/generations` body.
#[derive(Debug, Deserialize)]
pub struct ImageGenerationBody {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub n: Option<u32>,
    /// OpenAI `WxH` size, mapped to the nearest aspect ratio.
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub nsfw: Option<bool>,
}

/// `POST /v1/images/edits` body. `image` is a data URL or bare base64.
#[derive(Debug, Deserialize)]
pub struct ImageEditBody {
    pub model: String,
    #[serde(default)]
    pub prompt: String,
    pub image: String,
    #[serde(default)]
    pub n: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub credential_id: Option<String>,
}

pub async fn generations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let key_id = match state.authenticate(INGRESS, &headers) {
        Ok(id) => id,
        Err(err) => return into_axum_response(&err, INGRESS),
    };
    let prepared = parse_json_body::<ImageGenerationBody>(&body)
        .and_then(|body| build_generation(&state, body));
    match prepared {
        Ok((request, stream)) => respond_openai_media(&state, key_id, request, stream).await,
        Err(err) => into_axum_response(&err, INGRESS),
    }
}

pub async fn edits(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let key_id = match state.authenticate(INGRESS, &headers) {
        Ok(id) => id,
        Err(err) => return into_axum_response(&err, INGRESS),
    };
    let prepared =
        parse_json_body::<ImageEditBody>(&body).and_then(|body| build_edit(&state, body));
    match prepared {
        Ok((request, stream)) => respond_openai_media(&state, key_id, request, stream).await,
        Err(err) => into_axum_response(&err, INGRESS),
    }
}

fn image_count(state: &AppState, n: Option<u32>) -> Result<u32, GatewayError> {
    let max = state.config.features.max_images_per_request;
    match n.unwrap_or(1) {
        0 => Err(GatewayError::InvalidRequest(
            "'n' must be at least 1".to_string(),
        )),
        n if n > max => Err(GatewayError::InvalidRequest(format!(
            "'n' must not exceed {max}"
        ))),
        n => Ok(n),
    }
}

fn build_generation(
    state: &AppState,
    body: ImageGenerationBody,
) -> Result<(GenerationRequest, bool), GatewayError> {
    require_prompt(&body.prompt)?;
    let model = resolve_model(state, &body.model, Modality::Image)?;
    let target = image_count(state, body.n)?;

    let mut request = GenerationRequest::new(model, body.prompt);
    request.target = target;
    request.nsfw = body.nsfw.unwrap_or(state.config.features.enable_nsfw);
    if let Some(aspect_ratio) = body.aspect_ratio.as_deref() {
        request.aspect_ratio = validate_aspect_ratio(aspect_ratio)?;
    } else if let Some(size) = body.size.as_deref() {
        request.aspect_ratio = aspect_ratio_from_size(size)
            .ok_or_else(|| GatewayError::InvalidRequest(format!("invalid size '{size}'")))?
            .to_string();
    }
    Ok((request, body.stream))
}

fn build_edit(
    state: &AppState,
    body: ImageEditBody,
) -> Result<(GenerationRequest, bool), GatewayError> {
    let model = resolve_model(state, &body.model, Modality::ImageEdit)?;
    let target = image_count(state, body.n)?;
    let source = decode_inline_image(body.image.trim())?;

    let mut request = GenerationRequest::new(model, body.prompt);
    request.target = target;
    request.nsfw = state.config.features.enable_nsfw;
    request.source_image = Some(source);
    request.pinned_credential = body.credential_id;
    Ok((request, body.stream))
}

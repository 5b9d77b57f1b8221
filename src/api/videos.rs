use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use bytes::Bytes;
use serde::Deserialize;

use super::common::{
    parse_json_body, parse_source_image, require_prompt, resolve_model, respond_openai_media,
    validate_aspect_ratio,
};
use crate::config::Modality;
use crate::error::{into_axum_response, GatewayError};
use crate::protocol::IngressApi;
use crate::relay::GenerationRequest;
use crate::state::AppState;

const INGRESS: IngressApi = IngressApi::OpenAiMedia;
const SUPPORTED_RESOLUTIONS: &[&str] = &["480p", "720p"];
const MAX_VIDEO_LENGTH_SECS: u32 = 15;

/// `POST /v1/videos/generations` body.
#[derive(Debug, Deserialize)]
pub struct VideoGenerationBody {
    pub model: String,
    pub prompt: String,
    /// Optional source frame: an http(s) URL, a data URL or bare base64.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    #[serde(default, alias = "duration")]
    pub length: Option<u32>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub nsfw: Option<bool>,
    /// Credential that produced `image`, tried first.
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
    let prepared = parse_json_body::<VideoGenerationBody>(&body)
        .and_then(|body| build_video(&state, body));
    match prepared {
        Ok((request, stream)) => respond_openai_media(&state, key_id, request, stream).await,
        Err(err) => into_axum_response(&err, INGRESS),
    }
}

fn build_video(
    state: &AppState,
    body: VideoGenerationBody,
) -> Result<(GenerationRequest, bool), GatewayError> {
    require_prompt(&body.prompt)?;
    let model = resolve_model(state, &body.model, Modality::Video)?;
    let features = &state.config.features;

    let length_secs = body.length.unwrap_or(features.video_length_secs);
    if length_secs == 0 || length_secs > MAX_VIDEO_LENGTH_SECS {
        return Err(GatewayError::InvalidRequest(format!(
            "'length' must be between 1 and {MAX_VIDEO_LENGTH_SECS} seconds"
        )));
    }
    let resolution = body
        .resolution
        .unwrap_or_else(|| features.video_resolution.clone());
    if !SUPPORTED_RESOLUTIONS.contains(&resolution.as_str()) {
        return Err(GatewayError::InvalidRequest(format!(
            "unsupported resolution '{resolution}'"
        )));
    }

    let mut request = GenerationRequest::new(model, body.prompt);
    request.nsfw = body.nsfw.unwrap_or(features.enable_nsfw);
    request.video.length_secs = length_secs;
    request.video.resolution = resolution;
    request.pinned_credential = body.credential_id;
    if let Some(aspect_ratio) = body.aspect_ratio.as_deref() {
        request.aspect_ratio = validate_aspect_ratio(aspect_ratio)?;
    }
    if let Some(image) = body.image.as_deref().filter(|s| !s.trim().is_empty()) {
        request.source_image = Some(parse_source_image(image)?);
    }
    Ok((request, body.stream))
}

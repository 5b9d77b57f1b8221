use base64::Engine as _;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use http::header::{ACCEPT, CONTENT_TYPE, COOKIE, ORIGIN, REFERER, USER_AGENT};
use http::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use super::classify::{classify_send_error, classify_status};
use super::{HttpTransport, UpstreamError};
use crate::config::UpstreamConfig;
use crate::error::GatewayError;
use crate::pool::Credential;
use crate::routing::ResolvedModel;
use crate::util::join_url;

/// Raw newline-delimited upstream body.
pub type ByteStream = BoxStream<'static, Result<Bytes, reqwest::Error>>;

const ERROR_BODY_LIMIT: usize = 64 * 1024;

/// Handle to a file stored upstream by [`UpstreamClient::upload_file`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReference {
    pub file_metadata_id: String,
    pub file_uri: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadPayload<'a> {
    file_name: &'a str,
    file_mime_type: &'a str,
    content: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageGenerationConfig<'a> {
    aspect_ratio: &'a str,
    enable_nsfw: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageEditConfig<'a> {
    source_file_uri: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoGenerationConfig<'a> {
    aspect_ratio: &'a str,
    video_length: u32,
    resolution: &'a str,
    enable_nsfw: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_image_url: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConversationPayload<'a> {
    temporary: bool,
    model_name: &'a str,
    model_mode: &'a str,
    message: &'a str,
    file_attachments: Vec<&'a str>,
    disable_search: bool,
    enable_image_generation: bool,
    image_generation_count: u32,
    enable_image_streaming: bool,
    return_image_bytes: bool,
    send_final_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_generation_config: Option<ImageGenerationConfig<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_edit_config: Option<ImageEditConfig<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    video_generation_config: Option<VideoGenerationConfig<'a>>,
}

impl<'a> ConversationPayload<'a> {
    fn chat(model: &'a ResolvedModel, message: &'a str) -> Self {
        Self {
            temporary: true,
            model_name: &model.upstream_model,
            model_mode: &model.upstream_mode,
            message,
            file_attachments: Vec::new(),
            disable_search: false,
            enable_image_generation: false,
            image_generation_count: 0,
            enable_image_streaming: false,
            return_image_bytes: false,
            send_final_metadata: true,
            image_generation_config: None,
            image_edit_config: None,
            video_generation_config: None,
        }
    }
}

/// Settings for one video generation call.
#[derive(Debug, Clone, Copy)]
pub struct VideoParams<'a> {
    pub aspect_ratio: &'a str,
    pub length_secs: u32,
    pub resolution: &'a str,
    pub nsfw: bool,
    pub source_image_url: Option<&'a str>,
}

/// Client for the upstream's conversation and upload endpoints.
///
/// Every call opens a fresh request with cookies derived from one credential.
/// Non-2xx statuses are classified; nothing here retries.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    transport: HttpTransport,
    base_url: String,
    conversation_url: String,
    upload_url: String,
    asset_host: String,
    session_cookie: String,
    session_rw_cookie: String,
    user_agent: HeaderValue,
}

impl UpstreamClient {
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when the HTTP client cannot be built or the
    /// user agent is not a valid header value.
    pub fn new(config: &UpstreamConfig) -> Result<Self, GatewayError> {
        let transport = HttpTransport::new(config)?;
        let user_agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|_| GatewayError::Config("upstream.user_agent is not a valid header".into()))?;
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(Self {
            transport,
            conversation_url: join_url(&base_url, &config.paths.conversation),
            upload_url: join_url(&base_url, &config.paths.upload),
            base_url,
            asset_host: config.asset_host.trim_end_matches('/').to_string(),
            session_cookie: config.session_cookie.clone(),
            session_rw_cookie: config.session_rw_cookie.clone(),
            user_agent,
        })
    }

    /// Cookie header value for `credential`.
    #[must_use]
    pub fn cookie_header(&self, credential: &Credential) -> String {
        format!(
            "{}={}; {}={}",
            self.session_cookie, credential.session, self.session_rw_cookie, credential.session_rw
        )
    }

    fn headers(&self, credential: &Credential) -> Result<HeaderMap, UpstreamError> {
        let cookie = HeaderValue::from_str(&self.cookie_header(credential)).map_err(|_| {
            UpstreamError::fatal(format!(
                "credential '{}' contains characters not allowed in a cookie",
                credential.id
            ))
        })?;
        let mut headers = HeaderMap::with_capacity(6);
        headers.insert(COOKIE, cookie);
        headers.insert(USER_AGENT, self.user_agent.clone());
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        if let Ok(origin) = HeaderValue::from_str(&self.base_url) {
            headers.insert(REFERER, origin.clone());
            headers.insert(ORIGIN, origin);
        }
        Ok(headers)
    }

    async fn send_checked(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, UpstreamError> {
        let response = request
            .send()
            .await
            .map_err(|err| classify_send_error(&err))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = read_error_body(response).await;
        Err(classify_status(status, &body))
    }

    async fn open_conversation(
        &self,
        credential: &Credential,
        payload: &ConversationPayload<'_>,
    ) -> Result<ByteStream, UpstreamError> {
        let request = self
            .transport
            .client()
            .post(&self.conversation_url)
            .headers(self.headers(credential)?)
            .header(CONTENT_TYPE, "application/json")
            .body(encode_json(payload)?);
        let response = self.send_checked(request).await?;
        Ok(response.bytes_stream().boxed())
    }

    /// Text chat with the conversation already flattened to one prompt.
    ///
    /// # Errors
    ///
    /// Returns a classified [`UpstreamError`] when the call is rejected or fails.
    pub async fn stream_text(
        &self,
        credential: &Credential,
        model: &ResolvedModel,
        prompt: &str,
    ) -> Result<ByteStream, UpstreamError> {
        let payload = ConversationPayload::chat(model, prompt);
        self.open_conversation(credential, &payload).await
    }

    /// Image generation for `count` images.
    ///
    /// # Errors
    ///
    /// Returns a classified [`UpstreamError`] when the call is rejected or fails.
    pub async fn stream_image(
        &self,
        credential: &Credential,
        model: &ResolvedModel,
        prompt: &str,
        count: u32,
        aspect_ratio: &str,
        nsfw: bool,
    ) -> Result<ByteStream, UpstreamError> {
        let mut payload = ConversationPayload::chat(model, prompt);
        payload.disable_search = true;
        payload.enable_image_generation = true;
        payload.enable_image_streaming = true;
        payload.image_generation_count = count;
        payload.image_generation_config = Some(ImageGenerationConfig {
            aspect_ratio,
            enable_nsfw: nsfw,
        });
        self.open_conversation(credential, &payload).await
    }

    /// Store a file upstream and return its reference.
    ///
    /// # Errors
    ///
    /// Returns a classified [`UpstreamError`]; an unreadable success body is fatal.
    pub async fn upload_file(
        &self,
        credential: &Credential,
        bytes: &[u8],
        mime: &str,
        file_name: &str,
    ) -> Result<FileReference, UpstreamError> {
        let payload = UploadPayload {
            file_name,
            file_mime_type: mime,
            content: base64::engine::general_purpose::STANDARD.encode(bytes),
        };
        let request = self
            .transport
            .client()
            .post(&self.upload_url)
            .headers(self.headers(credential)?)
            .header(CONTENT_TYPE, "application/json")
            .body(encode_json(&payload)?);
        let response = self.send_checked(request).await?;
        let body = response
            .bytes()
            .await
            .map_err(|err| classify_send_error(&err))?;
        serde_json::from_slice::<FileReference>(&body)
            .map_err(|err| UpstreamError::fatal(format!("invalid upload response: {err}")))
    }

    /// Edit of a previously uploaded image, producing `count` results.
    ///
    /// # Errors
    ///
    /// Returns a classified [`UpstreamError`] when the call is rejected or fails.
    pub async fn stream_image_edit(
        &self,
        credential: &Credential,
        model: &ResolvedModel,
        prompt: &str,
        file: &FileReference,
        count: u32,
    ) -> Result<ByteStream, UpstreamError> {
        let mut payload = ConversationPayload::chat(model, prompt);
        payload.disable_search = true;
        payload.enable_image_generation = true;
        payload.enable_image_streaming = true;
        payload.image_generation_count = count;
        payload.file_attachments.push(&file.file_metadata_id);
        payload.image_edit_config = Some(ImageEditConfig {
            source_file_uri: &file.file_uri,
        });
        self.open_conversation(credential, &payload).await
    }

    /// Video generation, optionally animating a source image.
    ///
    /// # Errors
    ///
    /// Returns a classified [`UpstreamError`] when the call is rejected or fails.
    pub async fn stream_video(
        &self,
        credential: &Credential,
        model: &ResolvedModel,
        prompt: &str,
        params: VideoParams<'_>,
    ) -> Result<ByteStream, UpstreamError> {
        let mut payload = ConversationPayload::chat(model, prompt);
        payload.disable_search = true;
        payload.video_generation_config = Some(VideoGenerationConfig {
            aspect_ratio: params.aspect_ratio,
            video_length: params.length_secs,
            resolution: params.resolution,
            enable_nsfw: params.nsfw,
            source_image_url: params.source_image_url,
        });
        self.open_conversation(credential, &payload).await
    }

    /// Fetch an asset below the asset host with the credential's cookies.
    ///
    /// # Errors
    ///
    /// Returns a classified [`UpstreamError`] when the fetch is rejected or fails.
    pub async fn fetch_asset(
        &self,
        credential: &Credential,
        path: &str,
    ) -> Result<reqwest::Response, UpstreamError> {
        let request = self
            .transport
            .client()
            .get(join_url(&self.asset_host, path))
            .headers(self.headers(credential)?);
        self.send_checked(request).await
    }
}

fn encode_json<T: Serialize>(payload: &T) -> Result<Vec<u8>, UpstreamError> {
    serde_json::to_vec(payload)
        .map_err(|err| UpstreamError::fatal(format!("failed to encode upstream request: {err}")))
}

async fn read_error_body(response: reqwest::Response) -> String {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(Ok(chunk)) = stream.next().await {
        let room = ERROR_BODY_LIMIT.saturating_sub(body.len());
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if body.len() >= ERROR_BODY_LIMIT {
            break;
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

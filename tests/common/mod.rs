#![allow(dead_code)]

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use genrelay::config::{
    AppConfig, AssetsConfig, ClientAuthConfig, ClientKey, CredentialEntry, CredentialsConfig,
    FeaturesConfig, Modality, ModelConfig, ServerConfig, UpstreamConfig,
};
use genrelay::pool::usage::MemoryUsageRecorder;
use genrelay::pool::{Credential, MemoryCredentialStore};
use genrelay::relay::RelayContext;
use genrelay::routing::ResolvedModel;
use genrelay::state::AppState;
use genrelay::stream::MediaExtractor;
use genrelay::transport::UpstreamClient;
use parking_lot::Mutex;
use serde_json::{json, Value};

pub const CLIENT_KEY: &str = "client-key";
pub const CLIENT_KEY_ID: &str = "team-a";

/// One conversation or upload call seen by the mock upstream.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub path: &'static str,
    pub session: String,
    pub body: Value,
}

/// In-process upstream whose behavior is keyed on the session cookie prefix.
///
/// `busy-*` answers 429, `img-*` streams the requested number of images,
/// `pair-*` at most two, `flaky-*` two images and then a mid-stream rate-limit
/// error, `dup-*` the same two URLs every time, `empty-*`
/// completes without media, `blocked-*` streams a fatal error, `text-*`
/// streams "Hello", `textbusy-*` streams a token then a rate-limit error and
/// `video-*` streams one video.
#[derive(Clone, Default)]
pub struct MockUpstream {
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockUpstream {
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn conversation_sessions(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.path == "conversation")
            .map(|c| c.session.clone())
            .collect()
    }
}

pub struct MockServer {
    pub base_url: String,
    pub upstream: MockUpstream,
    handle: tokio::task::JoinHandle<()>,
}

impl MockServer {
    pub fn asset_host(&self) -> String {
        format!("{}/cdn", self.base_url)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn spawn_upstream() -> MockServer {
    let upstream = MockUpstream::default();
    let app = Router::new()
        .route("/rest/app-chat/conversations/new", post(conversation))
        .route("/rest/app-chat/upload-file", post(upload))
        .route("/cdn/{*path}", get(asset))
        .with_state(upstream.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockServer {
        base_url: format!("http://{addr}"),
        upstream,
        handle,
    }
}

fn session_of(headers: &HeaderMap) -> String {
    headers
        .get("cookie")
        .and_then(|v| v.to_str().ok())
        .and_then(|cookie| {
            cookie
                .split("; ")
                .find_map(|pair| pair.strip_prefix("sso="))
        })
        .unwrap_or_default()
        .to_string()
}

fn ndjson(frames: &[Value]) -> Response {
    let mut body = String::new();
    for frame in frames {
        body.push_str(&frame.to_string());
        body.push('\n');
    }
    (
        StatusCode::OK,
        [("content-type", "application/x-ndjson")],
        body,
    )
        .into_response()
}

fn response_frame(response: Value) -> Value {
    json!({ "result": { "response": response } })
}

fn image_frames(urls: &[String]) -> Vec<Value> {
    let mut frames: Vec<Value> = (0..urls.len())
        .map(|i| {
            response_frame(json!({
                "streamingImageGenerationResponse": { "imageIndex": i, "progress": 100 }
            }))
        })
        .collect();
    frames.push(response_frame(json!({
        "modelResponse": { "generatedImageUrls": urls }
    })));
    frames
}

async fn conversation(
    State(mock): State<MockUpstream>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let session = session_of(&headers);
    mock.calls.lock().push(MockCall {
        path: "conversation",
        session: session.clone(),
        body: body.clone(),
    });
    let count = body["imageGenerationCount"].as_u64().unwrap_or(1).max(1);
    let kind = session.split('-').next().unwrap_or_default();

    let unique = |n: u64| -> Vec<String> {
        (0..n)
            .map(|i| format!("https://cdn.test/{session}/{i}.png"))
            .collect()
    };

    match kind {
        "busy" => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": { "message": "Too many requests" } })),
        )
            .into_response(),
        "img" => ndjson(&image_frames(&unique(count))),
        "pair" => ndjson(&image_frames(&unique(count.min(2)))),
        "flaky" => {
            let mut frames: Vec<Value> = unique(count.min(2))
                .into_iter()
                .enumerate()
                .map(|(i, url)| {
                    response_frame(json!({
                        "streamingImageGenerationResponse": {
                            "imageIndex": i,
                            "progress": 100,
                            "imageUrl": url
                        }
                    }))
                })
                .collect();
            frames.push(json!({ "error": { "code": 429, "message": "capacity reached" } }));
            ndjson(&frames)
        }
        "dup" => {
            let shared: Vec<String> = (0..count.min(2))
                .map(|i| format!("https://cdn.test/shared/{i}.png"))
                .collect();
            ndjson(&image_frames(&shared))
        }
        "empty" => ndjson(&[
            response_frame(json!({
                "streamingImageGenerationResponse": { "imageIndex": 0, "progress": 40 }
            })),
            response_frame(json!({ "finalMetadata": {} })),
        ]),
        "blocked" => ndjson(&[json!({
            "error": { "code": 400, "message": "content policy violation" }
        })]),
        "text" => ndjson(&[
            response_frame(json!({ "token": "Hel" })),
            response_frame(json!({ "token": "thinking...", "isThinking": true })),
            response_frame(json!({ "token": "lo" })),
            response_frame(json!({ "modelResponse": { "message": "Hello" } })),
        ]),
        "textbusy" => ndjson(&[
            response_frame(json!({ "token": "partial" })),
            json!({ "error": { "code": 429, "message": "slow down" } }),
        ]),
        "video" => ndjson(&[
            response_frame(json!({
                "streamingVideoGenerationResponse": { "progress": 50 }
            })),
            response_frame(json!({
                "streamingVideoGenerationResponse": {
                    "progress": 100,
                    "videoUrl": format!("https://cdn.test/{session}/clip.mp4")
                }
            })),
            response_frame(json!({ "finalMetadata": {} })),
        ]),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "unknown session").into_response(),
    }
}

async fn upload(
    State(mock): State<MockUpstream>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let session = session_of(&headers);
    mock.calls.lock().push(MockCall {
        path: "upload",
        session,
        body,
    });
    Json(json!({
        "fileMetadataId": "file-1",
        "fileUri": "users/u1/uploads/source.png"
    }))
    .into_response()
}

async fn asset(Path(path): Path<String>) -> Response {
    (
        StatusCode::OK,
        [("content-type", "image/png")],
        format!("asset:{path}"),
    )
        .into_response()
}

pub fn upstream_config(server: &MockServer) -> UpstreamConfig {
    UpstreamConfig::with_base_url(&server.base_url, &server.asset_host())
}

pub fn credentials(sessions: &[&str]) -> Vec<Credential> {
    sessions
        .iter()
        .map(|s| Credential::new(*s, *s, None))
        .collect()
}

pub fn model(id: &str, modality: Modality) -> ResolvedModel {
    ResolvedModel {
        public_id: Arc::from(id),
        upstream_model: Arc::from(format!("{id}-upstream").as_str()),
        upstream_mode: Arc::from("MODEL_MODE_AUTO"),
        modality,
        aspect_ratio: None,
    }
}

/// Relay collaborators over the mock upstream, plus the usage counters.
pub fn relay_context(
    server: &MockServer,
    sessions: &[&str],
) -> (RelayContext, Arc<MemoryUsageRecorder>) {
    let config = upstream_config(server);
    let usage = Arc::new(MemoryUsageRecorder::default());
    let ctx = RelayContext {
        credentials: Arc::new(MemoryCredentialStore::new(credentials(sessions))),
        upstream: Arc::new(UpstreamClient::new(&config).expect("upstream client")),
        media: Arc::new(MediaExtractor::new(&config.asset_host, None)),
        usage: Arc::clone(&usage) as _,
        key_id: Arc::from(CLIENT_KEY_ID),
    };
    (ctx, usage)
}

fn model_config(id: &str, modality: Modality) -> ModelConfig {
    ModelConfig {
        id: id.to_string(),
        upstream_model: format!("{id}-upstream"),
        upstream_mode: "MODEL_MODE_AUTO".to_string(),
        modality,
        aspect_ratio: None,
    }
}

pub fn app_config(server: &MockServer, sessions: &[&str]) -> AppConfig {
    AppConfig {
        server: ServerConfig::default(),
        upstream: upstream_config(server),
        assets: AssetsConfig::default(),
        credentials: CredentialsConfig {
            entries: sessions
                .iter()
                .map(|s| CredentialEntry {
                    id: Some((*s).to_string()),
                    session: (*s).to_string(),
                    session_rw: None,
                    label: None,
                    email: None,
                })
                .collect(),
            file: None,
        },
        models: vec![
            model_config("chat", Modality::Text),
            model_config("imagine", Modality::Image),
            model_config("imagine-edit", Modality::ImageEdit),
            model_config("motion", Modality::Video),
        ],
        client_authentication: ClientAuthConfig {
            keys: vec![ClientKey {
                id: CLIENT_KEY_ID.to_string(),
                key: CLIENT_KEY.to_string(),
            }],
        },
        features: FeaturesConfig::default(),
    }
}

pub fn app_state(server: &MockServer, sessions: &[&str]) -> Arc<AppState> {
    Arc::new(AppState::from_config(app_config(server, sessions)).expect("app state"))
}

pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// What a public model id produces upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    #[default]
    Text,
    Image,
    ImageEdit,
    Video,
}

impl Modality {
    #[must_use]
    pub fn is_media(self) -> bool {
        !matches!(self, Modality::Text)
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modality::Text => write!(f, "text"),
            Modality::Image => write!(f, "image"),
            Modality::ImageEdit => write!(f, "image_edit"),
            Modality::Video => write!(f, "video"),
        }
    }
}

/// Listener and runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub base_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_max_blocking_threads: Option<usize>,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            base_path: String::new(),
            runtime_worker_threads: None,
            runtime_max_blocking_threads: None,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Endpoint paths on the upstream host, relative to `base_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamPaths {
    #[serde(default = "default_conversation_path")]
    pub conversation: String,
    #[serde(default = "default_upload_path")]
    pub upload: String,
}

fn default_conversation_path() -> String {
    "/rest/app-chat/conversations/new".to_string()
}
fn default_upload_path() -> String {
    "/rest/app-chat/upload-file".to_string()
}

impl Default for UpstreamPaths {
    fn default() -> Self {
        Self {
            conversation: default_conversation_path(),
            upload: default_upload_path(),
        }
    }
}

/// Upstream provider connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub asset_host: String,
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,
    #[serde(default = "default_session_rw_cookie")]
    pub session_rw_cookie: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub use_env_proxy: bool,
    #[serde(default)]
    pub paths: UpstreamPaths,
}

fn default_session_cookie() -> String {
    "sso".to_string()
}
fn default_session_rw_cookie() -> String {
    "sso-rw".to_string()
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36".to_string()
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    30
}

impl UpstreamConfig {
    /// Minimal settings pointing at `base_url`, with defaults for everything else.
    #[must_use]
    pub fn with_base_url(base_url: &str, asset_host: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            asset_host: asset_host.to_string(),
            session_cookie: default_session_cookie(),
            session_rw_cookie: default_session_rw_cookie(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            proxy: None,
            use_env_proxy: false,
            paths: UpstreamPaths::default(),
        }
    }
}

/// Asset rewriting settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetsConfig {
    /// When set, asset-host URLs are rewritten to `{public_base_url}/assets/...`.
    #[serde(default)]
    pub public_base_url: Option<String>,
}

/// One imported upstream credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialEntry {
    #[serde(default)]
    pub id: Option<String>,
    pub session: String,
    #[serde(default)]
    pub session_rw: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Credential pool sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub entries: Vec<CredentialEntry>,
    /// Optional bulk-import file, one `session[,session_rw]` per line.
    #[serde(default)]
    pub file: Option<String>,
}

/// Public model id and its upstream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub upstream_model: String,
    #[serde(default = "default_upstream_mode")]
    pub upstream_mode: String,
    #[serde(default)]
    pub modality: Modality,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
}

fn default_upstream_mode() -> String {
    "MODEL_MODE_AUTO".to_string()
}

/// A client API key and the id usage is accounted against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientKey {
    pub id: String,
    pub key: String,
}

/// Client authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAuthConfig {
    pub keys: Vec<ClientKey>,
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default)]
    pub enable_nsfw: bool,
    #[serde(default = "default_max_images_per_request")]
    pub max_images_per_request: u32,
    #[serde(default = "default_video_length_secs")]
    pub video_length_secs: u32,
    #[serde(default = "default_video_resolution")]
    pub video_resolution: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}
fn default_max_images_per_request() -> u32 {
    10
}
fn default_video_length_secs() -> u32 {
    6
}
fn default_video_resolution() -> String {
    "480p".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            enable_nsfw: false,
            max_images_per_request: default_max_images_per_request(),
            video_length_secs: default_video_length_secs(),
            video_resolution: default_video_resolution(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    pub models: Vec<ModelConfig>,
    pub client_authentication: ClientAuthConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] or [`ConfigError::Validation`].
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_example_config() {
        let config = load_config("config.example.yaml");
        assert!(
            config.is_ok(),
            "Failed to load example config: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.upstream.session_cookie, "sso");
        assert!(config.models.iter().any(|m| m.modality == Modality::Video));
        assert_eq!(config.client_authentication.keys.len(), 2);
    }

    #[test]
    fn test_modality_serde() {
        let json = serde_json::to_string(&Modality::ImageEdit).unwrap();
        assert_eq!(json, "\"image_edit\"");
        let modality: Modality = serde_json::from_str("\"video\"").unwrap();
        assert_eq!(modality, Modality::Video);
        assert!(modality.is_media());
        assert!(!Modality::Text.is_media());
    }

    #[test]
    fn test_upstream_defaults_fill_in() {
        let config = parse_config(
            r"
upstream:
  base_url: https://upstream.example
  asset_host: https://assets.example
models:
  - id: chat
    upstream_model: chat-1
client_authentication:
  keys:
    - id: k1
      key: secret
",
        )
        .unwrap();
        assert_eq!(config.upstream.session_rw_cookie, "sso-rw");
        assert_eq!(config.upstream.timeout_secs, 300);
        assert_eq!(config.models[0].upstream_mode, "MODEL_MODE_AUTO");
        assert_eq!(config.models[0].modality, Modality::Text);
        assert_eq!(config.features.max_images_per_request, 10);
        assert!(config.credentials.entries.is_empty());
    }
}

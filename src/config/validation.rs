use std::collections::HashSet;

use super::{AppConfig, ConfigError, Modality};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_upstream(config)?;
    validate_client_keys(config)?;
    validate_models(config)?;
    validate_credentials(config)?;
    validate_features(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.runtime_worker_threads == Some(0) {
        return Err(validation_err(
            "server.runtime_worker_threads must be greater than 0 when set",
        ));
    }
    if server.runtime_max_blocking_threads == Some(0) {
        return Err(validation_err(
            "server.runtime_max_blocking_threads must be greater than 0 when set",
        ));
    }
    if server.max_body_bytes == 0 {
        return Err(validation_err("server.max_body_bytes must be greater than 0"));
    }
    Ok(())
}

fn validate_upstream(config: &AppConfig) -> Result<(), ConfigError> {
    let upstream = &config.upstream;
    if !is_http_url(&upstream.base_url) {
        return Err(validation_err(
            "upstream.base_url must start with http:// or https://",
        ));
    }
    if !is_http_url(&upstream.asset_host) {
        return Err(validation_err(
            "upstream.asset_host must start with http:// or https://",
        ));
    }
    if upstream.session_cookie.trim().is_empty() || upstream.session_rw_cookie.trim().is_empty() {
        return Err(validation_err("upstream cookie names cannot be empty"));
    }
    if upstream.timeout_secs == 0 {
        return Err(validation_err("upstream.timeout_secs must be greater than 0"));
    }
    if upstream.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "upstream.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    for (name, path) in [
        ("conversation", &upstream.paths.conversation),
        ("upload", &upstream.paths.upload),
    ] {
        if !path.starts_with('/') {
            return Err(validation_err(format!(
                "upstream.paths.{name} must start with '/'"
            )));
        }
    }
    if let Some(proxy) = upstream.proxy.as_deref() {
        if url::Url::parse(proxy).is_err() {
            return Err(validation_err(format!(
                "upstream.proxy is not a valid URL: {proxy}"
            )));
        }
    }
    if let Some(public) = config.assets.public_base_url.as_deref() {
        if !is_http_url(public) {
            return Err(validation_err(
                "assets.public_base_url must start with http:// or https://",
            ));
        }
    }
    Ok(())
}

fn validate_client_keys(config: &AppConfig) -> Result<(), ConfigError> {
    let keys = &config.client_authentication.keys;
    if keys.is_empty() {
        return Err(validation_err("client_authentication.keys cannot be empty"));
    }
    let mut ids = HashSet::new();
    let mut secrets = HashSet::new();
    for key in keys {
        if key.id.trim().is_empty() || key.key.trim().is_empty() {
            return Err(validation_err(
                "client_authentication.keys contains an empty id or key",
            ));
        }
        if !ids.insert(key.id.as_str()) {
            return Err(validation_err(format!("Duplicate client key id '{}'", key.id)));
        }
        if !secrets.insert(key.key.as_str()) {
            return Err(validation_err(format!(
                "Client key '{}' reuses another key's secret",
                key.id
            )));
        }
    }
    Ok(())
}

pub(crate) const KNOWN_ASPECT_RATIOS: &[&str] = &["1:1", "2:3", "3:2", "9:16", "16:9"];

fn validate_models(config: &AppConfig) -> Result<(), ConfigError> {
    if config.models.is_empty() {
        return Err(validation_err("models cannot be empty"));
    }
    let mut ids = HashSet::new();
    for model in &config.models {
        if model.id.trim().is_empty() || model.upstream_model.trim().is_empty() {
            return Err(validation_err("model id and upstream_model cannot be empty"));
        }
        if !ids.insert(model.id.as_str()) {
            return Err(validation_err(format!("Duplicate model id '{}'", model.id)));
        }
        if let Some(ratio) = model.aspect_ratio.as_deref() {
            if !KNOWN_ASPECT_RATIOS.contains(&ratio) {
                return Err(validation_err(format!(
                    "Model '{}': unknown aspect_ratio '{}'. Must be one of: {}",
                    model.id,
                    ratio,
                    KNOWN_ASPECT_RATIOS.join(", ")
                )));
            }
        } else if model.modality == Modality::Video {
            tracing::debug!(model = %model.id, "video model without aspect_ratio, 16:9 is used");
        }
    }
    Ok(())
}

fn validate_credentials(config: &AppConfig) -> Result<(), ConfigError> {
    let mut ids = HashSet::new();
    for entry in &config.credentials.entries {
        if entry.session.trim().is_empty() {
            return Err(validation_err("credentials.entries contains an empty session"));
        }
        if let Some(id) = entry.id.as_deref() {
            if !ids.insert(id) {
                return Err(validation_err(format!("Duplicate credential id '{id}'")));
            }
        }
    }
    Ok(())
}

fn validate_features(config: &AppConfig) -> Result<(), ConfigError> {
    let features = &config.features;
    let level = features.log_level.to_uppercase();
    let valid_levels = ["DEBUG", "INFO", "WARNING", "WARN", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "features.log_level '{}' is invalid. Must be one of: {}",
            features.log_level,
            valid_levels.join(", ")
        )));
    }
    if !matches!(features.log_format.as_str(), "text" | "json") {
        return Err(validation_err("features.log_format must be 'text' or 'json'"));
    }
    if features.max_images_per_request == 0 {
        return Err(validation_err(
            "features.max_images_per_request must be greater than 0",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AssetsConfig, ClientAuthConfig, ClientKey, CredentialsConfig, FeaturesConfig,
        ModelConfig, ServerConfig, UpstreamConfig,
    };

    fn base_config() -> AppConfig {
        AppConfig {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::with_base_url(
                "https://upstream.example",
                "https://assets.example",
            ),
            assets: AssetsConfig::default(),
            credentials: CredentialsConfig::default(),
            models: vec![ModelConfig {
                id: "imagine".to_string(),
                upstream_model: "imagine-1".to_string(),
                upstream_mode: "MODEL_MODE_AUTO".to_string(),
                modality: Modality::Image,
                aspect_ratio: Some("1:1".to_string()),
            }],
            client_authentication: ClientAuthConfig {
                keys: vec![ClientKey {
                    id: "team-a".to_string(),
                    key: "sk-a".to_string(),
                }],
            },
            features: FeaturesConfig::default(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn test_bad_base_url_rejected() {
        let mut config = base_config();
        config.upstream.base_url = "upstream.example".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_unknown_aspect_ratio_rejected() {
        let mut config = base_config();
        config.models[0].aspect_ratio = Some("4:1".to_string());
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("aspect_ratio"));
    }

    #[test]
    fn test_duplicate_key_id_rejected() {
        let mut config = base_config();
        config.client_authentication.keys.push(ClientKey {
            id: "team-a".to_string(),
            key: "sk-b".to_string(),
        });
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_log_format_checked() {
        let mut config = base_config();
        config.features.log_format = "xml".to_string();
        assert!(validate_config(&config).is_err());
    }
}

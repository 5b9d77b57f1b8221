use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and a config summary without secrets.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "genrelay-rs is running",
        "config": {
            "credentials_count": state.credentials.len(),
            "models_count": config.models.len(),
            "client_keys_count": state.client_key_count(),
            "public_assets": config.assets.public_base_url.is_some(),
            "features": {
                "log_level": config.features.log_level,
                "enable_nsfw": config.features.enable_nsfw,
                "max_images_per_request": config.features.max_images_per_request,
            }
        }
    }))
}

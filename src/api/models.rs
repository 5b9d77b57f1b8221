use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};

use crate::error::into_axum_response;
use crate::protocol::IngressApi;
use crate::routing::ModelResolver;
use crate::state::AppState;

const MODEL_CREATED: u64 = 1_700_000_000;

/// List configured public models in `OpenAI` format.
///
/// Accepts either a bearer token or an `x-api-key` header.
pub async fn handler(State(state): State<Arc<AppState>>, headers: &HeaderMap) -> Response {
    if let Err(err) = state
        .authenticate(IngressApi::OpenAiMedia, headers)
        .or_else(|_| state.authenticate(IngressApi::Anthropic, headers))
    {
        return into_axum_response(&err, IngressApi::OpenAiMedia);
    }
    Json(models_body(state.models.as_ref())).into_response()
}

fn models_body(models: &dyn ModelResolver) -> Value {
    let data: Vec<Value> = models
        .list()
        .iter()
        .map(|model| {
            json!({
                "id": model.public_id.as_ref(),
                "object": "model",
                "created": MODEL_CREATED,
                "owned_by": "genrelay",
                "modality": model.modality,
            })
        })
        .collect();
    json!({ "object": "list", "data": data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Modality, ModelConfig};
    use crate::routing::StaticModelResolver;

    fn model(id: &str, modality: Modality) -> ModelConfig {
        ModelConfig {
            id: id.into(),
            upstream_model: format!("{id}-upstream"),
            upstream_mode: "MODEL_MODE_AUTO".into(),
            modality,
            aspect_ratio: None,
        }
    }

    #[test]
    fn test_models_body_keeps_config_order() {
        let resolver = StaticModelResolver::from_models(&[
            model("chat", Modality::Text),
            model("imagine", Modality::Image),
            model("motion", Modality::Video),
        ]);
        let body = models_body(&resolver);
        assert_eq!(body["object"], "list");
        let ids: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, ["chat", "imagine", "motion"]);
        assert_eq!(body["data"][2]["modality"], "video");
        assert_eq!(body["data"][0]["owned_by"], "genrelay");
    }
}

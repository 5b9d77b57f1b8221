pub mod dispatch;

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::config::{AppConfig, Modality, ModelConfig};
use crate::error::GatewayError;

/// Upstream settings for one public model id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub public_id: Arc<str>,
    pub upstream_model: Arc<str>,
    pub upstream_mode: Arc<str>,
    pub modality: Modality,
    pub aspect_ratio: Option<Arc<str>>,
}

/// Maps public model ids to upstream configuration.
pub trait ModelResolver: Send + Sync {
    /// Resolve a public model id.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ModelNotFound`] for unknown ids.
    fn resolve(&self, public_id: &str) -> Result<ResolvedModel, GatewayError>;

    /// All models in configuration order.
    fn list(&self) -> Vec<ResolvedModel>;
}

/// Resolver over the static `models` table from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticModelResolver {
    models: Vec<ResolvedModel>,
    index: FxHashMap<Arc<str>, usize>,
}

impl StaticModelResolver {
    #[must_use]
    pub fn new(config: &AppConfig) -> Self {
        Self::from_models(&config.models)
    }

    #[must_use]
    pub fn from_models(entries: &[ModelConfig]) -> Self {
        let mut models = Vec::with_capacity(entries.len());
        let mut index = FxHashMap::default();
        for entry in entries {
            let resolved = ResolvedModel {
                public_id: Arc::from(entry.id.as_str()),
                upstream_model: Arc::from(entry.upstream_model.as_str()),
                upstream_mode: Arc::from(entry.upstream_mode.as_str()),
                modality: entry.modality,
                aspect_ratio: entry.aspect_ratio.as_deref().map(Arc::from),
            };
            if index.contains_key(&resolved.public_id) {
                continue;
            }
            index.insert(Arc::clone(&resolved.public_id), models.len());
            models.push(resolved);
        }
        Self { models, index }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl ModelResolver for StaticModelResolver {
    fn resolve(&self, public_id: &str) -> Result<ResolvedModel, GatewayError> {
        self.index
            .get(public_id)
            .and_then(|&idx| self.models.get(idx))
            .cloned()
            .ok_or_else(|| GatewayError::ModelNotFound(public_id.to_string()))
    }

    fn list(&self) -> Vec<ResolvedModel> {
        self.models.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: &str, modality: Modality) -> ModelConfig {
        ModelConfig {
            id: id.to_string(),
            upstream_model: format!("{id}-upstream"),
            upstream_mode: "MODEL_MODE_AUTO".to_string(),
            modality,
            aspect_ratio: None,
        }
    }

    #[test]
    fn test_resolve_known_and_unknown() {
        let resolver = StaticModelResolver::from_models(&[
            model("chat", Modality::Text),
            model("imagine", Modality::Image),
        ]);
        let resolved = resolver.resolve("imagine").unwrap();
        assert_eq!(&*resolved.upstream_model, "imagine-upstream");
        assert_eq!(resolved.modality, Modality::Image);
        assert!(matches!(
            resolver.resolve("nope"),
            Err(GatewayError::ModelNotFound(_))
        ));
    }

    #[test]
    fn test_list_keeps_config_order_and_first_duplicate() {
        let mut dup = model("chat", Modality::Video);
        dup.upstream_model = "other".to_string();
        let resolver = StaticModelResolver::from_models(&[
            model("chat", Modality::Text),
            model("video", Modality::Video),
            dup,
        ]);
        let ids: Vec<_> = resolver.list().iter().map(|m| m.public_id.to_string()).collect();
        assert_eq!(ids, ["chat", "video"]);
        assert_eq!(resolver.resolve("chat").unwrap().modality, Modality::Text);
    }
}

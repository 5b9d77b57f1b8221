use std::sync::Arc;

use crate::config::ClientKey;
use crate::error::GatewayError;
use crate::protocol::IngressApi;
use http::header::{HeaderName, AUTHORIZATION};
use rustc_hash::FxHashMap;

const X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");

/// Index from client secret to the configured key id.
#[derive(Debug, Default)]
pub struct ClientKeys {
    by_secret: FxHashMap<Box<str>, Arc<str>>,
}

impl ClientKeys {
    #[must_use]
    pub fn new(keys: &[ClientKey]) -> Self {
        let mut by_secret = FxHashMap::default();
        for key in keys {
            by_secret
                .entry(key.key.clone().into_boxed_str())
                .or_insert_with(|| Arc::from(key.id.as_str()));
        }
        Self { by_secret }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_secret.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_secret.is_empty()
    }

    /// Key ids in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.by_secret.values().map(AsRef::as_ref)
    }

    fn lookup(&self, secret: &str) -> Option<Arc<str>> {
        self.by_secret.get(secret).cloned()
    }
}

fn bearer(headers: &http::HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
}

/// Extract the API key from request headers, based on the ingress API convention.
///
/// - `OpenAiMedia`: `Authorization: Bearer <key>`
/// - `Anthropic`: `x-api-key: <key>` first, then fall back to `Authorization: Bearer <key>`
///
/// # Errors
///
/// Returns `GatewayError::Auth` when no expected API key header is present.
pub fn extract_api_key(
    ingress: IngressApi,
    headers: &http::HeaderMap,
) -> Result<&str, GatewayError> {
    let key = match ingress {
        IngressApi::Anthropic => headers
            .get(X_API_KEY)
            .and_then(|v| v.to_str().ok())
            .or_else(|| bearer(headers)),
        IngressApi::OpenAiMedia => bearer(headers),
    };

    key.map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| GatewayError::Auth("Missing API key".to_string()))
}

/// Authenticate an incoming request and return the id of the matching client key.
///
/// # Errors
///
/// Returns `GatewayError::Auth` when the API key is missing or unknown.
pub fn authenticate(
    ingress: IngressApi,
    headers: &http::HeaderMap,
    keys: &ClientKeys,
) -> Result<Arc<str>, GatewayError> {
    let secret = extract_api_key(ingress, headers)?;
    keys.lookup(secret)
        .ok_or_else(|| GatewayError::Auth("Invalid API key".to_string()))
}

mod request_id;

use std::sync::Arc;

use crate::auth::{authenticate, ClientKeys};
use crate::config::AppConfig;
use crate::error::GatewayError;
use crate::pool::usage::{MemoryUsageRecorder, UsageRecorder};
use crate::pool::{CredentialStore, MemoryCredentialStore};
use crate::protocol::IngressApi;
use crate::relay::RelayContext;
use crate::routing::{ModelResolver, StaticModelResolver};
use crate::stream::MediaExtractor;
use crate::transport::UpstreamClient;

use request_id::RequestIdGenerator;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub upstream: Arc<UpstreamClient>,
    pub credentials: Arc<dyn CredentialStore>,
    pub models: Arc<dyn ModelResolver>,
    pub usage: Arc<dyn UsageRecorder>,
    pub media: Arc<MediaExtractor>,
    client_keys: ClientKeys,
    request_ids: RequestIdGenerator,
}

impl AppState {
    /// Build state with the in-memory stores fed from `config`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` when the credential import fails or the
    /// upstream HTTP client cannot be built.
    pub fn from_config(config: AppConfig) -> Result<Self, GatewayError> {
        let credentials = MemoryCredentialStore::from_config(&config.credentials)
            .map_err(|err| GatewayError::Config(err.to_string()))?;
        Self::with_credentials(config, Arc::new(credentials))
    }

    /// Build state around an existing credential store.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` when the upstream HTTP client cannot be built.
    pub fn with_credentials(
        config: AppConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, GatewayError> {
        let upstream = Arc::new(UpstreamClient::new(&config.upstream)?);
        let media = Arc::new(MediaExtractor::new(
            &config.upstream.asset_host,
            config.assets.public_base_url.as_deref(),
        ));
        let client_keys = ClientKeys::new(&config.client_authentication.keys);
        let usage = Arc::new(MemoryUsageRecorder::with_keys(client_keys.ids()));
        let models = Arc::new(StaticModelResolver::new(&config));

        tracing::info!(
            credentials = credentials.len(),
            models = models.len(),
            client_keys = client_keys.len(),
            "gateway state ready"
        );

        Ok(Self {
            config,
            upstream,
            credentials,
            models,
            usage,
            media,
            client_keys,
            request_ids: RequestIdGenerator::new(),
        })
    }

    /// Authenticate an ingress request, returning the client key id.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Auth` when the API key is missing or invalid.
    pub fn authenticate(
        &self,
        ingress: IngressApi,
        headers: &http::HeaderMap,
    ) -> Result<Arc<str>, GatewayError> {
        authenticate(ingress, headers, &self.client_keys)
    }

    #[must_use]
    pub fn client_key_count(&self) -> usize {
        self.client_keys.len()
    }

    #[must_use]
    pub fn next_id(&self, prefix: &str) -> String {
        self.request_ids.next_id(prefix)
    }

    /// Collaborators for one relayed call charged to `key_id`.
    #[must_use]
    pub fn relay_context(&self, key_id: Arc<str>) -> RelayContext {
        RelayContext {
            credentials: Arc::clone(&self.credentials),
            upstream: Arc::clone(&self.upstream),
            media: Arc::clone(&self.media),
            usage: Arc::clone(&self.usage),
            key_id,
        }
    }
}

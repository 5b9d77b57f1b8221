use std::time::Duration;

use crate::config::UpstreamConfig;
use crate::error::GatewayError;

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    connect_timeout: Duration,
    timeout: Duration,
    use_env_proxy: bool,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, GatewayError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(connect_timeout)
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout);

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| GatewayError::Config(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| GatewayError::Config(format!("Failed to build HTTP client: {err}")))
}

/// Pooled HTTP client for upstream calls.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport with connection pooling, proxy and timeouts from the upstream config.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when the proxy URL is invalid or the client
    /// cannot be built.
    pub fn new(config: &UpstreamConfig) -> Result<Self, GatewayError> {
        let pool_idle_timeout = if config.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(config.http_pool_idle_timeout_secs))
        };
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = build_reqwest_client(
            config.http_pool_max_idle_per_host.max(1),
            pool_idle_timeout,
            Duration::from_secs(config.connect_timeout_secs.max(1)),
            timeout,
            config.use_env_proxy,
            config.proxy.as_deref(),
        )?;
        Ok(Self { client, timeout })
    }

    #[must_use]
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Per-call timeout; covers the whole response, body included.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_proxy_is_config_error() {
        let mut config = UpstreamConfig::with_base_url("http://u.example", "http://a.example");
        config.proxy = Some("::not a url::".to_string());
        assert!(matches!(
            HttpTransport::new(&config),
            Err(GatewayError::Config(_))
        ));
    }

    #[test]
    fn test_timeout_from_config() {
        let mut config = UpstreamConfig::with_base_url("http://u.example", "http://a.example");
        config.timeout_secs = 42;
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(transport.timeout(), Duration::from_secs(42));
    }
}

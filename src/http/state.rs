//! Shared handler state.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::auth::{AdminAuthenticator, BearerTokenAuthenticator};
use crate::cache::ResponseCache;
use crate::config::ReelgateConfig;
use crate::error::{ReelgateError, Result};
use crate::gateway::Gateway;
use crate::ratelimit::{ConfigStore, CounterBackend, RateLimitEnforcer, WindowCounter};
use crate::upstream::{ReqwestTransport, UpstreamProxyClient, UpstreamTransport};

/// How the caller's identity is read from a request.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub country_header: String,
    pub trust_forwarded_for: bool,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            country_header: "cf-ipcountry".to_string(),
            trust_forwarded_for: false,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub config: Arc<ConfigStore>,
    pub counters: Arc<dyn CounterBackend>,
    pub cache: Arc<ResponseCache>,
    pub auth: Arc<dyn AdminAuthenticator>,
    pub identity: Arc<ClientIdentity>,
    pub request_deadline: Duration,
}

impl AppState {
    /// Assemble the service from its settings, reaching the upstream over HTTP.
    pub fn from_config(config: &ReelgateConfig, shutdown: CancellationToken) -> Result<Self> {
        let transport = ReqwestTransport::new(&config.upstream.base_url, config.upstream.api_key.clone())
            .map_err(|e| ReelgateError::Config(format!("failed to build upstream client: {}", e)))?;
        Ok(Self::with_transport(config, Arc::new(transport), shutdown))
    }

    /// Assemble the service around an arbitrary upstream transport.
    pub fn with_transport(
        config: &ReelgateConfig,
        transport: Arc<dyn UpstreamTransport>,
        shutdown: CancellationToken,
    ) -> Self {
        let store = Arc::new(ConfigStore::new());
        let counters: Arc<dyn CounterBackend> = Arc::new(WindowCounter::new());
        let cache = Arc::new(ResponseCache::new(config.cache.max_entries));

        let enforcer = RateLimitEnforcer::new(store.clone(), counters.clone())
            .with_bypass_country(config.limiter.bypass_country.clone());
        let upstream = UpstreamProxyClient::new(transport, store.clone(), &config.upstream)
            .with_shutdown(shutdown);
        let gateway = Gateway::new(
            enforcer,
            cache.clone(),
            upstream,
            config.cache.ttl(),
        );

        Self {
            gateway: Arc::new(gateway),
            config: store,
            counters,
            cache,
            auth: Arc::new(BearerTokenAuthenticator::new(config.admin.token.clone())),
            identity: Arc::new(ClientIdentity {
                country_header: config.limiter.country_header.clone(),
                trust_forwarded_for: config.limiter.trust_forwarded_for,
            }),
            request_deadline: config.server.request_deadline(),
        }
    }
}

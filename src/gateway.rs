//! The protected request path: admission, cache, then upstream.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::cache::{cache_key, ResponseCache};
use crate::ratelimit::{Decision, RateLimitEnforcer};
use crate::upstream::{Payload, UpstreamError, UpstreamProxyClient};

/// A payload and whether it was served from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
    pub payload: Payload,
    pub cache_hit: bool,
}

/// Wires the enforcer, the response cache, and the upstream client together.
pub struct Gateway {
    enforcer: RateLimitEnforcer,
    cache: Arc<ResponseCache>,
    upstream: UpstreamProxyClient,
    cache_ttl: Duration,
}

/// Canonical form of a proxied endpoint path.
///
/// Empty segments are collapsed and surrounding slashes dropped. Dot
/// segments and characters that would change the meaning of the upstream URL
/// are rejected, so the endpoint can never escape the upstream base path.
pub fn normalize_endpoint(endpoint: &str) -> Result<String, UpstreamError> {
    let invalid = || UpstreamError::InvalidEndpoint(endpoint.to_string());
    if endpoint.contains(['?', '#', '\\']) {
        return Err(invalid());
    }

    let segments: Vec<&str> = endpoint.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() || segments.iter().any(|s| *s == "." || *s == "..") {
        return Err(invalid());
    }
    Ok(segments.join("/"))
}

impl Gateway {
    pub fn new(
        enforcer: RateLimitEnforcer,
        cache: Arc<ResponseCache>,
        upstream: UpstreamProxyClient,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            enforcer,
            cache,
            upstream,
            cache_ttl,
        }
    }

    /// Admission decision for a caller.
    pub fn admit(&self, ip: &str, country: &str) -> Decision {
        self.enforcer.check(ip, country)
    }

    /// Serve `endpoint` from the cache, falling back to the upstream client.
    ///
    /// Cache hits never touch the outbound throttle.
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn fetch(
        &self,
        endpoint: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Served, UpstreamError> {
        let endpoint = normalize_endpoint(endpoint)?;
        let key = cache_key(&endpoint, params);
        if let Some(payload) = self.cache.get(&key) {
            debug!(key = %key, "Cache hit");
            return Ok(Served {
                payload,
                cache_hit: true,
            });
        }

        debug!(key = %key, "Cache miss");
        let payload = self.upstream.fetch(&endpoint, params).await?;
        self.cache.set(&key, payload.clone(), self.cache_ttl);

        Ok(Served {
            payload,
            cache_hit: false,
        })
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }
}

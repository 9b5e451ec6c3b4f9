//! Wire access to the upstream provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::trace;

use super::error::UpstreamError;
use super::Payload;

/// Trait for issuing a single upstream call.
///
/// Implementations perform exactly one attempt; timeouts, throttling, and
/// retries are layered on top by the
/// [`UpstreamProxyClient`](super::UpstreamProxyClient).
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    /// Call `endpoint` with `params`. Non-2xx responses are reported as
    /// [`UpstreamError::Status`].
    async fn send(
        &self,
        endpoint: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Payload, UpstreamError>;
}

/// HTTP transport backed by `reqwest`.
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ReqwestTransport {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("reelgate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

#[async_trait]
impl UpstreamTransport for ReqwestTransport {
    async fn send(
        &self,
        endpoint: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Payload, UpstreamError> {
        let url = self.url(endpoint);
        trace!(url = %url, "Calling upstream");

        // Callers never get to choose the credential.
        let query: Vec<(&String, &String)> =
            params.iter().filter(|(name, _)| *name != "api_key").collect();
        let mut request = self.client.get(&url).query(&query);
        if let Some(api_key) = &self.api_key {
            request = request.query(&[("api_key", api_key)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                retry_after,
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;

        Ok(Payload {
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}

/// Parse a `Retry-After` value given either as seconds or as an HTTP date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    let wait = at.signed_duration_since(Utc::now());
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

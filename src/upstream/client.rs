//! Throttled, bounded, retrying upstream client.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use super::error::UpstreamError;
use super::throttle::Throttle;
use super::transport::UpstreamTransport;
use super::Payload;
use crate::config::UpstreamConfig;
use crate::ratelimit::ConfigStore;

/// Exponential backoff schedule for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Ceiling for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`: `base_delay * 2^attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay after `err`, honouring a longer provider-requested wait.
    fn delay_after(&self, attempt: u32, err: &UpstreamError) -> Duration {
        let backoff = self.backoff(attempt);
        match err {
            UpstreamError::Status {
                retry_after: Some(requested),
                ..
            } => backoff.max(*requested).min(self.max_delay),
            _ => backoff,
        }
    }
}

impl From<&UpstreamConfig> for RetryPolicy {
    fn from(config: &UpstreamConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// Client for the upstream metadata provider.
///
/// Every attempt holds a concurrency permit, waits for an outbound throttle
/// slot when the `upstream` tier is enabled, and races the call against a
/// timeout. Transient failures are retried with exponential backoff; the
/// permit is not held while backing off. Cancellation stops both the
/// in-flight attempt and any further retries.
pub struct UpstreamProxyClient {
    transport: Arc<dyn UpstreamTransport>,
    config: Arc<ConfigStore>,
    throttle: Throttle,
    permits: Semaphore,
    timeout: Duration,
    retry: RetryPolicy,
    shutdown: CancellationToken,
}

impl UpstreamProxyClient {
    pub fn new(
        transport: Arc<dyn UpstreamTransport>,
        config: Arc<ConfigStore>,
        settings: &UpstreamConfig,
    ) -> Self {
        Self {
            transport,
            config,
            throttle: Throttle::new(),
            permits: Semaphore::new(settings.max_concurrency.max(1)),
            timeout: settings.timeout(),
            retry: RetryPolicy::from(settings),
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancel in-flight and future fetches when `shutdown` is cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Fetch `endpoint` with `params`, retrying transient failures.
    pub async fn fetch(
        &self,
        endpoint: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Payload, UpstreamError> {
        self.fetch_with_cancel(endpoint, params, &self.shutdown).await
    }

    /// Like [`fetch`](Self::fetch), but also gives up once `cancel` fires.
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn fetch_with_cancel(
        &self,
        endpoint: &str,
        params: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<Payload, UpstreamError> {
        let mut attempt = 0;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UpstreamError::Cancelled),
                _ = self.shutdown.cancelled() => return Err(UpstreamError::Cancelled),
                result = self.attempt(endpoint, params) => result,
            };

            let err = match result {
                Ok(payload) => {
                    debug!(attempt, status = payload.status, "Upstream call succeeded");
                    return Ok(payload);
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                debug!(error = %err, "Upstream call failed permanently");
                return Err(err);
            }
            if attempt >= self.retry.max_retries {
                error!(attempts = attempt + 1, error = %err, "Upstream retries exhausted");
                return Err(err);
            }

            let delay = self.retry.delay_after(attempt, &err);
            warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Upstream call failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UpstreamError::Cancelled),
                _ = self.shutdown.cancelled() => return Err(UpstreamError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn attempt(
        &self,
        endpoint: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Payload, UpstreamError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| UpstreamError::Cancelled)?;

        let tier = self.config.get().upstream;
        if tier.enabled {
            self.throttle.acquire(tier.spacing()).await;
        }

        match tokio::time::timeout(self.timeout, self.transport.send(endpoint, params)).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout(self.timeout)),
        }
    }
}

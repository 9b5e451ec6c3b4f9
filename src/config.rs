//! Configuration management for Reelgate.
//!
//! These are the static service settings, loaded once at startup from
//! defaults, an optional YAML file, and `REELGATE__*` environment variables.
//! The runtime-mutable rate limit tiers live in
//! [`ConfigStore`](crate::ratelimit::ConfigStore) instead.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{ReelgateError, Result};

/// Environment variable prefix, e.g. `REELGATE__UPSTREAM__API_KEY`.
pub const ENV_PREFIX: &str = "REELGATE";

/// Main configuration for the Reelgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReelgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream provider configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Response cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Admission limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Admin API configuration
    #[serde(default)]
    pub admin: AdminConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Deadline for a proxied request, after which the caller gives up
    #[serde(default = "default_request_deadline_ms")]
    pub request_deadline_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            request_deadline_ms: default_request_deadline_ms(),
        }
    }
}

impl ServerConfig {
    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_request_deadline_ms() -> u64 {
    45_000
}

/// Upstream metadata provider configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Appended as the `api_key` query parameter
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Upstream calls allowed in flight at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

// Keeps the API key out of logs.
impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_ms", &self.timeout_ms)
            .field("max_retries", &self.max_retries)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("max_concurrency", &self.max_concurrency)
            .finish()
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_base_url() -> String {
    "https://api.themoviedb.org/3".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_concurrency() -> usize {
    4
}

/// Response cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,

    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,

    /// How often expired entries are purged in the background
    #[serde(default = "default_cache_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_cache_ttl_ms(),
            max_entries: default_cache_max_entries(),
            purge_interval_secs: default_cache_purge_interval_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs.max(1))
    }
}

fn default_cache_ttl_ms() -> u64 {
    60_000
}

fn default_cache_max_entries() -> usize {
    10_000
}

fn default_cache_purge_interval_secs() -> u64 {
    30
}

/// Admission limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Country exempt from the country tier
    #[serde(default)]
    pub bypass_country: Option<String>,

    /// Header carrying the caller's resolved country code
    #[serde(default = "default_country_header")]
    pub country_header: String,

    /// Take the client IP from `X-Forwarded-For` when present
    #[serde(default)]
    pub trust_forwarded_for: bool,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Tracked counter keys above which the sweeper warns
    #[serde(default = "default_max_tracked_keys")]
    pub max_tracked_keys: usize,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            bypass_country: None,
            country_header: default_country_header(),
            trust_forwarded_for: false,
            sweep_interval_secs: default_sweep_interval_secs(),
            max_tracked_keys: default_max_tracked_keys(),
        }
    }
}

impl LimiterConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

fn default_country_header() -> String {
    "cf-ipcountry".to_string()
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_max_tracked_keys() -> usize {
    100_000
}

/// Admin API configuration.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Bearer token accepted by the admin API; unset locks the API
    #[serde(default)]
    pub token: Option<String>,
}

impl std::fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ReelgateConfig {
    /// Load configuration from an optional YAML file layered under the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: ReelgateConfig = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Render the effective configuration as YAML, secrets omitted.
    pub fn to_redacted_yaml(&self) -> Result<String> {
        let mut redacted = self.clone();
        redacted.upstream.api_key = redacted.upstream.api_key.map(|_| "<redacted>".into());
        redacted.admin.token = redacted.admin.token.map(|_| "<redacted>".into());
        serde_yaml::to_string(&redacted).map_err(|e| ReelgateError::Config(e.to_string()))
    }

    fn validate(&self) -> Result<()> {
        if self.upstream.max_concurrency == 0 {
            return Err(ReelgateError::Config(
                "upstream.max_concurrency must be at least 1".into(),
            ));
        }
        if self.upstream.timeout_ms == 0 {
            return Err(ReelgateError::Config(
                "upstream.timeout_ms must be positive".into(),
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(ReelgateError::Config(
                "cache.max_entries must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ReelgateConfig::default();
        assert_eq!(config.server.listen_addr.port(), 8080);
        assert_eq!(config.upstream.timeout(), Duration::from_secs(30));
        assert_eq!(config.upstream.max_retries, 3);
        assert_eq!(config.upstream.base_delay_ms, 1_000);
        assert_eq!(config.limiter.country_header, "cf-ipcountry");
        assert!(config.limiter.bypass_country.is_none());
        assert!(config.admin.token.is_none());
        assert_eq!(config.cache.purge_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_load_yaml_file_with_partial_sections() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "upstream:\n  max_retries: 5\nlimiter:\n  bypass_country: US\ncache:\n  ttl_ms: 5000"
        )
        .unwrap();

        let config = ReelgateConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.upstream.max_retries, 5);
        assert_eq!(config.upstream.timeout_ms, 30_000);
        assert_eq!(config.limiter.bypass_country.as_deref(), Some("US"));
        assert_eq!(config.cache.ttl(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_rejects_zero_concurrency() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "upstream:\n  max_concurrency: 0").unwrap();

        let result = ReelgateConfig::load(Some(file.path()));
        assert!(matches!(result, Err(ReelgateError::Config(_))));
    }

    #[test]
    fn test_debug_and_yaml_redact_secrets() {
        let mut config = ReelgateConfig::default();
        config.upstream.api_key = Some("tmdb-secret".into());
        config.admin.token = Some("admin-secret".into());

        let debug = format!("{:?}", config);
        assert!(!debug.contains("tmdb-secret"));
        assert!(!debug.contains("admin-secret"));

        let yaml = config.to_redacted_yaml().unwrap();
        assert!(!yaml.contains("tmdb-secret"));
        assert!(!yaml.contains("admin-secret"));
        assert!(yaml.contains("<redacted>"));
    }
}

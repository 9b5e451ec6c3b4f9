//! Tiered rate limit configuration, partial updates, and bound validation.
//!
//! The configuration is a fixed schema of four tiers. Administrators submit
//! partial documents that are merged over the current configuration and
//! validated as a whole before anything is committed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::ValidationError;

pub const MIN_WINDOW_MS: u64 = 1_000;
pub const MAX_WINDOW_MS: u64 = 3_600_000;
pub const MIN_MAX_REQUESTS: u64 = 1;
pub const MAX_MAX_REQUESTS: u64 = 100_000;
/// The IP tier is capped lower than the aggregate tiers.
pub const MAX_IP_MAX_REQUESTS: u64 = 10_000;
pub const MIN_UPSTREAM_DELAY_MS: u64 = 100;
pub const MAX_UPSTREAM_DELAY_MS: u64 = 5_000;
pub const MIN_UPSTREAM_RPS: u64 = 1;
pub const MAX_UPSTREAM_RPS: u64 = 10;

/// An independent rate limit dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Ip,
    Country,
    Global,
    Upstream,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Ip => "ip",
            Tier::Country => "country",
            Tier::Global => "global",
            Tier::Upstream => "upstream",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-window limit applied to inbound requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WindowTier {
    pub window_ms: u64,
    pub max_requests: u64,
    pub enabled: bool,
}

impl WindowTier {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Outbound throttle protecting the upstream provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpstreamTier {
    pub min_delay_ms: u64,
    pub max_requests_per_second: u64,
    pub enabled: bool,
}

impl UpstreamTier {
    /// Minimum spacing between outbound request starts.
    ///
    /// Satisfies both `minDelayMs` and `maxRequestsPerSecond`.
    pub fn spacing(&self) -> Duration {
        let per_request_ms = 1_000 / self.max_requests_per_second.max(1);
        Duration::from_millis(self.min_delay_ms.max(per_request_ms))
    }
}

/// The complete, process-wide rate limit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    pub ip: WindowTier,
    pub country: WindowTier,
    pub upstream: UpstreamTier,
    pub global: WindowTier,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            ip: WindowTier {
                window_ms: 900_000,
                max_requests: 100,
                enabled: true,
            },
            country: WindowTier {
                window_ms: 900_000,
                max_requests: 5_000,
                enabled: true,
            },
            upstream: UpstreamTier {
                min_delay_ms: 250,
                max_requests_per_second: 4,
                enabled: true,
            },
            global: WindowTier {
                window_ms: 60_000,
                max_requests: 10_000,
                enabled: true,
            },
        }
    }
}

/// Partial update for a windowed tier. Absent fields keep their current value.
///
/// Numbers are signed so that negative input is reported as a bound
/// violation rather than a parse failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WindowTierPatch {
    pub window_ms: Option<i64>,
    pub max_requests: Option<i64>,
    pub enabled: Option<bool>,
}

/// Partial update for the upstream tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpstreamTierPatch {
    pub min_delay_ms: Option<i64>,
    pub max_requests_per_second: Option<i64>,
    pub enabled: Option<bool>,
}

/// Partial configuration document accepted by the admin API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfigPatch {
    pub ip: Option<WindowTierPatch>,
    pub country: Option<WindowTierPatch>,
    pub upstream: Option<UpstreamTierPatch>,
    pub global: Option<WindowTierPatch>,
}

impl RateLimitConfigPatch {
    /// Parse a patch from a JSON body, rejecting unknown fields.
    pub fn from_json(body: &[u8]) -> Result<Self, ValidationError> {
        serde_json::from_slice(body)
            .map_err(|e| ValidationError::single(format!("malformed configuration: {}", e)))
    }
}

/// Collects bound violations while merging a patch.
struct Violations(Vec<String>);

impl Violations {
    fn check(&mut self, field: &str, value: i64, min: u64, max: u64) -> u64 {
        if value < min as i64 || value > max as i64 {
            self.0.push(format!(
                "{} must be between {} and {} (got {})",
                field, min, max, value
            ));
        }
        value.max(0) as u64
    }

    fn check_current(&mut self, field: &str, value: u64, min: u64, max: u64) {
        if value < min || value > max {
            self.0.push(format!(
                "{} must be between {} and {} (got {})",
                field, min, max, value
            ));
        }
    }
}

impl RateLimitConfig {
    /// Deep-merge `patch` over this configuration and validate the result.
    ///
    /// Returns the merged configuration, or every violation found. `self` is
    /// never modified.
    pub fn merged(&self, patch: &RateLimitConfigPatch) -> Result<Self, ValidationError> {
        let mut violations = Violations(Vec::new());
        let mut next = *self;

        if let Some(p) = &patch.ip {
            merge_window(&mut next.ip, p, Tier::Ip, MAX_IP_MAX_REQUESTS, &mut violations);
        }
        if let Some(p) = &patch.country {
            merge_window(&mut next.country, p, Tier::Country, MAX_MAX_REQUESTS, &mut violations);
        }
        if let Some(p) = &patch.global {
            merge_window(&mut next.global, p, Tier::Global, MAX_MAX_REQUESTS, &mut violations);
        }
        if let Some(p) = &patch.upstream {
            if let Some(v) = p.min_delay_ms {
                next.upstream.min_delay_ms = violations.check(
                    "upstream.minDelayMs",
                    v,
                    MIN_UPSTREAM_DELAY_MS,
                    MAX_UPSTREAM_DELAY_MS,
                );
            }
            if let Some(v) = p.max_requests_per_second {
                next.upstream.max_requests_per_second = violations.check(
                    "upstream.maxRequestsPerSecond",
                    v,
                    MIN_UPSTREAM_RPS,
                    MAX_UPSTREAM_RPS,
                );
            }
            if let Some(enabled) = p.enabled {
                next.upstream.enabled = enabled;
            }
        }

        if !violations.0.is_empty() {
            return Err(ValidationError::new(violations.0));
        }
        next.validate()?;
        Ok(next)
    }

    /// Check every bound on a complete configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut violations = Violations(Vec::new());
        for (tier, cfg, max) in [
            (Tier::Ip, &self.ip, MAX_IP_MAX_REQUESTS),
            (Tier::Country, &self.country, MAX_MAX_REQUESTS),
            (Tier::Global, &self.global, MAX_MAX_REQUESTS),
        ] {
            violations.check_current(
                &format!("{}.windowMs", tier),
                cfg.window_ms,
                MIN_WINDOW_MS,
                MAX_WINDOW_MS,
            );
            violations.check_current(
                &format!("{}.maxRequests", tier),
                cfg.max_requests,
                MIN_MAX_REQUESTS,
                max,
            );
        }
        violations.check_current(
            "upstream.minDelayMs",
            self.upstream.min_delay_ms,
            MIN_UPSTREAM_DELAY_MS,
            MAX_UPSTREAM_DELAY_MS,
        );
        violations.check_current(
            "upstream.maxRequestsPerSecond",
            self.upstream.max_requests_per_second,
            MIN_UPSTREAM_RPS,
            MAX_UPSTREAM_RPS,
        );

        if violations.0.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(violations.0))
        }
    }

    /// The windowed tier settings for `tier`, if it is a windowed tier.
    pub fn window_tier(&self, tier: Tier) -> Option<&WindowTier> {
        match tier {
            Tier::Ip => Some(&self.ip),
            Tier::Country => Some(&self.country),
            Tier::Global => Some(&self.global),
            Tier::Upstream => None,
        }
    }
}

fn merge_window(
    target: &mut WindowTier,
    patch: &WindowTierPatch,
    tier: Tier,
    max_requests: u64,
    violations: &mut Violations,
) {
    if let Some(v) = patch.window_ms {
        target.window_ms = violations.check(
            &format!("{}.windowMs", tier),
            v,
            MIN_WINDOW_MS,
            MAX_WINDOW_MS,
        );
    }
    if let Some(v) = patch.max_requests {
        target.max_requests = violations.check(
            &format!("{}.maxRequests", tier),
            v,
            MIN_MAX_REQUESTS,
            max_requests,
        );
    }
    if let Some(enabled) = patch.enabled {
        target.enabled = enabled;
    }
}

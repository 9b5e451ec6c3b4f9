//! Tiered admission decisions for inbound requests.

use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::backend::CounterBackend;
use super::descriptor::{CounterKey, GLOBAL_KEY};
use super::rules::Tier;
use super::store::ConfigStore;

/// Country subject used when the caller's country could not be resolved.
pub const UNKNOWN_COUNTRY: &str = "unknown";

/// Which tier produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DenyReason {
    Ip,
    Country,
    Global,
    None,
}

impl From<Tier> for DenyReason {
    fn from(tier: Tier) -> Self {
        match tier {
            Tier::Ip => DenyReason::Ip,
            Tier::Country => DenyReason::Country,
            Tier::Global => DenyReason::Global,
            Tier::Upstream => DenyReason::None,
        }
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub allow: bool,
    /// Milliseconds until the denying tier's window resets; zero when allowed
    pub retry_after_ms: u64,
    pub reason: DenyReason,
}

impl Decision {
    pub fn allowed() -> Self {
        Self {
            allow: true,
            retry_after_ms: 0,
            reason: DenyReason::None,
        }
    }

    pub fn denied(tier: Tier, retry_after_ms: u64) -> Self {
        Self {
            allow: false,
            retry_after_ms,
            reason: tier.into(),
        }
    }
}

/// Evaluates the global, country, and IP tiers for each inbound request.
///
/// Tiers are consulted in that fixed order and evaluation stops at the first
/// denial, so a request denied by the global tier never counts against the
/// country or IP tiers. Configuration is read from the [`ConfigStore`] on
/// every call, so administrator changes take effect immediately.
pub struct RateLimitEnforcer {
    config: Arc<ConfigStore>,
    counters: Arc<dyn CounterBackend>,
    /// Country exempt from the country tier (IP and global still apply)
    bypass_country: Option<String>,
}

impl RateLimitEnforcer {
    pub fn new(config: Arc<ConfigStore>, counters: Arc<dyn CounterBackend>) -> Self {
        Self {
            config,
            counters,
            bypass_country: None,
        }
    }

    /// Exempt `country` from the country tier.
    pub fn with_bypass_country(mut self, country: Option<String>) -> Self {
        self.bypass_country = country
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty());
        self
    }

    /// Decide whether a request from `ip` in `country` may proceed.
    pub fn check(&self, ip: &str, country: &str) -> Decision {
        let config = self.config.get();
        let country = normalize_country(country);

        for (tier, subject) in [
            (Tier::Global, GLOBAL_KEY),
            (Tier::Country, country.as_str()),
            (Tier::Ip, ip),
        ] {
            let Some(settings) = config.window_tier(tier) else {
                continue;
            };
            if !settings.enabled {
                continue;
            }
            if tier == Tier::Country && self.is_bypassed(&country) {
                trace!(country = %country, "Country tier bypassed");
                continue;
            }

            let key = CounterKey::new(tier, subject);
            let result = self
                .counters
                .hit(&key, settings.window(), settings.max_requests);

            trace!(
                key = %key,
                count = result.count,
                remaining = result.remaining,
                "Counted request"
            );

            if result.count > settings.max_requests {
                let retry_after_ms = result.retry_after(Instant::now()).as_millis() as u64;
                debug!(
                    key = %key,
                    count = result.count,
                    limit = settings.max_requests,
                    retry_after_ms,
                    "Rate limit exceeded"
                );
                return Decision::denied(tier, retry_after_ms);
            }
        }

        Decision::allowed()
    }

    fn is_bypassed(&self, country: &str) -> bool {
        self.bypass_country.as_deref() == Some(country)
    }
}

fn normalize_country(country: &str) -> String {
    let country = country.trim();
    if country.is_empty() || country.eq_ignore_ascii_case(UNKNOWN_COUNTRY) {
        UNKNOWN_COUNTRY.to_string()
    } else {
        country.to_ascii_uppercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::counter::WindowCounter;
    use crate::ratelimit::rules::RateLimitConfigPatch;
    use std::time::Duration;

    fn setup(patch: &str) -> (RateLimitEnforcer, Arc<WindowCounter>) {
        let store = Arc::new(ConfigStore::new());
        store
            .update(&RateLimitConfigPatch::from_json(patch.as_bytes()).unwrap())
            .unwrap();
        let counters = Arc::new(WindowCounter::new());
        (RateLimitEnforcer::new(store, counters.clone()), counters)
    }

    #[test]
    fn test_allows_within_limits() {
        let (enforcer, _) = setup("{}");
        let decision = enforcer.check("10.0.0.1", "FR");
        assert_eq!(decision, Decision::allowed());
    }

    #[test]
    fn test_exactly_n_requests_allowed() {
        let (enforcer, _) = setup(r#"{"ip": {"windowMs": 60000, "maxRequests": 5}}"#);

        for i in 1..=5 {
            assert!(enforcer.check("10.0.0.1", "FR").allow, "request {} should pass", i);
        }
        let decision = enforcer.check("10.0.0.1", "FR");
        assert!(!decision.allow);
        assert_eq!(decision.reason, DenyReason::Ip);

        // Other IPs are unaffected.
        assert!(enforcer.check("10.0.0.2", "FR").allow);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reset_readmits() {
        let (enforcer, _) = setup(r#"{"ip": {"windowMs": 1000, "maxRequests": 2}}"#);

        assert!(enforcer.check("10.0.0.1", "FR").allow);
        assert!(enforcer.check("10.0.0.1", "FR").allow);
        assert!(!enforcer.check("10.0.0.1", "FR").allow);

        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert!(enforcer.check("10.0.0.1", "FR").allow);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_reflects_window_remaining() {
        let (enforcer, _) = setup(r#"{"ip": {"windowMs": 10000, "maxRequests": 1}}"#);

        assert!(enforcer.check("10.0.0.1", "FR").allow);
        tokio::time::advance(Duration::from_millis(4_000)).await;

        let decision = enforcer.check("10.0.0.1", "FR");
        assert!(!decision.allow);
        assert_eq!(decision.retry_after_ms, 6_000);
    }

    #[test]
    fn test_disabled_tier_never_denies() {
        let (enforcer, counters) =
            setup(r#"{"ip": {"maxRequests": 1, "enabled": false}}"#);

        for _ in 0..20 {
            assert!(enforcer.check("10.0.0.1", "FR").allow);
        }
        assert_eq!(
            counters.current_count(&CounterKey::new(Tier::Ip, "10.0.0.1")),
            None
        );
    }

    #[test]
    fn test_global_denial_does_not_count_lower_tiers() {
        let (enforcer, counters) = setup(r#"{"global": {"maxRequests": 2}}"#);

        enforcer.check("10.0.0.1", "FR");
        enforcer.check("10.0.0.1", "FR");
        let decision = enforcer.check("10.0.0.1", "FR");

        assert_eq!(decision.reason, DenyReason::Global);
        assert_eq!(counters.current_count(&CounterKey::global()), Some(3));
        assert_eq!(
            counters.current_count(&CounterKey::new(Tier::Country, "FR")),
            Some(2)
        );
        assert_eq!(
            counters.current_count(&CounterKey::new(Tier::Ip, "10.0.0.1")),
            Some(2)
        );
    }

    #[test]
    fn test_country_tier_denies_before_ip() {
        let (enforcer, _) = setup(r#"{"country": {"maxRequests": 3}}"#);

        assert!(enforcer.check("10.0.0.1", "de").allow);
        assert!(enforcer.check("10.0.0.2", "DE").allow);
        assert!(enforcer.check("10.0.0.3", "DE").allow);

        let decision = enforcer.check("10.0.0.4", "DE");
        assert_eq!(decision.reason, DenyReason::Country);
        assert!(enforcer.check("10.0.0.4", "FR").allow);
    }

    #[test]
    fn test_bypass_country_skips_country_tier_only() {
        let (enforcer, counters) = setup(
            r#"{"country": {"maxRequests": 1}, "ip": {"maxRequests": 3}}"#,
        );
        let enforcer = enforcer.with_bypass_country(Some("us".to_string()));

        assert!(enforcer.check("10.0.0.1", "US").allow);
        assert!(enforcer.check("10.0.0.1", "US").allow);
        assert!(enforcer.check("10.0.0.1", "US").allow);
        assert_eq!(
            counters.current_count(&CounterKey::new(Tier::Country, "US")),
            None
        );

        let decision = enforcer.check("10.0.0.1", "US");
        assert_eq!(decision.reason, DenyReason::Ip);

        // Non-bypassed countries are still limited.
        assert!(enforcer.check("10.0.0.9", "CA").allow);
        assert_eq!(enforcer.check("10.0.0.8", "CA").reason, DenyReason::Country);
    }

    #[test]
    fn test_bypass_country_still_subject_to_global() {
        let (enforcer, _) = setup(r#"{"country": {"maxRequests": 1}, "global": {"maxRequests": 2}}"#);
        let enforcer = enforcer.with_bypass_country(Some("US".to_string()));

        assert!(enforcer.check("10.0.0.1", "US").allow);
        assert!(enforcer.check("10.0.0.2", "US").allow);
        assert_eq!(enforcer.check("10.0.0.3", "US").reason, DenyReason::Global);
    }

    #[test]
    fn test_config_changes_apply_without_restart() {
        let store = Arc::new(ConfigStore::new());
        let enforcer = RateLimitEnforcer::new(store.clone(), Arc::new(WindowCounter::new()));

        assert!(enforcer.check("10.0.0.1", "FR").allow);
        assert!(enforcer.check("10.0.0.1", "FR").allow);

        store
            .update(&RateLimitConfigPatch::from_json(br#"{"ip": {"maxRequests": 2}}"#).unwrap())
            .unwrap();
        assert!(!enforcer.check("10.0.0.1", "FR").allow);
    }

    #[test]
    fn test_missing_country_is_counted_as_unknown() {
        let (enforcer, counters) = setup("{}");
        enforcer.check("10.0.0.1", "  ");
        assert_eq!(
            counters.current_count(&CounterKey::new(Tier::Country, UNKNOWN_COUNTRY)),
            Some(1)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ip_scenario_within_one_second() {
        let (enforcer, _) = setup(r#"{"ip": {"windowMs": 900000, "maxRequests": 100}}"#);

        for _ in 0..100 {
            assert!(enforcer.check("203.0.113.5", "FR").allow);
            tokio::time::advance(Duration::from_millis(5)).await;
        }
        let decision = enforcer.check("203.0.113.5", "FR");
        assert!(!decision.allow);
        assert_eq!(decision.reason, DenyReason::Ip);
        assert!((899_000..=900_000).contains(&decision.retry_after_ms));
    }

    #[test]
    fn test_decision_serializes_camel_case() {
        let json = serde_json::to_value(Decision::denied(Tier::Country, 1500)).unwrap();
        assert_eq!(json["allow"], false);
        assert_eq!(json["retryAfterMs"], 1500);
        assert_eq!(json["reason"], "country");
    }
}

//! Process-scoped holder for the live rate limit configuration.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

use super::rules::{RateLimitConfig, RateLimitConfigPatch};
use crate::error::ValidationError;

/// Holds the current [`RateLimitConfig`] as an immutable snapshot.
///
/// Readers load the snapshot without locking. Writers are serialized so a
/// merge always starts from the latest committed configuration, and the new
/// snapshot replaces the old one in a single atomic store.
///
/// A fresh store always starts from the built-in defaults; nothing is
/// persisted across restarts.
pub struct ConfigStore {
    current: ArcSwap<RateLimitConfig>,
    write_lock: Mutex<()>,
}

impl ConfigStore {
    /// Create a store holding the built-in defaults.
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    pub fn with_config(config: RateLimitConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(config),
            write_lock: Mutex::new(()),
        }
    }

    /// The current configuration snapshot.
    pub fn get(&self) -> Arc<RateLimitConfig> {
        self.current.load_full()
    }

    /// Merge `patch` over the current configuration.
    ///
    /// On any bound violation the stored configuration is left untouched.
    pub fn update(&self, patch: &RateLimitConfigPatch) -> Result<RateLimitConfig, ValidationError> {
        let _guard = self.write_lock.lock();
        let merged = self.current.load().merged(patch)?;
        self.current.store(Arc::new(merged));

        info!(config = ?merged, "Rate limit configuration updated");
        Ok(merged)
    }

    /// Restore the built-in defaults.
    pub fn reset(&self) -> RateLimitConfig {
        let _guard = self.write_lock.lock();
        let defaults = RateLimitConfig::default();
        self.current.store(Arc::new(defaults));

        info!("Rate limit configuration reset to defaults");
        defaults
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

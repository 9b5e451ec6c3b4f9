//! Counter storage trait for abstracting where window counters live.

use std::time::Duration;

use super::counter::HitResult;
use super::descriptor::CounterKey;

/// Trait for window counter storage.
///
/// The enforcer only talks to counters through this trait, so the in-memory
/// [`WindowCounter`](super::WindowCounter) can be replaced by a shared store
/// with atomic increment and TTL support if the service is ever scaled out.
/// Implementations must never block on I/O.
pub trait CounterBackend: Send + Sync {
    /// Record one request against `key` and return the post-increment state.
    fn hit(&self, key: &CounterKey, window: Duration, limit: u64) -> HitResult;

    /// Drop counters whose window has fully elapsed. Returns how many were removed.
    fn sweep(&self) -> usize;

    /// Number of counters currently tracked.
    fn tracked_keys(&self) -> usize;
}

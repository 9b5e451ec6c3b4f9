//! Fixed-window request counters.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::backend::CounterBackend;
use super::descriptor::CounterKey;

/// Outcome of recording a single request against a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitResult {
    /// Requests observed in the current window, including this one
    pub count: u64,
    /// Requests still allowed in the current window
    pub remaining: u64,
    /// When the current window ends
    pub reset_at: Instant,
}

impl HitResult {
    /// Time left until the window resets, measured from `now`.
    pub fn retry_after(&self, now: Instant) -> Duration {
        self.reset_at.saturating_duration_since(now)
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    count: u64,
    window_start: Instant,
    window: Duration,
}

impl WindowState {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= self.window
    }
}

/// Fixed-window counters keyed by [`CounterKey`].
///
/// Counters are created lazily on first hit and restarted in place once
/// their window has elapsed. Each update happens under the map shard's entry
/// lock, so increments to one key never lose updates while keys in other
/// shards proceed independently.
#[derive(Debug, Default)]
pub struct WindowCounter {
    windows: DashMap<CounterKey, WindowState>,
}

impl WindowCounter {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Record a request at `now`.
    ///
    /// If the key has no counter, or its window has elapsed, the counter
    /// restarts at one with the window starting at `now`.
    pub fn hit_at(&self, key: &CounterKey, window: Duration, limit: u64, now: Instant) -> HitResult {
        let mut entry = self.windows.entry(key.clone()).or_insert(WindowState {
            count: 0,
            window_start: now,
            window,
        });
        let state = entry.value_mut();

        // Window length may change at runtime; always judge with the latest.
        state.window = window;
        if state.is_expired(now) {
            trace!(key = %key, "Window elapsed, restarting counter");
            state.count = 0;
            state.window_start = now;
        }
        state.count += 1;

        HitResult {
            count: state.count,
            remaining: limit.saturating_sub(state.count),
            reset_at: state.window_start + window,
        }
    }

    /// Current count for a key, or `None` if it has no live window.
    pub fn current_count(&self, key: &CounterKey) -> Option<u64> {
        let now = Instant::now();
        self.windows
            .get(key)
            .filter(|state| !state.is_expired(now))
            .map(|state| state.count)
    }
}

impl CounterBackend for WindowCounter {
    fn hit(&self, key: &CounterKey, window: Duration, limit: u64) -> HitResult {
        self.hit_at(key, window, limit, Instant::now())
    }

    fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, state| !state.is_expired(now));
        before.saturating_sub(self.windows.len())
    }

    fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

/// Periodically drop expired counters until `shutdown` is cancelled.
pub fn spawn_sweeper(
    counters: Arc<dyn CounterBackend>,
    interval: Duration,
    max_tracked_keys: usize,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Counter sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = counters.sweep();
                    let tracked = counters.tracked_keys();
                    debug!(removed, tracked, "Swept expired rate limit counters");
                    if tracked > max_tracked_keys {
                        warn!(
                            tracked,
                            max_tracked_keys,
                            "Rate limit counters exceed the expected key volume"
                        );
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::rules::Tier;

    fn ip(addr: &str) -> CounterKey {
        CounterKey::new(Tier::Ip, addr)
    }

    #[test]
    fn test_first_hit_creates_counter() {
        let counter = WindowCounter::new();
        let now = Instant::now();
        let result = counter.hit_at(&ip("10.0.0.1"), Duration::from_secs(60), 10, now);

        assert_eq!(result.count, 1);
        assert_eq!(result.remaining, 9);
        assert_eq!(result.reset_at, now + Duration::from_secs(60));
        assert_eq!(counter.tracked_keys(), 1);
    }

    #[test]
    fn test_hits_increment_within_window() {
        let counter = WindowCounter::new();
        let start = Instant::now();
        let window = Duration::from_secs(10);

        for i in 0..5 {
            let at = start + Duration::from_millis(i * 100);
            let result = counter.hit_at(&ip("10.0.0.1"), window, 3, at);
            assert_eq!(result.count, i + 1);
            assert_eq!(result.reset_at, start + window);
        }
        assert_eq!(
            counter.hit_at(&ip("10.0.0.1"), window, 3, start).remaining,
            0
        );
    }

    #[test]
    fn test_window_resets_after_elapsing() {
        let counter = WindowCounter::new();
        let start = Instant::now();
        let window = Duration::from_secs(1);

        counter.hit_at(&ip("10.0.0.1"), window, 5, start);
        counter.hit_at(&ip("10.0.0.1"), window, 5, start + Duration::from_millis(999));

        let later = start + Duration::from_millis(1_000);
        let result = counter.hit_at(&ip("10.0.0.1"), window, 5, later);
        assert_eq!(result.count, 1);
        assert_eq!(result.reset_at, later + window);
    }

    #[test]
    fn test_retry_after_counts_down() {
        let counter = WindowCounter::new();
        let start = Instant::now();
        let result = counter.hit_at(&ip("10.0.0.1"), Duration::from_secs(900), 1, start);
        assert_eq!(
            result.retry_after(start + Duration::from_secs(1)),
            Duration::from_secs(899)
        );
        assert_eq!(
            result.retry_after(start + Duration::from_secs(1000)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_keys_are_independent() {
        let counter = WindowCounter::new();
        let window = Duration::from_secs(60);

        counter.hit(&ip("10.0.0.1"), window, 10);
        counter.hit(&ip("10.0.0.1"), window, 10);
        counter.hit(&ip("10.0.0.2"), window, 10);

        assert_eq!(counter.current_count(&ip("10.0.0.1")), Some(2));
        assert_eq!(counter.current_count(&ip("10.0.0.2")), Some(1));
        assert_eq!(counter.current_count(&ip("10.0.0.3")), None);
    }

    #[test]
    fn test_concurrent_hits_are_not_lost() {
        let counter = Arc::new(WindowCounter::new());
        let key = ip("198.51.100.7");
        let window = Duration::from_secs(3600);
        let threads = 8;
        let per_thread = 1_000;

        std::thread::scope(|s| {
            for _ in 0..threads {
                let counter = counter.clone();
                let key = key.clone();
                s.spawn(move || {
                    for _ in 0..per_thread {
                        counter.hit(&key, window, u64::MAX);
                    }
                });
            }
        });

        assert_eq!(counter.current_count(&key), Some(threads * per_thread));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_drops_only_expired_windows() {
        let counter = WindowCounter::new();
        counter.hit(&ip("10.0.0.1"), Duration::from_secs(1), 10);
        counter.hit(&ip("10.0.0.2"), Duration::from_secs(60), 10);

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(counter.sweep(), 1);
        assert_eq!(counter.tracked_keys(), 1);
        assert_eq!(counter.current_count(&ip("10.0.0.2")), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_until_cancelled() {
        let counter = Arc::new(WindowCounter::new());
        counter.hit(&ip("10.0.0.1"), Duration::from_secs(1), 10);

        let shutdown = CancellationToken::new();
        let handle = spawn_sweeper(
            counter.clone(),
            Duration::from_secs(5),
            100,
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(counter.tracked_keys(), 0);

        shutdown.cancel();
        tokio_test::assert_ok!(handle.await);
    }
}

//! Short-TTL cache of upstream responses.
//!
//! The cache is the main overload protection for the upstream provider: a
//! hit never reaches the outbound throttle. Entries expire lazily; an expired
//! entry is never returned. A background purger drops expired entries so the
//! request path never scans the whole map.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::form_urlencoded;

use crate::upstream::Payload;

/// Query parameters that never take part in the request signature.
const EXCLUDED_PARAMS: &[&str] = &["api_key"];

/// Build the normalized signature for an upstream request.
///
/// The endpoint is trimmed of surrounding slashes and the parameters are
/// sorted by name and form-encoded, so equivalent requests share a cache
/// entry and distinct ones never do.
pub fn cache_key(endpoint: &str, params: &BTreeMap<String, String>) -> String {
    let endpoint = endpoint.trim_matches('/');
    let mut query = form_urlencoded::Serializer::new(String::new());
    for (name, value) in params
        .iter()
        .filter(|(name, _)| !EXCLUDED_PARAMS.contains(&name.as_str()))
    {
        query.append_pair(name, value);
    }
    let query = query.finish();

    if query.is_empty() {
        endpoint.to_string()
    } else {
        format!("{}?{}", endpoint, query)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Payload,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Bounded TTL cache keyed by request signature.
///
/// `slots` counts stored keys. A new key must reserve a slot while holding
/// its entry lock, so the map never grows past `max_entries` even under
/// concurrent inserts.
#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    slots: AtomicUsize,
    max_entries: usize,
}

impl ResponseCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            slots: AtomicUsize::new(0),
            max_entries,
        }
    }

    /// Look up a live entry. Expired entries are reported as a miss and
    /// dropped.
    pub fn get(&self, key: &str) -> Option<Payload> {
        let now = Instant::now();
        {
            let entry = self.entries.get(key)?;
            if !entry.is_expired(now) {
                return Some(entry.payload.clone());
            }
        }

        trace!(key = %key, "Cache entry expired");
        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            self.slots.fetch_sub(1, Ordering::AcqRel);
        }
        None
    }

    /// Store `payload` under `key` for `ttl`, replacing any existing entry.
    ///
    /// A new key is not stored while the cache is full.
    pub fn set(&self, key: &str, payload: Payload, ttl: Duration) {
        let entry = CacheEntry {
            payload,
            expires_at: Instant::now() + ttl,
        };

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                let reserved = self
                    .slots
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                        (used < self.max_entries).then_some(used + 1)
                    })
                    .is_ok();
                if !reserved {
                    debug!(
                        key = %key,
                        max_entries = self.max_entries,
                        "Response cache full, not storing entry"
                    );
                    return;
                }
                vacant.insert(entry);
            }
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let expired = entry.is_expired(now);
            if expired {
                removed += 1;
            }
            !expired
        });
        self.slots.fetch_sub(removed, Ordering::AcqRel);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Periodically purge expired cache entries until `shutdown` is cancelled.
pub fn spawn_purger(
    cache: Arc<ResponseCache>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Cache purger stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = cache.purge_expired();
                    debug!(removed, remaining = cache.len(), "Purged expired cache entries");
                }
            }
        }
    })
}

//! Cache module for portico.
//!
//! This module provides the caching infrastructure:
//! - A process-wide TTL store with two-phase expiry: entries are fresh,
//!   then stale-but-servable, then evicted
//! - A tracker gating background revalidations to at most one per key
//!
//! The runtime is multi-threaded, so both structures serialize access
//! through tokio locks rather than relying on cooperative scheduling.

pub mod revalidation;

pub use revalidation::RevalidationTracker;

use axum::body::Bytes;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Payload held by a cache entry: a JSON document for search and metadata
/// responses, or raw bytes plus a content type for image thumbnails.
#[derive(Debug, Clone)]
pub enum CachedPayload {
    Json(Value),
    Binary { bytes: Bytes, content_type: String },
}

/// Age classification of an entry that is still servable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: CachedPayload,
    fresh_until: Instant,
    stale_at: Instant,
}

/// Process-wide keyed store with stale-while-revalidate expiry.
///
/// Every write stamps `fresh_until = now + fresh_ttl` and
/// `stale_at = now + stale_ttl`. `lookup` serves entries until `stale_at`
/// and reports whether they are still fresh; `sweep` evicts what has passed
/// `stale_at`. Time is measured with `tokio::time::Instant` so tests can
/// drive the clock.
#[derive(Clone)]
pub struct TtlCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    fresh_ttl: Duration,
    stale_ttl: Duration,
}

impl TtlCache {
    /// Panics if `fresh_ttl` is not strictly shorter than `stale_ttl`;
    /// the config layer validates this before construction.
    pub fn new(fresh_ttl: Duration, stale_ttl: Duration) -> Self {
        assert!(
            fresh_ttl < stale_ttl,
            "fresh TTL must be shorter than stale TTL"
        );
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            fresh_ttl,
            stale_ttl,
        }
    }

    /// Look up a servable entry. Entries past `stale_at` are reported as
    /// absent even if the sweeper has not removed them yet.
    pub async fn lookup(&self, key: &str) -> Option<(CachedPayload, Freshness)> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;

        if now >= entry.stale_at {
            return None;
        }

        let freshness = if now < entry.fresh_until {
            Freshness::Fresh
        } else {
            Freshness::Stale
        };
        Some((entry.payload.clone(), freshness))
    }

    /// Insert or overwrite an entry, restarting both TTL windows.
    pub async fn put(&self, key: impl Into<String>, payload: CachedPayload) {
        let key = key.into();
        let now = Instant::now();
        let entry = CacheEntry {
            payload,
            fresh_until: now + self.fresh_ttl,
            stale_at: now + self.stale_ttl,
        };

        debug!(
            cache_key = %key,
            fresh_secs = self.fresh_ttl.as_secs(),
            stale_secs = self.stale_ttl.as_secs(),
            "Cached payload"
        );
        self.entries.write().await.insert(key, entry);
    }

    /// Evict entries whose `stale_at` has passed; stale-but-servable
    /// entries stay. Returns the number removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| now < entry.stale_at);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Point-in-time classification of every entry, for the diagnostics
    /// endpoint. Expired entries still awaiting a sweep are included.
    pub async fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.entries.read().await;

        let mut stats = CacheStats {
            total_entries: entries.len(),
            fresh: 0,
            stale: 0,
            expired: 0,
            entries: Vec::with_capacity(entries.len()),
        };

        for (key, entry) in entries.iter() {
            let status = if now < entry.fresh_until {
                stats.fresh += 1;
                "fresh"
            } else if now < entry.stale_at {
                stats.stale += 1;
                "stale"
            } else {
                stats.expired += 1;
                "expired"
            };

            stats.entries.push(EntryStats {
                key: key.chars().take(80).collect(),
                status,
                fresh_for_secs: entry.fresh_until.saturating_duration_since(now).as_secs(),
                expires_in_secs: entry.stale_at.saturating_duration_since(now).as_secs(),
            });
        }

        stats
    }
}

/// Snapshot of the cache contents served by `/api/cache/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub fresh: usize,
    pub stale: usize,
    pub expired: usize,
    pub entries: Vec<EntryStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryStats {
    /// Cache key, truncated to 80 chars to keep the payload readable.
    pub key: String,
    pub status: &'static str,
    pub fresh_for_secs: u64,
    pub expires_in_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::time::advance;

    const FRESH: Duration = Duration::from_secs(300);
    const STALE: Duration = Duration::from_secs(3600);

    fn cache() -> TtlCache {
        TtlCache::new(FRESH, STALE)
    }

    #[tokio::test(start_paused = true)]
    async fn entry_transitions_fresh_stale_absent() {
        let cache = cache();
        cache.put("k", CachedPayload::Json(json!({"n": 1}))).await;

        assert_eq!(cache.lookup("k").await.unwrap().1, Freshness::Fresh);

        // One second before the fresh deadline
        advance(Duration::from_secs(299)).await;
        assert_eq!(cache.lookup("k").await.unwrap().1, Freshness::Fresh);

        // Exactly at the fresh deadline the entry turns stale
        advance(Duration::from_secs(1)).await;
        assert_eq!(cache.lookup("k").await.unwrap().1, Freshness::Stale);

        // One second before the stale deadline it is still servable
        advance(STALE - FRESH - Duration::from_secs(1)).await;
        assert_eq!(cache.lookup("k").await.unwrap().1, Freshness::Stale);

        // At the stale deadline it is gone
        advance(Duration::from_secs(1)).await;
        assert!(cache.lookup("k").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn put_overwrites_and_restarts_windows() {
        let cache = cache();
        cache.put("k", CachedPayload::Json(json!(1))).await;

        advance(Duration::from_secs(301)).await;
        assert_eq!(cache.lookup("k").await.unwrap().1, Freshness::Stale);

        cache.put("k", CachedPayload::Json(json!(2))).await;
        let (payload, freshness) = cache.lookup("k").await.unwrap();
        assert_eq!(freshness, Freshness::Fresh);
        match payload {
            CachedPayload::Json(value) => assert_eq!(value, json!(2)),
            CachedPayload::Binary { .. } => panic!("expected JSON payload"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_only_expired_entries() {
        let cache = cache();
        cache.put("old", CachedPayload::Json(json!(1))).await;

        advance(Duration::from_secs(1800)).await;
        cache.put("mid", CachedPayload::Json(json!(2))).await;

        // "old" passes its stale deadline, "mid" is merely stale
        advance(Duration::from_secs(1801)).await;
        assert_eq!(cache.sweep().await, 1);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.lookup("mid").await.unwrap().1, Freshness::Stale);
    }

    #[tokio::test(start_paused = true)]
    async fn stats_classifies_all_three_states() {
        let cache = cache();
        cache.put("expired", CachedPayload::Json(json!(1))).await;
        advance(Duration::from_secs(3300)).await;
        cache.put("stale", CachedPayload::Json(json!(2))).await;
        advance(Duration::from_secs(301)).await;
        cache.put("fresh", CachedPayload::Json(json!(3))).await;

        let stats = cache.stats().await;
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.fresh, 1);
        assert_eq!(stats.stale, 1);
        assert_eq!(stats.expired, 1);

        // The expired entry is reported in stats but no longer servable
        assert!(cache.lookup("expired").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn binary_payloads_round_trip() {
        let cache = cache();
        cache
            .put(
                "thumb",
                CachedPayload::Binary {
                    bytes: Bytes::from_static(b"\x89PNG"),
                    content_type: "image/png".to_string(),
                },
            )
            .await;

        match cache.lookup("thumb").await.unwrap().0 {
            CachedPayload::Binary {
                bytes,
                content_type,
            } => {
                assert_eq!(&bytes[..], b"\x89PNG");
                assert_eq!(content_type, "image/png");
            }
            CachedPayload::Json(_) => panic!("expected binary payload"),
        }
    }

    #[test]
    #[should_panic(expected = "fresh TTL must be shorter")]
    fn rejects_inverted_ttls() {
        TtlCache::new(Duration::from_secs(10), Duration::from_secs(5));
    }
}

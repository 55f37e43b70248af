//! Tracks which cache keys have a background refresh in flight.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Gate ensuring at most one background revalidation per cache key.
///
/// `try_begin` holds the write lock across the whole check-and-set, so two
/// stale hits racing on the same key cannot both start a refresh. The
/// holder must call `end` exactly once when the refresh settles, whether
/// it succeeded or failed.
#[derive(Clone, Default)]
pub struct RevalidationTracker {
    in_flight: Arc<RwLock<HashSet<String>>>,
}

impl RevalidationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the key for a background refresh. Returns false if a refresh
    /// for it is already in flight.
    pub async fn try_begin(&self, key: &str) -> bool {
        let mut in_flight = self.in_flight.write().await;
        if in_flight.contains(key) {
            return false;
        }
        in_flight.insert(key.to_string());
        true
    }

    /// Release the key after the refresh settles.
    pub async fn end(&self, key: &str) {
        self.in_flight.write().await.remove(key);
    }

    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_begin_denied_until_end() {
        let tracker = RevalidationTracker::new();

        assert!(tracker.try_begin("k").await);
        assert!(!tracker.try_begin("k").await);
        assert_eq!(tracker.in_flight_count().await, 1);

        tracker.end("k").await;
        assert!(tracker.try_begin("k").await);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let tracker = RevalidationTracker::new();

        assert!(tracker.try_begin("a").await);
        assert!(tracker.try_begin("b").await);

        tracker.end("a").await;
        assert!(!tracker.try_begin("b").await);
        assert!(tracker.try_begin("a").await);
    }

    #[tokio::test]
    async fn concurrent_begins_grant_exactly_one() {
        let tracker = RevalidationTracker::new();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move { tracker.try_begin("k").await }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 1);
    }
}

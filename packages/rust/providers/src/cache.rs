//! Fixed-window TTL cache.
//!
//! Owned by whoever needs it; there are no global caches. Methods take the
//! current instant so expiry can be tested without sleeping.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: HashMap<K, (Instant, V)>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// The cached value if it was stored less than `ttl` before `now`.
    pub fn get_at(&self, key: &K, now: Instant) -> Option<V> {
        let (stored, value) = self.entries.get(key)?;
        (now.saturating_duration_since(*stored) < self.ttl).then(|| value.clone())
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn insert_at(&mut self, key: K, value: V, now: Instant) {
        self.entries.insert(key, (now, value));
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_at(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, (stored, _)| now.saturating_duration_since(*stored) < ttl);
        before - self.entries.len()
    }

    pub fn purge(&mut self) -> usize {
        self.purge_at(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_expire_after_ttl() {
        let mut cache = TtlCache::new(Duration::from_secs(300));
        let t0 = Instant::now();
        cache.insert_at("BTC", 64_000.0, t0);

        assert_eq!(cache.get_at(&"BTC", t0 + Duration::from_secs(299)), Some(64_000.0));
        assert_eq!(cache.get_at(&"BTC", t0 + Duration::from_secs(300)), None);
        assert_eq!(cache.get_at(&"ETH", t0), None);
    }

    #[test]
    fn purge_removes_only_expired() {
        let mut cache = TtlCache::new(Duration::from_secs(10));
        let t0 = Instant::now();
        cache.insert_at(1, "old", t0);
        cache.insert_at(2, "new", t0 + Duration::from_secs(8));

        assert_eq!(cache.purge_at(t0 + Duration::from_secs(12)), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_at(&2, t0 + Duration::from_secs(12)), Some("new"));
    }

    #[test]
    fn zero_ttl_never_hits() {
        let mut cache = TtlCache::new(Duration::ZERO);
        let t0 = Instant::now();
        cache.insert_at("k", 1, t0);
        assert_eq!(cache.get_at(&"k", t0), None);
    }
}

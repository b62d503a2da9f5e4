use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Bounded map whose entries expire after a fixed time-to-live.
///
/// Expired entries are dropped on read and by [`TtlCache::evict_expired`].
/// When the cache is full, expired entries are purged first and then the
/// entry closest to expiry makes room.
pub struct TtlCache<V> {
    entries: DashMap<String, (V, Instant)>,
    ttl: Duration,
    capacity: usize,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.1 > now {
                return Some(entry.0.clone());
            }
        }
        self.entries.remove_if(key, |_, (_, expires_at)| *expires_at <= now);
        None
    }

    pub fn insert(&self, key: String, value: V) {
        if self.capacity == 0 || self.ttl.is_zero() {
            return;
        }

        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.evict_expired();
            if self.entries.len() >= self.capacity {
                let oldest = self
                    .entries
                    .iter()
                    .min_by_key(|entry| entry.value().1)
                    .map(|entry| entry.key().clone());
                if let Some(oldest) = oldest {
                    self.entries.remove(&oldest);
                }
            }
        }

        self.entries.insert(key, (value, Instant::now() + self.ttl));
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

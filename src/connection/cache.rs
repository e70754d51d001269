//! Short-lived cache of fetched messages

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::clock::instant_after;

#[derive(Debug)]
struct CachedEntry<M> {
    message: M,
    expires_at: Instant,
}

/// TTL cache keyed by an arbitrary string
///
/// Expired entries are evicted when a read observes them or when
/// [`MessageCache::clear_expired`] runs.
#[derive(Debug)]
pub struct MessageCache<M> {
    entries: HashMap<String, CachedEntry<M>>,
    ttl: Duration,
}

impl<M: Clone> MessageCache<M> {
    /// Create an empty cache with the given entry lifetime
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Store `message`, replacing any previous entry and restarting its TTL
    pub fn insert(&mut self, key: &str, message: M, now: Instant) {
        self.entries.insert(
            key.to_string(),
            CachedEntry {
                message,
                expires_at: instant_after(now, self.ttl),
            },
        );
    }

    /// Fetch a live entry; an expired one is removed and reported as absent
    pub fn get(&mut self, key: &str, now: Instant) -> Option<M> {
        let expired = match self.entries.get(key) {
            Some(entry) if now < entry.expires_at => return Some(entry.message.clone()),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove(key);
        }
        None
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Remove expired entries, returning how many were dropped
    pub fn clear_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.expires_at);
        before - self.entries.len()
    }

    /// Number of stored entries, live or not yet swept
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

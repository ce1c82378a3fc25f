//! # Per-Transaction Cache
//!
//! Bounded map with optional time-to-live, sized for exactly one reader
//! thread: a transaction owns its caches outright, so there is no locking
//! and `get` takes `&mut self`.
//!
//! ## Eviction
//!
//! - Capacity: inserting into a full cache evicts the least recently
//!   accessed entry (a monotonically increasing access tick, no clock).
//! - TTL: an entry older than the TTL is dropped on access, as if it were
//!   never cached.
//!
//! Failed loads are never inserted; the caller caches only successes, so a
//! transient error cannot poison a key.

use std::hash::Hash;
use std::time::{Duration, Instant};

use hashbrown::HashMap;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    last_access: u64,
}

pub struct TxnCache<K, V> {
    entries: HashMap<K, Entry<V>>,
    capacity: Option<usize>,
    ttl: Option<Duration>,
    tick: u64,
}

impl<K: Eq + Hash + Clone, V> TxnCache<K, V> {
    /// Unbounded cache without expiry.
    pub fn unbounded() -> Self {
        Self {
            entries: HashMap::new(),
            capacity: None,
            ttl: None,
            tick: 0,
        }
    }

    pub fn bounded(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            capacity: Some(capacity),
            ttl: None,
            tick: 0,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        if let Some(ttl) = self.ttl {
            if let Some(entry) = self.entries.get(key) {
                if entry.inserted_at.elapsed() > ttl {
                    self.entries.remove(key);
                    return None;
                }
            }
        }
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(key).map(|entry| {
            entry.last_access = tick;
            &mut entry.value
        })
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Like `contains`, but applies the TTL so an expired entry reads as
    /// absent (and is dropped).
    pub fn contains_live(&mut self, key: &K) -> bool {
        if let (Some(ttl), Some(entry)) = (self.ttl, self.entries.get(key)) {
            if entry.inserted_at.elapsed() > ttl {
                self.entries.remove(key);
                return false;
            }
        }
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: K, value: V) {
        if let Some(capacity) = self.capacity {
            if self.entries.len() >= capacity && !self.entries.contains_key(&key) {
                self.evict_one();
            }
        }
        self.tick += 1;
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
                last_access: self.tick,
            },
        );
    }

    fn evict_one(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }

    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> std::fmt::Debug for TxnCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxnCache")
            .field("entries", &self.entries.len())
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .finish()
    }
}

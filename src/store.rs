//! Storage for per-client admission state.
//!
//! [`Store`] is the seam between the decision engine and wherever state lives.
//! The engine only needs `get` and `put`-with-expiry; the remaining methods
//! serve the administrative interface. [`InMemoryStore`] is the single-process
//! implementation: a capacity-bounded LRU whose entries also expire after
//! their own time-to-live, so memory stays bounded regardless of traffic.
//!
//! Stores synchronise individual calls only. A read-modify-write sequence on
//! one client is made atomic by holding that client's [`KeyLocks`] shard.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::{Mutex, MutexGuard};

use crate::clock::millis;

/// Abstract key-value storage with per-entry expiry.
///
/// Timestamps are epoch millis supplied by the caller's clock, so a store never
/// reads time on its own.
pub trait Store<V>: Send + Sync + fmt::Debug {
    /// Fetch a live value. Expired entries read as `None`.
    fn get(&self, key: &str, now: u64) -> Option<V>;

    /// Insert or overwrite `key`, expiring `ttl` after `now`.
    fn put(&self, key: &str, value: V, ttl: Duration, now: u64);

    /// Remove `key`, returning its value if it was present.
    fn remove(&self, key: &str) -> Option<V>;

    /// Keys of live entries, sorted.
    fn keys(&self, now: u64) -> Vec<String>;

    /// Number of stored entries, including any not yet purged.
    fn len(&self) -> usize;

    /// True when nothing is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry, returning how many were removed.
    fn purge_expired(&self, now: u64) -> usize;
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: u64,
}

impl<V> Entry<V> {
    fn is_live(&self, now: u64) -> bool {
        now < self.expires_at
    }
}

/// In-process [`Store`] bounded both by capacity and by time.
///
/// When full, inserting a new key evicts the least recently used entry.
pub struct InMemoryStore<V> {
    entries: Mutex<LruCache<String, Entry<V>>>,
}

impl<V> InMemoryStore<V> {
    /// Create a store holding at most `capacity` keys (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { entries: Mutex::new(LruCache::new(capacity)) }
    }

    /// Maximum number of keys.
    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }
}

impl<V> fmt::Debug for InMemoryStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.entries.lock();
        f.debug_struct("InMemoryStore")
            .field("len", &guard.len())
            .field("capacity", &guard.cap())
            .finish()
    }
}

impl<V> Store<V> for InMemoryStore<V>
where
    V: Clone + Send,
{
    fn get(&self, key: &str, now: u64) -> Option<V> {
        let mut guard = self.entries.lock();
        let found = guard.get(key).map(|entry| entry.is_live(now).then(|| entry.value.clone()));
        match found {
            Some(Some(value)) => Some(value),
            Some(None) => {
                guard.pop(key);
                None
            }
            None => None,
        }
    }

    fn put(&self, key: &str, value: V, ttl: Duration, now: u64) {
        let expires_at = now.saturating_add(millis(ttl));
        self.entries.lock().put(key.to_string(), Entry { value, expires_at });
    }

    fn remove(&self, key: &str) -> Option<V> {
        self.entries.lock().pop(key).map(|entry| entry.value)
    }

    fn keys(&self, now: u64) -> Vec<String> {
        let guard = self.entries.lock();
        let mut keys: Vec<String> =
            guard.iter().filter(|(_, e)| e.is_live(now)).map(|(k, _)| k.clone()).collect();
        keys.sort();
        keys
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn purge_expired(&self, now: u64) -> usize {
        let mut guard = self.entries.lock();
        let expired: Vec<String> =
            guard.iter().filter(|(_, e)| !e.is_live(now)).map(|(k, _)| k.clone()).collect();
        for key in &expired {
            guard.pop(key);
        }
        expired.len()
    }
}

/// Fixed set of mutexes, one selected per key by hash.
///
/// Holding the guard for a client key serialises every request from that
/// client (and from any client hashing to the same shard).
pub struct KeyLocks {
    shards: Box<[Mutex<()>]>,
}

impl KeyLocks {
    /// Create `shards` locks (minimum 1).
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1)).map(|_| Mutex::new(())).collect();
        Self { shards }
    }

    /// Lock the shard owning `key`.
    pub fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        self.shards[self.shard_of(key)].lock()
    }

    fn shard_of(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::new(64)
    }
}

impl fmt::Debug for KeyLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyLocks{{shards:{}}}", self.shards.len())
    }
}

//! Bounded-staleness cache-aside store.
//!
//! [`TtlCache`] is the explicit cache component used in front of the identity
//! service and the backend ACL metadata lookups. Entries carry their own
//! deadline: the configured TTL, optionally shortened by a caller-supplied
//! instant (for example, a credential expiry). Expired entries are never
//! returned.
//!
//! The store is sharded via `DashMap`, so a refresh of one key only locks the
//! shard holding that key while readers of other keys proceed untouched, and
//! readers of the refreshed key observe either the old or the new value.
//!
//! Expired entries are swept on insert at most once per TTL interval, so the
//! store holds roughly the keys touched during the last two intervals.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    deadline: Instant,
}

/// Thread-safe cache with per-entry expiry.
///
/// A TTL of zero disables the cache entirely: [`TtlCache::get`] always misses
/// and [`TtlCache::insert`] is a no-op.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use s3gate_core::TtlCache;
///
/// let cache = TtlCache::<String, u32>::new(Duration::from_secs(60));
/// cache.insert("key".to_owned(), 7);
/// assert_eq!(cache.get(&"key".to_owned()), Some(7));
/// ```
#[derive(Debug)]
pub struct TtlCache<K: Eq + Hash, V> {
    inner: DashMap<K, CacheEntry<V>>,
    ttl: Duration,
    created: Instant,
    last_sweep_ms: AtomicU64,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    /// Create a new cache whose entries live at most `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: DashMap::new(),
            ttl,
            created: Instant::now(),
            last_sweep_ms: AtomicU64::new(0),
        }
    }

    /// Whether the cache stores anything at all.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// The staleness bound of this cache.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return a clone of the cached value if present and not yet expired.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// Insert a value with the default TTL.
    pub fn insert(&self, key: K, value: V) {
        self.insert_until(key, value, None);
    }

    /// Insert a value that must not outlive `not_after`, if given.
    ///
    /// The effective deadline is the earlier of `now + ttl` and `not_after`.
    /// An entry whose deadline already passed is not stored.
    pub fn insert_until(&self, key: K, value: V, not_after: Option<Instant>) {
        self.insert_at(key, value, not_after, Instant::now());
    }

    /// Drop a single entry.
    pub fn invalidate(&self, key: &K) {
        self.inner.remove(key);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Number of stored entries, including ones that expired but were not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn get_at(&self, key: &K, now: Instant) -> Option<V> {
        if !self.is_enabled() {
            return None;
        }

        if let Some(entry) = self.inner.get(key) {
            if entry.deadline > now {
                return Some(entry.value.clone());
            }
        }

        self.inner.remove_if(key, |_, entry| entry.deadline <= now);
        None
    }

    fn insert_at(&self, key: K, value: V, not_after: Option<Instant>, now: Instant) {
        if !self.is_enabled() {
            return;
        }

        let mut deadline = now + self.ttl;
        if let Some(limit) = not_after {
            deadline = deadline.min(limit);
        }
        if deadline <= now {
            return;
        }

        self.inner.insert(key, CacheEntry { value, deadline });
        self.maybe_sweep(now);
    }

    fn purge_expired_at(&self, now: Instant) {
        self.inner.retain(|_, entry| entry.deadline > now);
    }

    fn maybe_sweep(&self, now: Instant) {
        let now_ms = millis(now.saturating_duration_since(self.created));
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) < millis(self.ttl) {
            return;
        }
        // One inserter sweeps; the others carry on.
        if self
            .last_sweep_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.purge_expired_at(now);
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

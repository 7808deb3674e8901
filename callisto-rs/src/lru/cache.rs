//! Wraps the raw LRU cache with byte accounting, statistics and a mutex.
//!
//! A [Cache](Cache) is one of the two sub-caches of a [Group](crate::group::Group) (main or
//! hot). It tracks how many bytes its live entries occupy - counting `key.len() + view.len()`
//! per entry - so that the group can enforce its byte budget across both sub-caches. All
//! operations lock the internal mutex for their duration, which keeps the critical sections
//! short: the expensive work (loading values) happens elsewhere.
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use crate::lru::LruCache;
use crate::view::ByteView;

/// Provides a snapshot of the state and usage counters of a [Cache](Cache).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Contains the number of bytes occupied by all live entries (keys and values).
    pub bytes: i64,

    /// Contains the number of live entries.
    pub items: i64,

    /// Contains the total number of lookups.
    pub gets: i64,

    /// Contains the number of lookups which found an entry.
    pub hits: i64,

    /// Contains the number of entries which were purged, either by an overflow eviction or
    /// deliberately via [remove_oldest](Cache::remove_oldest).
    pub evictions: i64,
}

/// Provides a byte-accounted, thread safe cache of [ByteView](ByteView) values.
///
/// The underlying LRU is created lazily on the first [add](Cache::add) - this is the moment the
/// eviction callback is bound, which keeps the used-bytes counter in sync whenever an entry is
/// purged.
#[derive(Default)]
pub struct Cache {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    lru: Option<LruCache<String, ByteView>>,

    // Both counters are shared with the eviction callback of the LRU. They are only ever
    // touched while the outer mutex is held, the atomics merely satisfy the borrow checker
    // (the callback cannot borrow the struct it is stored in).
    used_bytes: Arc<AtomicI64>,
    evictions: Arc<AtomicI64>,

    gets: i64,
    hits: i64,
}

/// Computes the number of bytes an entry occupies in the cache.
fn entry_size(key: &str, value: &ByteView) -> i64 {
    (key.len() + value.len()) as i64
}

impl Cache {
    /// Stores the given view for the given key.
    ///
    /// Note that the cache itself has no byte limit - the byte budget is enforced by the
    /// [Group](crate::group::Group) across its two sub-caches after each insertion.
    pub fn add(&self, key: &str, value: ByteView) {
        let mut inner = self.inner.lock().unwrap();

        let used_bytes = inner.used_bytes.clone();
        let evictions = inner.evictions.clone();
        let lru = inner.lru.get_or_insert_with(|| {
            LruCache::new(
                0,
                Some(Box::new(move |key: &String, value: &ByteView| {
                    let _ = used_bytes.fetch_sub(entry_size(key, value), Ordering::Relaxed);
                    let _ = evictions.fetch_add(1, Ordering::Relaxed);
                })),
            )
        });

        let added = entry_size(key, &value);
        let displaced = lru.add(key.to_owned(), value);

        let _ = inner.used_bytes.fetch_add(added, Ordering::Relaxed);
        if let Some(old) = displaced {
            let _ = inner
                .used_bytes
                .fetch_sub(entry_size(key, &old), Ordering::Relaxed);
        }
    }

    /// Looks up the view stored for the given key, updating the get/hit counters.
    pub fn get(&self, key: &str) -> Option<ByteView> {
        let mut inner = self.inner.lock().unwrap();
        inner.gets += 1;

        let view = match inner.lru.as_mut() {
            Some(lru) => lru.get(key).cloned(),
            None => None,
        };

        if view.is_some() {
            inner.hits += 1;
        }

        view
    }

    /// Evicts the least recently used entry if the cache is non-empty.
    pub fn remove_oldest(&self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(lru) = inner.lru.as_mut() {
            lru.remove_oldest();
        }
    }

    /// Returns the number of bytes occupied by all live entries.
    pub fn bytes(&self) -> i64 {
        self.inner.lock().unwrap().used_bytes.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of the cache state and its usage counters.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            bytes: inner.used_bytes.load(Ordering::Relaxed),
            items: inner.items(),
            gets: inner.gets,
            hits: inner.hits,
            evictions: inner.evictions.load(Ordering::Relaxed),
        }
    }
}

impl Inner {
    fn items(&self) -> i64 {
        match self.lru.as_ref() {
            Some(lru) => lru.len() as i64,
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Cache, CacheStats};
    use crate::view::ByteView;

    #[test]
    fn bytes_track_the_live_entries() {
        let cache = Cache::default();

        cache.add("Tom", ByteView::from("630"));
        cache.add("Jack", ByteView::from("589"));
        assert_eq!(cache.bytes(), 6 + 7);

        // Replacing a value must account for the displaced bytes...
        cache.add("Tom", ByteView::from("1"));
        assert_eq!(cache.bytes(), 4 + 7);

        // ...and evicting an entry returns its bytes.
        cache.remove_oldest();
        cache.remove_oldest();
        assert_eq!(cache.bytes(), 0);
    }

    #[test]
    fn lookups_update_the_counters() {
        let cache = Cache::default();

        // A lookup on an untouched cache is counted as a miss...
        assert_eq!(cache.get("Tom"), None);

        cache.add("Tom", ByteView::from("630"));
        assert_eq!(cache.get("Tom"), Some(ByteView::from("630")));
        assert_eq!(cache.get("Nobody"), None);

        let stats = cache.stats();
        assert_eq!(stats.gets, 3);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.items, 1);
    }

    #[test]
    fn evictions_are_counted() {
        let cache = Cache::default();

        cache.add("a", ByteView::from("1"));
        cache.add("b", ByteView::from("2"));
        cache.remove_oldest();

        assert_eq!(
            cache.stats(),
            CacheStats {
                bytes: 2,
                items: 1,
                gets: 0,
                hits: 0,
                evictions: 1,
            }
        );
    }

    #[test]
    fn an_untouched_cache_reports_empty_stats() {
        let cache = Cache::default();
        assert_eq!(cache.stats(), CacheStats::default());
        cache.remove_oldest();
        assert_eq!(cache.bytes(), 0);
    }
}

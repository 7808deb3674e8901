use std::borrow::Borrow;
use std::hash::Hash;

use linked_hash_map::LinkedHashMap;

/// Invoked whenever an entry is purged from the cache.
///
/// The callback observes every destruction of an entry: an overflow eviction, an explicit
/// [remove](LruCache::remove), a [remove_oldest](LruCache::remove_oldest) or a
/// [clear](LruCache::clear). It is **not** invoked when an existing key merely receives a new
/// value.
pub type EvictionCallback<K, V> = Box<dyn FnMut(&K, &V) + Send>;

/// Provides an entry-count constrained LRU cache.
///
/// The cache behaves like a map which additionally tracks in which order its entries were used.
/// [add](LruCache::add) and [get](LruCache::get) both mark the touched entry as most recently
/// used. Once the number of entries exceeds **max_entries**, the least recently used entry is
/// dropped (and reported to the eviction callback, if one is present).
///
/// Note that this cache is **not** safe for concurrent access - synchronization is the concern
/// of the wrapper sitting on top (see [Cache](crate::lru::Cache)).
///
/// # Examples
/// ```
/// # use callisto::lru::LruCache;
/// let mut lru = LruCache::new(2, None);
///
/// lru.add("one", 1);
/// lru.add("two", 2);
/// lru.add("three", 3);
///
/// // "one" was the least recently used entry and had to go...
/// assert_eq!(lru.get(&"one"), None);
/// assert_eq!(lru.get(&"two"), Some(&2));
/// assert_eq!(lru.get(&"three"), Some(&3));
/// ```
pub struct LruCache<K: Eq + Hash, V> {
    // Zero means no limit, eviction is then entirely up to the caller.
    max_entries: usize,
    map: LinkedHashMap<K, V>,
    on_evict: Option<EvictionCallback<K, V>>,
}

impl<K: Eq + Hash, V> LruCache<K, V> {
    /// Creates a new cache which holds up to **max_entries** entries.
    ///
    /// If **max_entries** is zero, the cache has no limit and it is assumed that eviction is
    /// driven by the caller (via [remove_oldest](LruCache::remove_oldest)).
    pub fn new(max_entries: usize, on_evict: Option<EvictionCallback<K, V>>) -> Self {
        LruCache {
            max_entries,
            map: LinkedHashMap::new(),
            on_evict,
        }
    }

    /// Stores the given value for the given key and marks the entry as most recently used.
    ///
    /// If the key was already present, its value is replaced and the displaced value is
    /// returned so that the caller can re-account for it - the eviction callback deliberately
    /// stays silent in this case, as the entry itself lives on.
    ///
    /// If the insertion pushes the cache beyond its bound, the least recently used entry is
    /// evicted.
    pub fn add(&mut self, key: K, value: V) -> Option<V> {
        let displaced = self.map.insert(key, value);

        if displaced.is_none() && self.max_entries != 0 && self.map.len() > self.max_entries {
            self.remove_oldest();
        }

        displaced
    }

    /// Looks up the value stored for the given key and marks the entry as most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq + Hash,
    {
        self.map.get_refresh(key).map(|value| &*value)
    }

    /// Removes the entry for the given key if present.
    pub fn remove(&mut self, key: &K) {
        if let Some(value) = self.map.remove(key) {
            if let Some(callback) = self.on_evict.as_mut() {
                callback(key, &value);
            }
        }
    }

    /// Removes the least recently used entry if the cache is non-empty.
    pub fn remove_oldest(&mut self) {
        if let Some((key, value)) = self.map.pop_front() {
            if let Some(callback) = self.on_evict.as_mut() {
                callback(&key, &value);
            }
        }
    }

    /// Returns the number of entries currently stored.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Determines if the cache is completely empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Purges all entries, reporting each of them to the eviction callback.
    pub fn clear(&mut self) {
        if let Some(callback) = self.on_evict.as_mut() {
            for (key, value) in self.map.iter() {
                callback(key, value);
            }
        }

        self.map.clear();
    }
}

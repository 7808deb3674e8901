//! Provides the cache namespace which orchestrates lookups, peer routing and loading.
//!
//! A [Group](Group) is a named cache bound to one backing [Loader](Loader) and - optionally -
//! a set of peers. A lookup walks through the following stations:
//!
//! 1. the **main cache** (entries this node owns under consistent hashing),
//! 2. the **hot cache** (probabilistically sampled copies of remotely owned entries),
//! 3. the single-flight gate, which collapses concurrent misses for the same key,
//! 4. the peer owning the key (if it is a remote one), and finally
//! 5. the backing loader, whose result populates the main cache.
//!
//! Both sub-caches share one byte budget. After each insertion the group evicts least recently
//! used entries until the budget holds again, preferring to shrink the main cache unless the
//! hot cache has grown beyond an eighth of it - sampled copies must never starve authoritative
//! entries.
//!
//! # Examples
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use callisto::group::FnLoader;
//! # use callisto::registry::Registry;
//! #[tokio::main]
//! async fn main() {
//!     let registry = Registry::new();
//!     let group = registry.create_group(
//!         "scores",
//!         1 << 20,
//!         Arc::new(FnLoader(|key: &str| -> anyhow::Result<Vec<u8>> {
//!             // Consult the slow backing store here...
//!             Ok(format!("value of {}", key).into_bytes())
//!         })),
//!     );
//!
//!     let view = group.get("Tom").await.unwrap();
//!     println!("Tom -> {}", view);
//! }
//! ```
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use async_trait::async_trait;
use rand::Rng;

use crate::lru::{Cache, CacheStats};
use crate::peers::{GetRequest, PeerError, PeerGetter, PeerPicker};
use crate::registry::Registry;
use crate::singleflight::SingleFlight;
use crate::view::ByteView;

/// Loads the authoritative value for a key.
///
/// The loader is the source of truth behind a group: it is consulted whenever neither a local
/// cache nor a peer can serve a key. Its errors are propagated to the caller unchanged. Values
/// are treated as immutable once returned - a cached entry is never refreshed behind the
/// loader's back.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Fetches the value for the given key from the backing store.
    async fn load(&self, key: &str) -> anyhow::Result<Vec<u8>>;
}

/// Adapts a plain function or closure into a [Loader](Loader).
///
/// # Examples
///
/// ```
/// # use callisto::group::FnLoader;
/// let loader = FnLoader(|key: &str| -> anyhow::Result<Vec<u8>> {
///     Ok(key.to_uppercase().into_bytes())
/// });
/// ```
pub struct FnLoader<F>(
    /// The wrapped load function.
    pub F,
);

#[async_trait]
impl<F> Loader for FnLoader<F>
where
    F: Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    async fn load(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        (self.0)(key)
    }
}

/// Provides a monotonic counter which can be updated through a shared reference.
#[derive(Default)]
pub struct Counter(AtomicI64);

impl Counter {
    /// Adds the given delta to the counter.
    pub fn add(&self, delta: i64) {
        let _ = self.0.fetch_add(delta, Ordering::Relaxed);
    }

    /// Returns the current value of the counter.
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Collects the usage counters of a [Group](Group).
///
/// All counters are monotonic and safe to read while being updated concurrently.
#[derive(Default)]
pub struct Stats {
    /// Counts every lookup, including those arriving from peers over the transport.
    pub gets: Counter,

    /// Counts lookups which either cache answered.
    pub cache_hits: Counter,

    /// Counts values successfully obtained from a peer.
    pub peer_loads: Counter,

    /// Counts failed attempts to obtain a value from a peer.
    pub peer_errors: Counter,

    /// Counts lookups which missed both caches (including duplicates which the single-flight
    /// gate later collapsed).
    pub loads: Counter,

    /// Counts loads remaining after single-flight deduplication.
    pub loads_deduped: Counter,

    /// Counts values successfully obtained from the backing loader.
    pub local_loads: Counter,

    /// Counts errors reported by the backing loader.
    pub local_load_errs: Counter,

    /// Counts lookups which arrived over the network from peers.
    pub server_requests: Counter,
}

/// Names the two sub-caches of a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheKind {
    /// The cache holding entries this node owns under consistent hashing.
    Main,

    /// The cache holding sampled copies of entries owned by remote peers.
    Hot,
}

/// A cache namespace bound to one backing loader and - optionally - a peer set.
///
/// Groups are created through [Registry::create_group](crate::registry::Registry::create_group)
/// and live for the rest of the process.
pub struct Group {
    name: String,
    loader: Arc<dyn Loader>,

    // The budget shared by the main and the hot cache. Zero or less disables caching.
    cache_bytes: i64,
    main_cache: Cache,
    hot_cache: Cache,

    peers: OnceLock<Option<Arc<dyn PeerPicker>>>,
    registry: Weak<Registry>,
    flight: SingleFlight<ByteView>,
    stats: Stats,

    // Decides whether a value fetched from a peer is copied into the hot cache. Drawing a zero
    // means "keep a local copy", which happens for one in ten fetches.
    hot_sampler: Mutex<Box<dyn FnMut() -> u32 + Send>>,
}

impl Group {
    pub(crate) fn new(
        name: &str,
        cache_bytes: i64,
        loader: Arc<dyn Loader>,
        registry: Weak<Registry>,
    ) -> Arc<Group> {
        Arc::new(Group {
            name: name.to_owned(),
            loader,
            cache_bytes,
            main_cache: Cache::default(),
            hot_cache: Cache::default(),
            peers: OnceLock::new(),
            registry,
            flight: SingleFlight::new(),
            stats: Stats::default(),
            hot_sampler: Mutex::new(Box::new(|| rand::thread_rng().gen_range(0..10u32))),
        })
    }

    /// Returns the name of this group.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the usage counters of this group.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Returns a snapshot of the given sub-cache's state.
    pub fn cache_stats(&self, kind: CacheKind) -> CacheStats {
        match kind {
            CacheKind::Main => self.main_cache.stats(),
            CacheKind::Hot => self.hot_cache.stats(),
        }
    }

    /// Registers the peer picker this group routes through.
    ///
    /// Usually this is not necessary: a group without an explicitly registered picker asks its
    /// registry for the transport's picker on the first lookup.
    ///
    /// # Panics
    /// Panics if a picker is already in place - either via an earlier call or because a lookup
    /// has already performed the one-shot initialization.
    pub fn register_peers(&self, picker: Arc<dyn PeerPicker>) {
        if self.peers.set(Some(picker)).is_err() {
            panic!("register_peers called more than once for group '{}'!", self.name);
        }
    }

    /// Returns the value for the given key.
    ///
    /// This consults the local caches first, then - for keys owned by a remote peer - the peer,
    /// and finally the backing loader. Concurrent lookups for the same key share one load.
    /// Loader errors are handed to the caller, while peer errors are recovered by falling
    /// through to the loader.
    pub async fn get(&self, key: &str) -> anyhow::Result<ByteView> {
        let peers = self.peers();
        self.stats.gets.add(1);

        if let Some(view) = self.lookup_cache(key) {
            self.stats.cache_hits.add(1);
            return Ok(view);
        }

        self.load(key, peers).await
    }

    /// Performs the one-shot peer picker initialization.
    fn peers(&self) -> Option<&Arc<dyn PeerPicker>> {
        self.peers
            .get_or_init(|| {
                self.registry
                    .upgrade()
                    .and_then(|registry| registry.make_picker())
            })
            .as_ref()
    }

    /// Loads a key after both caches missed, deduplicating concurrent callers.
    async fn load(
        &self,
        key: &str,
        peers: Option<&Arc<dyn PeerPicker>>,
    ) -> anyhow::Result<ByteView> {
        self.stats.loads.add(1);

        let result = self
            .flight
            .execute(key, move || async move {
                // Another caller may have populated the caches while we were waiting to enter
                // the flight...
                if let Some(view) = self.lookup_cache(key) {
                    self.stats.cache_hits.add(1);
                    return Ok(view);
                }
                self.stats.loads_deduped.add(1);

                if let Some(picker) = peers {
                    if let Some(peer) = picker.pick_peer(key) {
                        match self.fetch_from_peer(peer.as_ref(), key).await {
                            Ok(view) => {
                                self.stats.peer_loads.add(1);
                                return Ok(view);
                            }
                            Err(error) => {
                                self.stats.peer_errors.add(1);
                                log::warn!(
                                    "Failed to fetch '{}' from the assigned peer ({}). Falling back to the local loader...",
                                    key,
                                    error
                                );
                            }
                        }
                    }
                }

                let bytes = match self.loader.load(key).await {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        self.stats.local_load_errs.add(1);
                        return Err(error);
                    }
                };
                self.stats.local_loads.add(1);

                let view = ByteView::from(bytes);
                self.populate(key, view.clone(), &self.main_cache);

                Ok(view)
            })
            .await;

        result.map_err(|error| anyhow::anyhow!("{:#}", error))
    }

    /// Consults the main cache, then the hot cache.
    fn lookup_cache(&self, key: &str) -> Option<ByteView> {
        if self.cache_bytes <= 0 {
            return None;
        }

        self.main_cache
            .get(key)
            .or_else(|| self.hot_cache.get(key))
    }

    /// Fetches a value from the given remote peer, sampling it into the hot cache.
    async fn fetch_from_peer(
        &self,
        peer: &dyn PeerGetter,
        key: &str,
    ) -> Result<ByteView, PeerError> {
        let request = GetRequest {
            group: self.name.clone(),
            key: key.to_owned(),
        };
        let response = peer.get(&request).await?;
        let view = ByteView::from(response.value);

        // Keys owned by a remote peer may well be hot locally. Keeping a copy for one in ten
        // fetches smooths the traffic for popular keys while bounding the duplication.
        if self.sample_hot() {
            self.populate(key, view.clone(), &self.hot_cache);
        }

        Ok(view)
    }

    fn sample_hot(&self) -> bool {
        (self.hot_sampler.lock().unwrap())() == 0
    }

    #[cfg(test)]
    fn set_hot_sampler(&self, sampler: Box<dyn FnMut() -> u32 + Send>) {
        *self.hot_sampler.lock().unwrap() = sampler;
    }

    /// Inserts a value into the given sub-cache and re-establishes the byte budget.
    fn populate(&self, key: &str, view: ByteView, cache: &Cache) {
        if self.cache_bytes <= 0 {
            return;
        }

        cache.add(key, view);

        loop {
            let main_bytes = self.main_cache.bytes();
            let hot_bytes = self.hot_cache.bytes();
            if main_bytes + hot_bytes <= self.cache_bytes {
                return;
            }

            // The main cache is the default victim. Only once the hot cache outgrows an eighth
            // of the main cache do its sampled copies have to give way.
            let victim = if hot_bytes > main_bytes / 8 {
                &self.hot_cache
            } else {
                &self.main_cache
            };
            victim.remove_oldest();
        }
    }
}

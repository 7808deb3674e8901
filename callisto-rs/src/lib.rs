//! Callisto is a library for building groups of cooperating in-memory cache nodes.
//!
//! # Introduction
//! **Callisto** implements a **distributed read-through cache**: each node of a peer group
//! holds a bounded in-memory cache of opaque byte values keyed by strings. Applications issue
//! reads against a local [Group](group::Group) and the group cooperatively serves them by
//! consulting its local caches, by routing to the peer which **owns** the key under consistent
//! hashing, or - as the last resort - by invoking the caller supplied backing loader.
//!
//! The interesting guarantees live between those steps: concurrent requests for one key
//! collapse into a **single** backend load, eviction follows an approximate LRU discipline
//! under a byte budget, and ownership re-balances smoothly when peers join the group.
//!
//! Note that this is a **read-through** cache: the backing loader is treated as an immutable
//! source of truth for the lifetime of a cached entry. There is no durability, no replication
//! and no coherence protocol - by design, as these would cost exactly the latency such a cache
//! exists to avoid.
//!
//! # Features
//! * **Request coalescing** - the [singleflight](singleflight) module guarantees that any
//!   number of overlapping lookups for one key trigger at most one load.
//! * **Dual caching** - values a node owns live in its *main* cache while popular remotely
//!   owned values are probabilistically sampled into a *hot* cache, bounded to a fraction of
//!   the byte budget so that copies never starve authoritative entries.
//! * **Consistent hashing with virtual nodes** - the [ring](ring) module spreads the key space
//!   over the peer group and keeps placements stable while peers are added.
//! * **100% Async/Await** - the whole library builds upon [tokio](https://tokio.rs/); the
//!   HTTP transport in [http](http) serves and fetches values with hyper.
//! * **Pluggable transports** - a group only talks to the two small traits in [peers](peers),
//!   so HTTP can be swapped for any transport satisfying them.
//!
//! # Modules
//! * **group**: The cache namespace orchestrating lookups, peer routing, loading and the byte
//!   budget. See [group](group).
//! * **registry**: The explicit handle keeping track of all groups of a process. See
//!   [registry](registry).
//! * **http**: The HTTP peer transport. See [http](http).
//! * **lru** / **ring** / **singleflight** / **view**: The building blocks underneath, usable
//!   on their own.
//!
//! # Using Callisto
//! A minimal node which answers for one group:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use callisto::group::FnLoader;
//! # use callisto::http::HttpPool;
//! # use callisto::registry::Registry;
//! #[tokio::main]
//! async fn main() {
//!     callisto::init_logging();
//!
//!     let registry = Registry::global();
//!     let _group = registry.create_group(
//!         "scores",
//!         64 * 1024 * 1024,
//!         Arc::new(FnLoader(|key: &str| -> anyhow::Result<Vec<u8>> {
//!             // Ask the actual backing store here...
//!             Ok(key.as_bytes().to_vec())
//!         })),
//!     );
//!
//!     let pool = HttpPool::new(&registry, "http://localhost:8001");
//!     pool.set_peers(&["http://localhost:8001", "http://localhost:8002"]);
//!     pool.serve("127.0.0.1:8001".parse().unwrap()).await.unwrap();
//! }
//! ```
//!
//! A ready-to-run node wiring all of this up (plus a demo backing store) can be found in the
//! accompanying **callisto-io** crate.
#![deny(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces
)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod fmt;
pub mod group;
pub mod http;
pub mod lru;
pub mod peers;
pub mod registry;
pub mod ring;
pub mod singleflight;
pub mod view;

/// Contains the version of the callisto library.
pub const CALLISTO_VERSION: &str = "DEVELOPMENT-SNAPSHOT";

/// Initializes the logging system.
///
/// Logs are written to stdout, which is all that is needed when running inside a container.
/// This can be called any number of times but only the first call has an effect - tests in
/// particular would otherwise trip over each other.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            panic!("Failed to initialize logging system: {}", error);
        }
    });
}

/// Provides a simple macro to execute an async lambda within `tokio::spawn`.
///
/// Note that this also applies std::mem::drop on the returned join handle to make
/// clippy happy.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate callisto;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // perform some async stuff here...
/// });
/// # }
/// ```
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}

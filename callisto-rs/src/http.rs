//! Connects cache nodes over HTTP.
//!
//! An [HttpPool](HttpPool) plays both sides of the peer protocol: it serves
//! `GET <base>/<group>/<key>` requests for the values this node can provide, and it implements
//! [PeerPicker](crate::peers::PeerPicker) so that local groups can route lookups to the peer
//! owning a key. Ownership is decided by a consistent-hash ring over the peer base URLs.
//!
//! Values travel as `application/octet-stream` bodies in the length-delimited frame format of
//! [GetResponse](crate::peers::GetResponse). Group names and keys are URL-encoded into the
//! request path.
//!
//! # Examples
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use callisto::group::FnLoader;
//! # use callisto::http::HttpPool;
//! # use callisto::registry::Registry;
//! #[tokio::main]
//! async fn main() {
//!     let registry = Registry::global();
//!     let _group = registry.create_group(
//!         "scores",
//!         1 << 20,
//!         Arc::new(FnLoader(|key: &str| -> anyhow::Result<Vec<u8>> {
//!             Ok(key.as_bytes().to_vec())
//!         })),
//!     );
//!
//!     let pool = HttpPool::new(&registry, "http://10.0.0.1:8001");
//!     pool.set_peers(&[
//!         "http://10.0.0.1:8001",
//!         "http://10.0.0.2:8001",
//!         "http://10.0.0.3:8001",
//!     ]);
//!
//!     pool.serve("0.0.0.0:8001".parse().unwrap()).await.unwrap();
//! }
//! ```
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use hyper::header::HeaderValue;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, StatusCode, Uri};

use crate::peers::{GetRequest, GetResponse, PeerError, PeerGetter, PeerPicker};
use crate::registry::Registry;
use crate::ring::{HashFn, HashRing};

/// Contains the default path prefix under which cache requests are served.
pub const DEFAULT_BASE_PATH: &str = "/_daiCache/";

/// Contains the default number of virtual nodes each peer contributes to the ring.
pub const DEFAULT_REPLICAS: usize = 50;

/// Configures an [HttpPool](HttpPool).
pub struct HttpPoolOptions {
    /// The path prefix under which cache requests are served. An empty string selects
    /// [DEFAULT_BASE_PATH](DEFAULT_BASE_PATH).
    pub base_path: String,

    /// The number of virtual nodes each peer contributes to the ring. Zero selects
    /// [DEFAULT_REPLICAS](DEFAULT_REPLICAS).
    pub replicas: usize,

    /// The hash function placing peers and keys on the ring. **None** selects CRC32-IEEE.
    ///
    /// All nodes of a cluster must agree on this function, as it determines the wire-visible
    /// placement of the key space.
    pub hash: Option<HashFn>,
}

impl Default for HttpPoolOptions {
    fn default() -> Self {
        HttpPoolOptions {
            base_path: DEFAULT_BASE_PATH.to_owned(),
            replicas: DEFAULT_REPLICAS,
            hash: None,
        }
    }
}

/// Implements the peer protocol for a pool of HTTP peers.
///
/// Constructing a pool registers it as the peer-picker factory of the given registry, hence
/// there can only be one pool per registry (a second construction is fatal).
pub struct HttpPool {
    // The base URL of this very node, e.g. "http://10.0.0.2:8001". Used to filter ourselves
    // out when picking peers.
    self_url: String,
    base_path: String,
    registry: Arc<Registry>,
    state: Mutex<PoolState>,
}

struct PoolState {
    ring: HashRing,
    getters: HashMap<String, Arc<HttpGetter>>,
}

impl HttpPool {
    /// Creates a pool with default options and registers it as the registry's peer picker.
    ///
    /// The **self_url** must be the base URL under which the other peers reach this node,
    /// for example `http://example.net:8001`.
    pub fn new(registry: &Arc<Registry>, self_url: &str) -> Arc<HttpPool> {
        HttpPool::with_options(registry, self_url, HttpPoolOptions::default())
    }

    /// Creates a pool with the given options and registers it as the registry's peer picker.
    ///
    /// # Panics
    /// Panics if the registry already has a peer picker - one node is one pool.
    pub fn with_options(
        registry: &Arc<Registry>,
        self_url: &str,
        options: HttpPoolOptions,
    ) -> Arc<HttpPool> {
        let base_path = if options.base_path.is_empty() {
            DEFAULT_BASE_PATH.to_owned()
        } else {
            options.base_path
        };
        let replicas = if options.replicas == 0 {
            DEFAULT_REPLICAS
        } else {
            options.replicas
        };

        let pool = Arc::new(HttpPool {
            self_url: self_url.to_owned(),
            base_path,
            registry: registry.clone(),
            state: Mutex::new(PoolState {
                ring: HashRing::new(replicas, options.hash),
                getters: HashMap::new(),
            }),
        });

        let picker: Arc<dyn PeerPicker> = pool.clone();
        registry.register_peer_picker(Box::new(move || picker.clone()));

        pool
    }

    /// Updates the pool's list of peers.
    ///
    /// Each peer value should be a valid base URL, for example `http://example.net:8001`.
    /// Peers are added to the ring (the ring is strictly additive) and receive a fresh HTTP
    /// getter each.
    pub fn set_peers<S: AsRef<str>>(&self, peers: &[S]) {
        let mut state = self.state.lock().unwrap();

        state.ring.add(peers);
        state.getters = peers
            .iter()
            .map(|peer| {
                let peer = peer.as_ref();
                let getter = Arc::new(HttpGetter {
                    base_url: format!("{}{}", peer, self.base_path),
                });
                (peer.to_owned(), getter)
            })
            .collect();
    }

    /// Serves cache requests on the given address until the server fails.
    pub async fn serve(self: Arc<Self>, address: SocketAddr) -> anyhow::Result<()> {
        let pool = self.clone();
        let service = make_service_fn(move |_connection| {
            let pool = pool.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |request| {
                    let pool = pool.clone();
                    async move { Ok::<_, Infallible>(pool.handle(request).await) }
                }))
            }
        });

        log::info!(
            "[Server {}] Serving cache requests on {}...",
            self.self_url,
            address
        );

        hyper::Server::try_bind(&address)
            .with_context(|| format!("Failed to bind the cache server to {}.", address))?
            .serve(service)
            .await
            .context("The cache server terminated abnormally.")?;

        Ok(())
    }

    /// Answers a single cache request of the form `GET <base>/<group>/<key>`.
    pub async fn handle(&self, request: Request<Body>) -> Response<Body> {
        let path = request.uri().path().to_owned();
        log::debug!("[Server {}] {} {}", self.self_url, request.method(), path);

        let suffix = match path.strip_prefix(&self.base_path) {
            Some(suffix) => suffix,
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Unexpected path: {}", path),
                )
            }
        };

        let (group_name, key) = match split_group_and_key(suffix) {
            Some(parts) => parts,
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "Expected a path of the form <base>/<group>/<key>.".to_owned(),
                )
            }
        };

        let group = match self.registry.lookup(&group_name) {
            Some(group) => group,
            None => {
                return error_response(
                    StatusCode::NOT_FOUND,
                    format!("No such group: {}", group_name),
                )
            }
        };

        group.stats().server_requests.add(1);

        match group.get(&key).await {
            Ok(view) => {
                let frame = GetResponse {
                    value: view.to_vec().into(),
                }
                .encode();

                let mut response = Response::new(Body::from(frame.freeze()));
                let _ = response.headers_mut().insert(
                    hyper::header::CONTENT_TYPE,
                    HeaderValue::from_static("application/octet-stream"),
                );
                response
            }
            Err(error) => {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", error))
            }
        }
    }
}

impl PeerPicker for HttpPool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        let state = self.state.lock().unwrap();

        match state.ring.get(key) {
            Some(peer) if peer != self.self_url => {
                log::debug!("[Server {}] Picked peer {} for '{}'.", self.self_url, peer, key);
                let getter: Arc<dyn PeerGetter> = state.getters.get(peer)?.clone();
                Some(getter)
            }
            _ => None,
        }
    }
}

/// Splits the path remainder into its URL-decoded group name and key.
fn split_group_and_key(suffix: &str) -> Option<(String, String)> {
    let (group, key) = suffix.split_once('/')?;
    if group.is_empty() {
        return None;
    }

    let group = urlencoding::decode(group).ok()?;
    let key = urlencoding::decode(key).ok()?;

    Some((group.into_owned(), key.into_owned()))
}

fn error_response(status: StatusCode, message: String) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;

    response
}

/// Fetches values from one concrete peer via HTTP.
struct HttpGetter {
    base_url: String,
}

#[async_trait]
impl PeerGetter for HttpGetter {
    async fn get(&self, request: &GetRequest) -> Result<GetResponse, PeerError> {
        let url = format!(
            "{}{}/{}",
            self.base_url,
            urlencoding::encode(&request.group),
            urlencoding::encode(&request.key)
        );
        let uri = url.parse::<Uri>().map_err(|error| {
            PeerError::Transport(anyhow!("Invalid peer URL '{}': {}", url, error))
        })?;

        let client = hyper::Client::new();
        let response = client
            .get(uri)
            .await
            .map_err(|error| PeerError::Transport(error.into()))?;

        if response.status() != StatusCode::OK {
            return Err(PeerError::Status(response.status().as_u16()));
        }

        let body = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|error| PeerError::Transport(error.into()))?;

        GetResponse::decode(body)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    use hyper::{StatusCode, Uri};
    use tokio::time::Duration;

    use crate::group::{CacheKind, FnLoader, Loader};
    use crate::http::{HttpPool, DEFAULT_REPLICAS};
    use crate::peers::GetResponse;
    use crate::registry::Registry;
    use crate::ring::HashRing;

    lazy_static::lazy_static! {
        /// Both integration tests bind fixed ports, so they must not run concurrently.
        static ref SHARED_TEST_RESOURCES: Mutex<()> = Mutex::new(());
    }

    fn score_loader(node: &'static str) -> Arc<dyn Loader> {
        let mut db = HashMap::new();
        let _ = db.insert("Tom".to_owned(), "630".to_owned());
        let _ = db.insert("Jack".to_owned(), "589".to_owned());
        let _ = db.insert("Sam".to_owned(), "567".to_owned());

        Arc::new(FnLoader(move |key: &str| -> anyhow::Result<Vec<u8>> {
            match db.get(key) {
                Some(value) => Ok(format!("{}:{}", node, value).into_bytes()),
                None => Ok(format!("{}:{}", node, key).into_bytes()),
            }
        }))
    }

    async fn fetch(url: &str) -> (StatusCode, bytes::Bytes) {
        let uri = url.parse::<Uri>().unwrap();
        let response = hyper::Client::new().get(uri).await.unwrap();
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();

        (status, body)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn a_node_serves_cache_requests_over_http() {
        let _guard = SHARED_TEST_RESOURCES.lock().unwrap();

        let self_url = "http://127.0.0.1:18461";
        let registry = Registry::new();
        let group = registry.create_group("scores", 2048, score_loader("a"));
        let pool = HttpPool::new(&registry, self_url);
        pool.set_peers(&[self_url]);

        crate::spawn!(pool.clone().serve("127.0.0.1:18461".parse::<SocketAddr>().unwrap()));
        tokio::time::sleep(Duration::from_millis(200)).await;

        // A known key is answered with a framed value...
        let (status, body) = fetch("http://127.0.0.1:18461/_daiCache/scores/Tom").await;
        assert_eq!(status, StatusCode::OK);
        let response = GetResponse::decode(body).unwrap();
        assert_eq!(&response.value[..], b"a:630");

        // ...an unknown group yields a 404...
        let (status, _body) = fetch("http://127.0.0.1:18461/_daiCache/missing/Tom").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // ...and a path outside the base path a 400.
        let (status, _body) = fetch("http://127.0.0.1:18461/somewhere/else").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(group.stats().server_requests.get(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn nodes_route_lookups_to_the_owning_peer() {
        let _guard = SHARED_TEST_RESOURCES.lock().unwrap();

        let url_a = "http://127.0.0.1:18462";
        let url_b = "http://127.0.0.1:18463";

        let registry_a = Registry::new();
        let group_a = registry_a.create_group("scores", 2048, score_loader("a"));
        let pool_a = HttpPool::new(&registry_a, url_a);
        pool_a.set_peers(&[url_a, url_b]);

        let registry_b = Registry::new();
        let group_b = registry_b.create_group("scores", 2048, score_loader("b"));
        let pool_b = HttpPool::new(&registry_b, url_b);
        pool_b.set_peers(&[url_a, url_b]);

        crate::spawn!(pool_a.clone().serve("127.0.0.1:18462".parse::<SocketAddr>().unwrap()));
        crate::spawn!(pool_b.clone().serve("127.0.0.1:18463".parse::<SocketAddr>().unwrap()));
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Reconstruct the placement to find keys owned by either node...
        let mut ring = HashRing::new(DEFAULT_REPLICAS, None);
        ring.add(&[url_a, url_b]);
        let owned_by_b = (0..)
            .map(|i| format!("key-{}", i))
            .find(|key| ring.get(key) == Some(url_b))
            .unwrap();
        let owned_by_a = (0..)
            .map(|i| format!("key-{}", i))
            .find(|key| ring.get(key) == Some(url_a))
            .unwrap();

        // A lookup for a remotely owned key is answered by the owning peer's loader...
        let view = group_a.get(&owned_by_b).await.unwrap();
        assert_eq!(view.to_string(), format!("b:{}", owned_by_b));
        assert_eq!(group_a.stats().peer_loads.get(), 1);
        assert_eq!(group_b.stats().server_requests.get(), 1);
        assert_eq!(group_b.stats().local_loads.get(), 1);

        // ...and the peer kept it in its own main cache, not ours.
        assert_eq!(group_b.cache_stats(CacheKind::Main).items, 1);
        assert_eq!(group_a.cache_stats(CacheKind::Main).items, 0);

        // A locally owned key never leaves the node.
        let view = group_a.get(&owned_by_a).await.unwrap();
        assert_eq!(view.to_string(), format!("a:{}", owned_by_a));
        assert_eq!(group_a.stats().local_loads.get(), 1);
        assert_eq!(group_a.cache_stats(CacheKind::Main).items, 1);
    }
}

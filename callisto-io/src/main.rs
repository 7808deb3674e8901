//! Runs a callisto cache node with a demo backing store.
//!
//! Each node serves its share of the key space to its peers and - when started with `--api` -
//! additionally exposes a front-end endpoint (`/api?key=...`) which answers with the raw cached
//! value. A three node group on one machine would be started as:
//!
//! ```text
//! callisto-io --port 8001 --peers http://localhost:8001,http://localhost:8002,http://localhost:8003 --api
//! callisto-io --port 8002 --peers http://localhost:8001,http://localhost:8002,http://localhost:8003
//! callisto-io --port 8003 --peers http://localhost:8001,http://localhost:8002,http://localhost:8003
//! ```
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::panic::{set_hook, take_hook};
use std::sync::Arc;

use anyhow::Context;
use callisto::fmt::{format_size, parse_size};
use callisto::group::{FnLoader, Group};
use callisto::http::HttpPool;
use callisto::registry::Registry;
use callisto::spawn;
use clap::Parser;
use hyper::header::HeaderValue;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, StatusCode};

/// The demo group served by every node.
const GROUP_NAME: &str = "string-group";

#[derive(Parser)]
#[command(name = "callisto-io", about = "Runs a callisto cache node with a demo backing store.")]
struct Options {
    /// The port on which the cache server listens.
    #[arg(long, default_value_t = 8001)]
    port: u16,

    /// The base URLs of all peers in the group (including this node).
    #[arg(long, value_delimiter = ',')]
    peers: Vec<String>,

    /// Starts the front-end API server.
    #[arg(long)]
    api: bool,

    /// The port on which the front-end API server listens.
    #[arg(long, default_value_t = 9999)]
    api_port: u16,

    /// The byte budget shared by the main and the hot cache (supports suffixes like 64m or 1g).
    #[arg(long, default_value = "1m")]
    cache_size: String,
}

/// Builds the demo table: three well-known entries plus a thousand generated ones.
fn create_db() -> HashMap<String, String> {
    let mut db = HashMap::new();
    let _ = db.insert("Tom".to_owned(), "630".to_owned());
    let _ = db.insert("Jack".to_owned(), "589".to_owned());
    let _ = db.insert("Sam".to_owned(), "567".to_owned());

    for i in 0..1000 {
        let _ = db.insert(i.to_string(), format!("{}{}", i, i));
    }

    db
}

fn text_response(status: StatusCode, message: String) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;

    response
}

/// Answers a front-end request of the form `/api?key=...` with the raw cached value.
async fn handle_api(group: Arc<Group>, request: Request<Body>) -> Response<Body> {
    let key = request.uri().query().and_then(|query| {
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("key="))
            .and_then(|value| urlencoding::decode(value).ok())
            .map(|value| value.into_owned())
    });

    let key = match key {
        Some(key) => key,
        None => {
            return text_response(
                StatusCode::BAD_REQUEST,
                "Missing 'key' query parameter.".to_owned(),
            )
        }
    };

    match group.get(&key).await {
        Ok(view) => {
            let mut response = Response::new(Body::from(view.to_vec()));
            let _ = response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            response
        }
        Err(error) => text_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", error)),
    }
}

/// Runs the front-end API server until it fails.
async fn serve_api(group: Arc<Group>, address: SocketAddr) -> anyhow::Result<()> {
    let service = make_service_fn(move |_connection| {
        let group = group.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |request| {
                let group = group.clone();
                async move { Ok::<_, Infallible>(handle_api(group, request).await) }
            }))
        }
    });

    log::info!("Front-end API server is running on {}...", address);

    hyper::Server::try_bind(&address)
        .with_context(|| format!("Failed to bind the API server to {}.", address))?
        .serve(service)
        .await
        .context("The API server terminated abnormally.")?;

    Ok(())
}

/// Completes once either CTRL-C or SIGHUP is received.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sig_hup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        .expect("Failed to install the SIGHUP handler");

    tokio::select! {
        _ = ctrl_c => log::info!("Received CTRL-C. Shutting down..."),
        _ = sig_hup.recv() => log::info!("Received SIGHUP. Shutting down..."),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Installs a panic handler which crashes the whole process instead of trying to survive
    // with a missing tokio background thread. Having a panic in a tokio thread is quite ugly,
    // as the server seems to be healthy from the outside but won't handle any incoming
    // requests. Therefore we crash the whole process on purpose and hope for an external
    // watchdog like docker-compose to create a new container which is in a sane and consistent
    // state.
    let original_panic_handler = take_hook();
    set_hook(Box::new(move |panic_info| {
        original_panic_handler(panic_info);
        eprintln!("PROGRAM ALARM: A panic occurred in a thread. Crashing the whole process to enable a clean restart...");
        std::process::exit(-1);
    }));

    callisto::init_logging();
    let options = Options::parse();

    log::info!("||. CALLISTO (v {}) starting up...", callisto::CALLISTO_VERSION);

    let cache_bytes = parse_size(&options.cache_size).context("Failed to parse --cache-size.")?;
    log::info!("Using a cache budget of {}.", format_size(cache_bytes));

    let db = create_db();
    let group = Registry::global().create_group(
        GROUP_NAME,
        cache_bytes as i64,
        Arc::new(FnLoader(move |key: &str| {
            log::info!("[SlowDB] Searching key {}...", key);
            match db.get(key) {
                Some(value) => Ok(value.as_bytes().to_vec()),
                None => Err(anyhow::anyhow!("{} not exist", key)),
            }
        })),
    );

    let self_url = format!("http://localhost:{}", options.port);
    let mut peers = options.peers.clone();
    if peers.is_empty() {
        peers.push(self_url.clone());
    }

    let pool = HttpPool::new(&Registry::global(), &self_url);
    pool.set_peers(&peers);

    if options.api {
        let api_address = SocketAddr::from(([127, 0, 0, 1], options.api_port));
        let api_group = group.clone();
        spawn!(async move {
            if let Err(error) = serve_api(api_group, api_address).await {
                log::error!("The API server failed: {:#}", error);
            }
        });
    }

    let address = SocketAddr::from(([127, 0, 0, 1], options.port));
    tokio::select! {
        result = pool.serve(address) => result,
        _ = shutdown_signal() => Ok(()),
    }
}

//! HTTP server for LeafSpy ingestion and the status pages
//!
//! `leafspy-relay serve` → binds the listener, starts worker threads, and
//! answers `/update` plus the HTML views.

use crate::config::{Config, TlsConfig};
use crate::pages;
use crate::relay::Relay;
use crate::store::{ErrorKind, SampleParams, TelemetryStore, TripOrder};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{debug, error, info, warn};

/// Acknowledgement LeafSpy string-matches; not standalone JSON on purpose
pub const STATUS_OK: &str = r#""status":"0""#;
pub const STATUS_FAILED: &str = r#""status":"1""#;

/// Everything a request handler needs, built once at startup
pub struct AppState {
    pub store: TelemetryStore,
    pub relay: Option<Arc<Relay>>,
    pub gmaps_api_key: Option<String>,
    pub static_dir: PathBuf,
}

impl AppState {
    pub fn new(store: TelemetryStore, relay: Option<Relay>, config: &Config) -> Self {
        Self {
            store,
            relay: relay.map(Arc::new),
            gmaps_api_key: config.display.gmaps_api_key.clone(),
            static_dir: config.server.static_dir.clone(),
        }
    }

    fn gmaps_key(&self) -> Option<&str> {
        self.gmaps_api_key.as_deref()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("failed to listen on {addr}: {reason}")]
    Bind { addr: String, reason: String },
    #[error("failed to read TLS material {path}: {source}")]
    Tls {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A fully rendered answer, independent of the transport
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Reply {
    fn new(status: u16, content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type,
            body: body.into(),
        }
    }

    fn html(body: String) -> Self {
        Self::new(200, "text/html; charset=utf-8", body)
    }

    fn error_page(status: u16, message: &str) -> Self {
        Self::new(status, "text/html; charset=utf-8", pages::error_page(status, message))
    }

    fn not_found() -> Self {
        Self::error_page(404, "Not found")
    }
}

// ============================================================================
// Listener
// ============================================================================

#[cfg(feature = "tls")]
fn listen(addr: &str, tls: Option<&TlsConfig>) -> Result<Server, ServeError> {
    let read = |path: &Path| {
        std::fs::read(path).map_err(|source| ServeError::Tls {
            path: path.to_path_buf(),
            source,
        })
    };
    let server = match tls {
        Some(tls) => Server::https(
            addr,
            tiny_http::SslConfig {
                certificate: read(&tls.cert)?,
                private_key: read(&tls.key)?,
            },
        ),
        None => Server::http(addr),
    };
    server.map_err(|e| ServeError::Bind {
        addr: addr.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(not(feature = "tls"))]
fn listen(addr: &str, tls: Option<&TlsConfig>) -> Result<Server, ServeError> {
    if tls.is_some() {
        warn!("TLS configured but this build lacks the `tls` feature; serving plain HTTP");
    }
    Server::http(addr).map_err(|e| ServeError::Bind {
        addr: addr.to_string(),
        reason: e.to_string(),
    })
}

/// Bind the listener described by `config`
pub fn bind(config: &Config) -> Result<Server, ServeError> {
    listen(&config.server_address(), config.server.tls.as_ref())
}

/// Start `workers` threads answering requests from `server`
pub fn spawn_workers(server: Arc<Server>, state: Arc<AppState>, workers: usize) -> Vec<JoinHandle<()>> {
    (0..workers.max(1))
        .map(|n| {
            let server = Arc::clone(&server);
            let state = Arc::clone(&state);
            std::thread::spawn(move || {
                for request in server.incoming_requests() {
                    if let Err(e) = handle_request(&state, request) {
                        warn!(worker = n, error = %e, "failed to answer request");
                    }
                }
            })
        })
        .collect()
}

/// Run the server until the listener closes
pub fn start_server(config: &Config, state: AppState) -> Result<(), ServeError> {
    let server = Arc::new(bind(config)?);
    let scheme = if cfg!(feature = "tls") && config.server.tls.is_some() { "https" } else { "http" };
    info!(
        addr = %config.server_address(),
        scheme,
        workers = config.server.workers,
        relay = state.relay.is_some(),
        "LeafSpy server listening"
    );

    for handle in spawn_workers(server, Arc::new(state), config.server.workers) {
        if handle.join().is_err() {
            error!("worker thread panicked");
        }
    }
    Ok(())
}

// ============================================================================
// Request handling
// ============================================================================

fn split_url(url: &str) -> (&str, &str) {
    match url.split_once('?') {
        Some((path, query)) => (path, query),
        None => (url, ""),
    }
}

/// Decode url-encoded pairs; the first value of a repeated name wins
pub fn parse_form(encoded: &str) -> SampleParams {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(encoded).unwrap_or_default();
    let mut params = HashMap::new();
    for (name, value) in pairs {
        params.entry(name).or_insert(value);
    }
    params
}

/// Query fields overlaid by body fields of the same name
fn merge_form(query: &str, body: &str) -> SampleParams {
    let mut params = parse_form(query);
    params.extend(parse_form(body));
    params
}

fn handle_request(state: &AppState, mut request: Request) -> std::io::Result<()> {
    let url = request.url().to_string();
    let method = request.method().clone();

    let mut body = String::new();
    if method == Method::Post {
        if let Err(e) = request.as_reader().read_to_string(&mut body) {
            warn!(error = %e, "failed to read request body");
            body.clear();
        }
    }

    let reply = dispatch(state, &method, &url, &body);
    debug!(%method, %url, status = reply.status, "request handled");

    let mut response = Response::from_data(reply.body).with_status_code(reply.status);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], reply.content_type.as_bytes()) {
        response.add_header(header);
    }
    let result = request.respond(response);

    // The device already has its answer; relay even if it hung up
    let (path, raw_query) = split_url(&url);
    if path == "/update" && matches!(method, Method::Get | Method::Post) {
        if let Some(relay) = &state.relay {
            relay.spawn(raw_query.to_string());
        }
    }

    result
}

/// Route one request to its reply. Never panics on bad input.
pub fn dispatch(state: &AppState, method: &Method, url: &str, body: &str) -> Reply {
    let (path, query) = split_url(url);

    match (method, path) {
        (Method::Get | Method::Post, "/update") => {
            let params = merge_form(query, body);
            Reply::new(200, "application/json", ingest(&state.store, &params))
        }
        (_, "/update") => Reply::new(405, "text/plain", "Method not allowed"),

        (&Method::Get, "/") => Reply::html(pages::base_page(state.gmaps_key())),
        (&Method::Get, "/index" | "/index/") => index_view(state),
        (&Method::Get, "/trips" | "/trips/") => trips_view(state, &parse_form(query)),
        (&Method::Get, p) if p.starts_with("/static/") => static_file(&state.static_dir, &p["/static/".len()..]),

        _ => Reply::not_found(),
    }
}

/// Store one update and produce the device acknowledgement
pub fn ingest(store: &TelemetryStore, params: &SampleParams) -> &'static str {
    match store.insert_sample(params) {
        Ok(id) => {
            debug!(id, "sample stored");
            STATUS_OK
        }
        Err(e) if e.kind() == ErrorKind::Validation => {
            warn!(error = %e, "rejected update");
            STATUS_FAILED
        }
        Err(e) => {
            error!(error = %e, kind = ?e.kind(), "failed to store update");
            STATUS_FAILED
        }
    }
}

fn index_view(state: &AppState) -> Reply {
    match state.store.latest_sample() {
        Ok(latest) => Reply::html(pages::index_page(latest.as_ref(), state.gmaps_key())),
        Err(e) => {
            error!(error = %e, "failed to load latest sample");
            Reply::error_page(500, "Could not load the latest sample.")
        }
    }
}

fn trips_view(state: &AppState, query: &SampleParams) -> Reply {
    match query.get("id").map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(raw_id) => {
            let Ok(trip_id) = raw_id.parse::<i32>() else {
                return Reply::error_page(400, &format!("Invalid trip id {:?}", raw_id));
            };
            match state.store.samples_by_trip(trip_id) {
                Ok(samples) => Reply::html(pages::trip_page(trip_id, &samples, state.gmaps_key())),
                Err(e) => {
                    error!(trip_id, error = %e, "failed to load trip");
                    Reply::error_page(500, "Could not load this trip.")
                }
            }
        }
        None => {
            let order = TripOrder::from_param(query.get("order").map(String::as_str));
            match state.store.list_trips(order) {
                Ok(trips) => Reply::html(pages::trips_page(&trips, order)),
                Err(e) => {
                    error!(error = %e, "failed to list trips");
                    Reply::error_page(500, "Could not load the trip list.")
                }
            }
        }
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

/// Serve a file below `root`; anything escaping it is not found
fn static_file(root: &Path, relative: &str) -> Reply {
    let relative = Path::new(relative);
    if relative.as_os_str().is_empty()
        || !relative.components().all(|c| matches!(c, Component::Normal(_)))
    {
        return Reply::not_found();
    }
    let path = root.join(relative);
    match std::fs::read(&path) {
        Ok(bytes) => Reply::new(200, content_type_for(&path), bytes),
        Err(_) => Reply::not_found(),
    }
}

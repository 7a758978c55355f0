//! A single upstream proxy target
//!
//! Each backend wraps one task instance and forwards requests to it over a
//! pooled HTTP client, streaming bodies in both directions. The gateway
//! name is appended to the `Via` response header; hop-by-hop headers are
//! stripped on both legs.

use axum::body::Body;
use axum::http::header::{HeaderName, HeaderValue, USER_AGENT, VIA};
use axum::http::{Request, StatusCode, Version};
use axum::response::{IntoResponse, Response};
use crate::error::Result;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tracing::{info, warn};

/// Gateway token placed in the `Via` response header
pub const GATEWAY_NAME: &str = "portico";

/// Headers that must not cross a proxy hop (RFC 7230 §6.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// One upstream target with liveness, capacity, and load bookkeeping
pub struct HttpBackend {
    id: String,
    host: String,
    port: u16,
    /// 0 means unlimited
    capacity: usize,
    current_load: AtomicUsize,
    alive: AtomicBool,
    served_total: AtomicU64,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(
        id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        capacity: usize,
        alive: bool,
        client: reqwest::Client,
    ) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            capacity,
            current_load: AtomicUsize::new(0),
            alive: AtomicBool::new(alive),
            served_total: AtomicU64::new(0),
            client,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// In-flight requests at this backend
    pub fn current_load(&self) -> usize {
        self.current_load.load(Ordering::SeqCst)
    }

    /// Monotonic count of requests handed to this backend
    pub fn served_total(&self) -> u64 {
        self.served_total.load(Ordering::Relaxed)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Toggle liveness; logs only on actual transitions
    pub fn set_alive(&self, alive: bool) {
        let was = self.alive.swap(alive, Ordering::SeqCst);
        if was != alive {
            if alive {
                info!(backend = %self, "backend is alive");
            } else {
                info!(backend = %self, "backend is dead");
            }
        }
    }

    /// Alive and under capacity (capacity 0 never limits)
    pub fn is_available(&self) -> bool {
        self.is_alive() && (self.capacity == 0 || self.current_load() < self.capacity)
    }

    /// Hold synthetic load on this backend (scheduler tests only)
    #[cfg(test)]
    pub(crate) fn hold_load(&self) -> LoadGuard<'_> {
        LoadGuard::acquire(&self.current_load)
    }

    /// Proxy one request to this backend.
    ///
    /// The load counter is held by a guard, so it returns to its pre-call
    /// value on every exit path, panics included. An upstream failure maps
    /// to 502; it does not change the liveness flag, which only the
    /// orchestrator's health reports control.
    pub async fn handle(&self, req: Request<Body>) -> Response {
        self.served_total.fetch_add(1, Ordering::Relaxed);
        let _load = LoadGuard::acquire(&self.current_load);

        let version = req.version();
        match self.forward(req).await {
            Ok(mut response) => {
                append_via(response.headers_mut(), version);
                response
            }
            Err(err) => {
                warn!(backend = %self, error = %err, "upstream request failed");
                (StatusCode::BAD_GATEWAY, "upstream request failed\n").into_response()
            }
        }
    }

    async fn forward(&self, req: Request<Body>) -> Result<Response> {
        let (parts, body) = req.into_parts();

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("http://{}:{}{}", self.host, self.port, path_and_query);

        let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
            .unwrap_or(reqwest::Method::GET);

        let mut headers = reqwest::header::HeaderMap::with_capacity(parts.headers.len());
        for (name, value) in &parts.headers {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            // The outbound body is re-framed as a stream; its length
            // header must come from the client we hand it to, not from
            // the inbound message.
            if name == axum::http::header::CONTENT_LENGTH {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
                reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
            ) {
                headers.append(name, value);
            }
        }
        // The client's Host header travels to the upstream unchanged; the
        // dial target is the backend address in the URL. A request without
        // a User-Agent stays without one, rather than growing a default.
        if !parts.headers.contains_key(USER_AGENT) {
            headers.insert(
                reqwest::header::USER_AGENT,
                reqwest::header::HeaderValue::from_static(""),
            );
        }

        let upstream = self
            .client
            .request(method, &url)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await?;

        let status =
            StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);

        let mut builder = Response::builder().status(status);
        if let Some(response_headers) = builder.headers_mut() {
            for (name, value) in upstream.headers() {
                if is_hop_by_hop(name.as_str()) {
                    continue;
                }
                if let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(name.as_str().as_bytes()),
                    HeaderValue::from_bytes(value.as_bytes()),
                ) {
                    response_headers.append(name, value);
                }
            }
        }

        Ok(builder.body(Body::from_stream(upstream.bytes_stream()))?)
    }
}

impl fmt::Display for HttpBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| name.eq_ignore_ascii_case(hop))
}

fn append_via(headers: &mut axum::http::HeaderMap, version: Version) {
    let protocol = match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_11 => "1.1",
        Version::HTTP_2 => "2.0",
        Version::HTTP_3 => "3.0",
        _ => "1.1",
    };
    if let Ok(value) = HeaderValue::from_str(&format!("{protocol} {GATEWAY_NAME}")) {
        headers.append(VIA, value);
    }
}

/// RAII increment of an in-flight counter; the decrement runs on drop, so
/// unwinding cannot leak load.
pub(crate) struct LoadGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> LoadGuard<'a> {
    pub(crate) fn acquire(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

//! A named HTTP service: an ordered backend list plus a scheduling policy
//!
//! Services are created and mutated only by the gateway event loop; router
//! request tasks read them concurrently, so the backend list sits behind a
//! reader/writer lock that requests hold only long enough to pick a
//! backend.

use super::backend::HttpBackend;
use crate::events::SchedulerKind;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// One `<appId>-<portIndex>` service exposed by the gateway
pub struct HttpService {
    service_id: String,
    service_port: u16,
    hosts: Vec<String>,
    default_vhost: bool,
    scheduler: SchedulerKind,
    backends: RwLock<Vec<Arc<HttpBackend>>>,
    /// Round-robin position; only ever advanced, read modulo the length
    cursor: AtomicUsize,
}

impl HttpService {
    pub fn new(
        service_id: impl Into<String>,
        service_port: u16,
        hosts: Vec<String>,
        default_vhost: bool,
        scheduler: SchedulerKind,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            service_port,
            hosts,
            default_vhost,
            scheduler,
            backends: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn service_port(&self) -> u16 {
        self.service_port
    }

    /// Virtual hosts this service answers for
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Whether unmatched vhost traffic falls back to this service
    pub fn is_default_vhost(&self) -> bool {
        self.default_vhost
    }

    pub fn scheduler(&self) -> SchedulerKind {
        self.scheduler
    }

    /// Attach a backend; a no-op when the id is already present
    pub async fn add_backend(
        &self,
        id: &str,
        host: &str,
        port: u16,
        capacity: usize,
        alive: bool,
        client: reqwest::Client,
    ) {
        let mut backends = self.backends.write().await;
        if backends.iter().any(|backend| backend.id() == id) {
            return;
        }
        debug!(
            service = %self.service_id,
            backend = id,
            target = %format!("{host}:{port}"),
            "backend added"
        );
        backends.push(Arc::new(HttpBackend::new(
            id, host, port, capacity, alive, client,
        )));
    }

    /// Detach a backend by id; returns true when the service is now empty
    pub async fn remove_backend(&self, id: &str) -> bool {
        let mut backends = self.backends.write().await;
        backends.retain(|backend| backend.id() != id);
        backends.is_empty()
    }

    pub async fn backend_by_id(&self, id: &str) -> Option<Arc<HttpBackend>> {
        self.backends
            .read()
            .await
            .iter()
            .find(|backend| backend.id() == id)
            .cloned()
    }

    pub async fn is_empty(&self) -> bool {
        self.backends.read().await.is_empty()
    }

    pub async fn backend_count(&self) -> usize {
        self.backends.read().await.len()
    }

    pub async fn backends(&self) -> Vec<Arc<HttpBackend>> {
        self.backends.read().await.clone()
    }

    /// Pick a backend with the configured scheduler.
    ///
    /// The returned Arc outlives any concurrent removal, so an in-flight
    /// request never observes a freed backend.
    pub async fn select_backend(&self) -> Option<Arc<HttpBackend>> {
        let backends = self.backends.read().await;
        match self.scheduler {
            SchedulerKind::RoundRobin => round_robin(&backends, &self.cursor),
            SchedulerKind::LeastLoad => least_load(&backends),
            SchedulerKind::Chance => first_available(&backends),
        }
    }

    /// Dispatch one request to a scheduled backend; 503 when none
    pub async fn handle(&self, req: Request<Body>) -> Response {
        match self.select_backend().await {
            Some(backend) => backend.handle(req).await,
            None => (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("No backend available for service {:?}\n", self.service_id),
            )
                .into_response(),
        }
    }
}

/// Advance the cursor and return that backend, available or not. A dead
/// backend earns the caller a 5xx it will retry; the orchestrator's health
/// events are what take it out of rotation.
fn round_robin(
    backends: &[Arc<HttpBackend>],
    cursor: &AtomicUsize,
) -> Option<Arc<HttpBackend>> {
    if backends.is_empty() {
        return None;
    }
    let index = cursor.fetch_add(1, Ordering::Relaxed) % backends.len();
    Some(backends[index].clone())
}

/// Minimum in-flight load among available backends, first occurrence wins
fn least_load(backends: &[Arc<HttpBackend>]) -> Option<Arc<HttpBackend>> {
    let mut best: Option<&Arc<HttpBackend>> = None;
    for backend in backends {
        if !backend.is_available() {
            continue;
        }
        match best {
            Some(current) if backend.current_load() >= current.current_load() => {}
            _ => best = Some(backend),
        }
    }
    best.cloned()
}

fn first_available(backends: &[Arc<HttpBackend>]) -> Option<Arc<HttpBackend>> {
    backends.iter().find(|backend| backend.is_available()).cloned()
}

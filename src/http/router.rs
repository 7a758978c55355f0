//! Per-port HTTP routers
//!
//! A router owns exactly one TCP listener. Construction binds the listener
//! immediately so a bind failure surfaces before the router is registered.
//! Request resolution goes through a selector: per-service-port routers
//! resolve a fixed service id against the live table (so a service that is
//! destroyed and later restored is picked up again), and the vhost router
//! matches the request's Host header across all services.

use super::service::HttpService;
use super::HttpServiceTable;
use crate::error::Result;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::HOST;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// How a router maps an inbound request to a service
#[derive(Debug, Clone)]
pub enum Selector {
    /// Always the service with this id (per-service-port routers)
    Service(String),
    /// The service whose host list matches the request's Host header,
    /// else the service flagged as default vhost
    VirtualHost,
}

/// One listening port of the gateway
pub struct HttpRouter {
    addr: SocketAddr,
    listener: TcpListener,
    selector: Selector,
    services: HttpServiceTable,
}

#[derive(Clone)]
struct RouterState {
    selector: Selector,
    services: HttpServiceTable,
}

impl HttpRouter {
    /// Bind the listener now; an unavailable port is fatal to this router
    pub async fn bind(
        addr: SocketAddr,
        selector: Selector,
        services: HttpServiceTable,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        info!(%addr, ?selector, "http router listening");
        Ok(Self {
            addr,
            listener,
            selector,
            services,
        })
    }

    /// Address the listener actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until the task is aborted; the gateway owns the task handle
    pub async fn serve(self) {
        let state = RouterState {
            selector: self.selector,
            services: self.services,
        };
        let app = axum::Router::new()
            .fallback(route_request)
            .with_state(state);

        if let Err(err) = axum::serve(self.listener, app).await {
            error!(addr = %self.addr, error = %err, "http router terminated");
        }
    }
}

async fn route_request(State(state): State<RouterState>, req: Request<Body>) -> Response {
    let host = request_host(&req);
    match state.resolve(host.as_deref()).await {
        Some(service) => service.handle(req).await,
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!(
                "No service found for request host header {:?}\n",
                host.unwrap_or_default()
            ),
        )
            .into_response(),
    }
}

impl RouterState {
    async fn resolve(&self, host: Option<&str>) -> Option<Arc<HttpService>> {
        let table = self.services.read().await;
        match &self.selector {
            Selector::Service(service_id) => table.get(service_id).cloned(),
            Selector::VirtualHost => {
                let host = host?;
                let bare_host = strip_port(host);
                let mut default = None;
                for service in table.values() {
                    if service
                        .hosts()
                        .iter()
                        .any(|candidate| candidate == host || candidate == bare_host)
                    {
                        return Some(service.clone());
                    }
                    if service.is_default_vhost() && default.is_none() {
                        default = Some(service.clone());
                    }
                }
                default
            }
        }
    }
}

/// Host of the inbound request: the Host header, else the URI authority
/// (HTTP/2 requests carry `:authority` there)
fn request_host(req: &Request<Body>) -> Option<String> {
    req.headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.to_string()))
}

/// `a.example:8080` → `a.example`; IPv6 literals keep their brackets
fn strip_port(host: &str) -> &str {
    if let Some(end) = host.rfind(']') {
        // [::1]:8080
        return &host[..=end];
    }
    match host.rsplit_once(':') {
        Some((bare, port)) if port.chars().all(|c| c.is_ascii_digit()) => bare,
        _ => host,
    }
}

//! TCP data plane
//!
//! Structurally symmetric with the HTTP plane: same event envelopes, same
//! single-writer table, same per-port router pattern. The proxy itself is
//! a plain byte splice.

use crate::error::Result;
use crate::events::SchedulerKind;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// The live TCP service table; single writer, concurrent readers
pub type TcpServiceTable = Arc<RwLock<HashMap<String, Arc<TcpService>>>>;

/// One upstream TCP target
pub struct TcpBackend {
    id: String,
    host: String,
    port: u16,
    capacity: usize,
    current_load: AtomicUsize,
    alive: AtomicBool,
}

impl TcpBackend {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16, capacity: usize, alive: bool) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            capacity,
            current_load: AtomicUsize::new(0),
            alive: AtomicBool::new(alive),
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

    pub fn current_load(&self) -> usize {
        self.current_load.load(Ordering::SeqCst)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn set_alive(&self, alive: bool) {
        let was = self.alive.swap(alive, Ordering::SeqCst);
        if was != alive {
            info!(backend = %self, alive, "tcp backend liveness changed");
        }
    }

    pub fn is_available(&self) -> bool {
        self.is_alive() && (self.capacity == 0 || self.current_load() < self.capacity)
    }

    /// Splice the accepted connection to the upstream target
    pub async fn serve(&self, mut inbound: TcpStream) {
        self.current_load.fetch_add(1, Ordering::SeqCst);
        match TcpStream::connect((self.host.as_str(), self.port)).await {
            Ok(mut upstream) => {
                if let Err(err) = tokio::io::copy_bidirectional(&mut inbound, &mut upstream).await {
                    debug!(backend = %self, error = %err, "tcp splice ended");
                }
            }
            Err(err) => {
                warn!(backend = %self, error = %err, "tcp upstream connect failed");
            }
        }
        self.current_load.fetch_sub(1, Ordering::SeqCst);
    }
}

impl fmt::Display for TcpBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One `<appId>-<portIndex>` TCP service
pub struct TcpService {
    service_id: String,
    service_port: u16,
    scheduler: SchedulerKind,
    /// PROXY-protocol version to speak upstream (0 = off); carried from
    /// the `lb-proxy-protocol` label, not yet acted on by the splice
    proxy_protocol: u8,
    /// Expect PROXY protocol from downstream (`lb-accept-proxy`)
    accept_proxy: bool,
    backends: RwLock<Vec<Arc<TcpBackend>>>,
}

impl TcpService {
    pub fn new(
        service_id: impl Into<String>,
        service_port: u16,
        scheduler: SchedulerKind,
        proxy_protocol: u8,
        accept_proxy: bool,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            service_port,
            scheduler,
            proxy_protocol,
            accept_proxy,
            backends: RwLock::new(Vec::new()),
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn service_port(&self) -> u16 {
        self.service_port
    }

    pub fn scheduler(&self) -> SchedulerKind {
        self.scheduler
    }

    pub fn proxy_protocol(&self) -> u8 {
        self.proxy_protocol
    }

    pub fn accept_proxy(&self) -> bool {
        self.accept_proxy
    }

    pub async fn add_backend(&self, id: &str, host: &str, port: u16, capacity: usize, alive: bool) {
        let mut backends = self.backends.write().await;
        if backends.iter().any(|backend| backend.id() == id) {
            return;
        }
        backends.push(Arc::new(TcpBackend::new(id, host, port, capacity, alive)));
    }

    pub async fn remove_backend(&self, id: &str) -> bool {
        let mut backends = self.backends.write().await;
        backends.retain(|backend| backend.id() != id);
        backends.is_empty()
    }

    pub async fn backend_by_id(&self, id: &str) -> Option<Arc<TcpBackend>> {
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

    pub async fn backends(&self) -> Vec<Arc<TcpBackend>> {
        self.backends.read().await.clone()
    }

    /// First available backend; scheduling beyond that is HTTP-only so far
    pub async fn select_backend(&self) -> Option<Arc<TcpBackend>> {
        self.backends
            .read()
            .await
            .iter()
            .find(|backend| backend.is_available())
            .cloned()
    }

    pub async fn serve_connection(&self, conn: TcpStream) {
        match self.select_backend().await {
            Some(backend) => backend.serve(conn).await,
            None => {
                debug!(service = %self.service_id, "no tcp backend available, dropping connection");
            }
        }
    }
}

/// One listening TCP port; resolves its fixed service id per connection
pub struct TcpRouter {
    addr: SocketAddr,
    listener: TcpListener,
    service_id: String,
    services: TcpServiceTable,
}

impl TcpRouter {
    pub async fn bind(addr: SocketAddr, service_id: String, services: TcpServiceTable) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        info!(%addr, service = %service_id, "tcp router listening");
        Ok(Self {
            addr,
            listener,
            service_id,
            services,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn serve(self) {
        loop {
            let (conn, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(addr = %self.addr, error = %err, "tcp accept failed");
                    continue;
                }
            };

            let service = self.services.read().await.get(&self.service_id).cloned();
            match service {
                Some(service) => {
                    tokio::spawn(async move { service.serve_connection(conn).await });
                }
                None => {
                    debug!(addr = %self.addr, %peer, "no tcp service for connection");
                    drop(conn);
                }
            }
        }
    }
}

//! Gateway core: the single-writer topology loop
//!
//! One task owns every service table and the router set, and is the only
//! code that mutates them; it drains the internal event bus and reacts to
//! each topology delta. Router request tasks read the tables through brief
//! reader locks, so a request may observe a topology that is one event
//! stale, never a torn one.

use crate::config::GatewayConfig;
use crate::events::{EventReceiver, GatewayEvent, SchedulerKind};
use crate::http::{HttpRouter, HttpService, HttpServiceTable, Selector};
use crate::tcp::{TcpRouter, TcpService, TcpServiceTable};
use crate::udp::{UdpService, UdpServiceTable};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// The gateway core; `run` consumes it on the event-loop task
pub struct Gateway {
    config: GatewayConfig,
    events: EventReceiver,
    http_services: HttpServiceTable,
    tcp_services: TcpServiceTable,
    udp_services: UdpServiceTable,
    /// Ports that already have a listening router (HTTP plane)
    http_router_ports: HashSet<u16>,
    tcp_router_ports: HashSet<u16>,
    routers: Vec<RouterHandle>,
    router_addrs: Arc<RwLock<Vec<SocketAddr>>>,
    /// Shared connection pool for every HTTP backend's upstream leg
    upstream_client: reqwest::Client,
    shutdown_tx: broadcast::Sender<()>,
}

/// Read-only view of the gateway shared with the debug endpoint, signal
/// handling, and tests
#[derive(Clone)]
pub struct GatewayHandle {
    http_services: HttpServiceTable,
    tcp_services: TcpServiceTable,
    udp_services: UdpServiceTable,
    router_addrs: Arc<RwLock<Vec<SocketAddr>>>,
    shutdown_tx: broadcast::Sender<()>,
}

struct RouterHandle {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Gateway {
    /// Build a gateway around the receiving half of the event bus
    pub fn new(config: GatewayConfig, events: EventReceiver) -> (Self, GatewayHandle) {
        let http_services: HttpServiceTable = Arc::new(RwLock::new(HashMap::new()));
        let tcp_services: TcpServiceTable = Arc::new(RwLock::new(HashMap::new()));
        let udp_services: UdpServiceTable = Arc::new(RwLock::new(HashMap::new()));
        let router_addrs = Arc::new(RwLock::new(Vec::new()));
        let (shutdown_tx, _) = broadcast::channel(1);

        let handle = GatewayHandle {
            http_services: http_services.clone(),
            tcp_services: tcp_services.clone(),
            udp_services: udp_services.clone(),
            router_addrs: router_addrs.clone(),
            shutdown_tx: shutdown_tx.clone(),
        };

        let gateway = Self {
            config,
            events,
            http_services,
            tcp_services,
            udp_services,
            http_router_ports: HashSet::new(),
            tcp_router_ports: HashSet::new(),
            routers: Vec::new(),
            router_addrs,
            upstream_client: reqwest::Client::new(),
            shutdown_tx,
        };

        (gateway, handle)
    }

    /// Spawn the vhost router and process events until the bus closes or
    /// shutdown is signalled.
    ///
    /// The only error this returns is a failure to bind the vhost router's
    /// listener, which is fatal to the process.
    pub async fn run(mut self) -> crate::error::Result<()> {
        let vhost_router = HttpRouter::bind(
            self.config.vhost_addr(),
            Selector::VirtualHost,
            self.http_services.clone(),
        )
        .await?;
        self.register_http_router(vhost_router).await;

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        debug!("event bus closed, stopping gateway loop");
                        break;
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("gateway shutdown requested");
                    break;
                }
            }
        }

        self.close().await;
        Ok(())
    }

    /// React to one topology delta; the match is exhaustive on purpose
    async fn handle_event(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::RestoreFromSnapshot => {
                // Marker only. The table is not cleared: the adds that
                // follow are idempotent and stale entries age out when
                // their removes arrive.
                info!("restoring topology from orchestrator snapshot");
            }
            GatewayEvent::AddHttpService {
                service_id,
                service_port,
                hosts,
                default_vhost,
                scheduler,
            } => {
                self.add_http_service(service_id, service_port, hosts, default_vhost, scheduler)
                    .await;
            }
            GatewayEvent::AddTcpService {
                service_id,
                service_port,
                scheduler,
                proxy_protocol,
                accept_proxy,
            } => {
                self.add_tcp_service(service_id, service_port, scheduler, proxy_protocol, accept_proxy)
                    .await;
            }
            GatewayEvent::AddUdpService {
                service_id,
                service_port,
                scheduler,
            } => {
                let mut table = self.udp_services.write().await;
                table.entry(service_id.clone()).or_insert_with(|| {
                    info!(service = %service_id, port = service_port, "udp service added");
                    Arc::new(UdpService::new(service_id.clone(), service_port, scheduler))
                });
            }
            GatewayEvent::AddBackend {
                service_id,
                backend_id,
                host,
                port,
                capacity,
                alive,
            } => {
                self.add_backend(&service_id, &backend_id, &host, port, capacity, alive)
                    .await;
            }
            GatewayEvent::RemoveBackend {
                service_id,
                backend_id,
            } => {
                self.remove_backend(&service_id, &backend_id).await;
            }
            GatewayEvent::HealthStatusChanged {
                service_id,
                backend_id,
                alive,
            } => {
                self.health_status_changed(&service_id, &backend_id, alive).await;
            }
            GatewayEvent::Log { message } => {
                info!("{message}");
            }
        }
    }

    async fn add_http_service(
        &mut self,
        service_id: String,
        service_port: u16,
        hosts: Vec<String>,
        default_vhost: bool,
        scheduler: SchedulerKind,
    ) {
        {
            let mut table = self.http_services.write().await;
            if !table.contains_key(&service_id) {
                info!(service = %service_id, port = service_port, ?hosts, %scheduler, "http service added");
                table.insert(
                    service_id.clone(),
                    Arc::new(HttpService::new(
                        service_id.clone(),
                        service_port,
                        hosts,
                        default_vhost,
                        scheduler,
                    )),
                );
            }
        }

        if self.http_router_ports.contains(&service_port) {
            return;
        }

        let addr = SocketAddr::new(self.config.service_ip, service_port);
        match HttpRouter::bind(
            addr,
            Selector::Service(service_id),
            self.http_services.clone(),
        )
        .await
        {
            Ok(router) => {
                self.http_router_ports.insert(service_port);
                self.register_http_router(router).await;
            }
            Err(err) => {
                // Fatal for this router only; the service stays routable
                // through the vhost router.
                error!(%addr, error = %err, "failed to bind service router");
            }
        }
    }

    async fn add_tcp_service(
        &mut self,
        service_id: String,
        service_port: u16,
        scheduler: SchedulerKind,
        proxy_protocol: u8,
        accept_proxy: bool,
    ) {
        {
            let mut table = self.tcp_services.write().await;
            if !table.contains_key(&service_id) {
                info!(service = %service_id, port = service_port, "tcp service added");
                table.insert(
                    service_id.clone(),
                    Arc::new(TcpService::new(
                        service_id.clone(),
                        service_port,
                        scheduler,
                        proxy_protocol,
                        accept_proxy,
                    )),
                );
            }
        }

        if self.tcp_router_ports.contains(&service_port) {
            return;
        }

        let addr = SocketAddr::new(self.config.service_ip, service_port);
        match TcpRouter::bind(addr, service_id, self.tcp_services.clone()).await {
            Ok(router) => {
                self.tcp_router_ports.insert(service_port);
                let addr = router.local_addr();
                self.router_addrs.write().await.push(addr);
                self.routers.push(RouterHandle {
                    addr,
                    task: tokio::spawn(router.serve()),
                });
            }
            Err(err) => {
                error!(%addr, error = %err, "failed to bind tcp router");
            }
        }
    }

    async fn add_backend(
        &mut self,
        service_id: &str,
        backend_id: &str,
        host: &str,
        port: u16,
        capacity: usize,
        alive: bool,
    ) {
        // Guards are dropped before any service call; holding a table
        // lock while taking a service lock is how deadlocks start.
        let http = self.http_services.read().await.get(service_id).cloned();
        if let Some(service) = http {
            service
                .add_backend(
                    backend_id,
                    host,
                    port,
                    capacity,
                    alive,
                    self.upstream_client.clone(),
                )
                .await;
            return;
        }
        let tcp = self.tcp_services.read().await.get(service_id).cloned();
        if let Some(service) = tcp {
            service.add_backend(backend_id, host, port, capacity, alive).await;
            return;
        }
        let udp = self.udp_services.read().await.get(service_id).cloned();
        if let Some(service) = udp {
            service.add_backend(backend_id, host, port, alive).await;
            return;
        }
        info!(service = service_id, backend = backend_id, "add-backend for unknown service, dropped");
    }

    async fn remove_backend(&mut self, service_id: &str, backend_id: &str) {
        let http = self.http_services.read().await.get(service_id).cloned();
        if let Some(service) = http {
            if service.remove_backend(backend_id).await {
                info!(service = service_id, "last backend removed, destroying http service");
                self.http_services.write().await.remove(service_id);
            }
            return;
        }
        let tcp = self.tcp_services.read().await.get(service_id).cloned();
        if let Some(service) = tcp {
            if service.remove_backend(backend_id).await {
                info!(service = service_id, "last backend removed, destroying tcp service");
                self.tcp_services.write().await.remove(service_id);
            }
            return;
        }
        let udp = self.udp_services.read().await.get(service_id).cloned();
        if let Some(service) = udp {
            if service.remove_backend(backend_id).await {
                self.udp_services.write().await.remove(service_id);
            }
            return;
        }
        debug!(service = service_id, backend = backend_id, "remove-backend for unknown service, dropped");
    }

    async fn health_status_changed(&mut self, service_id: &str, backend_id: &str, alive: bool) {
        let http = self.http_services.read().await.get(service_id).cloned();
        if let Some(service) = http {
            match service.backend_by_id(backend_id).await {
                Some(backend) => backend.set_alive(alive),
                None => {
                    info!(service = service_id, backend = backend_id, "health change for unknown backend, dropped")
                }
            }
            return;
        }
        let tcp = self.tcp_services.read().await.get(service_id).cloned();
        if let Some(service) = tcp {
            if let Some(backend) = service.backend_by_id(backend_id).await {
                backend.set_alive(alive);
            }
            return;
        }
        let udp = self.udp_services.read().await.get(service_id).cloned();
        if let Some(service) = udp {
            if let Some(backend) = service.backend_by_id(backend_id).await {
                backend.set_alive(alive);
            }
            return;
        }
        info!(service = service_id, backend = backend_id, "health change for unknown service, dropped");
    }

    async fn register_http_router(&mut self, router: HttpRouter) {
        let addr = router.local_addr();
        self.http_router_ports.insert(addr.port());
        self.router_addrs.write().await.push(addr);
        self.routers.push(RouterHandle {
            addr,
            task: tokio::spawn(router.serve()),
        });
    }

    /// Tear every router down. Listeners close immediately; in-flight
    /// requests are not drained.
    async fn close(&mut self) {
        for router in self.routers.drain(..) {
            debug!(addr = %router.addr, "closing router");
            router.task.abort();
        }
        self.http_router_ports.clear();
        self.tcp_router_ports.clear();
        self.router_addrs.write().await.clear();
    }
}

impl GatewayHandle {
    /// Ask the event loop to stop and close every router
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub fn http_services(&self) -> &HttpServiceTable {
        &self.http_services
    }

    pub fn tcp_services(&self) -> &TcpServiceTable {
        &self.tcp_services
    }

    pub fn udp_services(&self) -> &UdpServiceTable {
        &self.udp_services
    }

    /// Addresses of every live router listener
    pub async fn router_addrs(&self) -> Vec<SocketAddr> {
        self.router_addrs.read().await.clone()
    }

    /// Point-in-time copy of the whole topology, sorted for stable output
    pub async fn snapshot(&self) -> GatewaySnapshot {
        let mut http_services = Vec::new();
        for service in self.http_services.read().await.values() {
            let mut backends = Vec::new();
            for backend in service.backends().await {
                backends.push(BackendSnapshot {
                    backend_id: backend.id().to_string(),
                    host: backend.host().to_string(),
                    port: backend.port(),
                    capacity: backend.capacity(),
                    current_load: backend.current_load(),
                    alive: backend.is_alive(),
                    served_total: backend.served_total(),
                });
            }
            backends.sort_by(|a, b| a.backend_id.cmp(&b.backend_id));
            http_services.push(ServiceSnapshot {
                service_id: service.service_id().to_string(),
                service_port: service.service_port(),
                hosts: service.hosts().to_vec(),
                scheduler: service.scheduler(),
                backends,
            });
        }
        http_services.sort_by(|a, b| a.service_id.cmp(&b.service_id));

        let mut tcp_services = Vec::new();
        for service in self.tcp_services.read().await.values() {
            let mut backends = Vec::new();
            for backend in service.backends().await {
                backends.push(BackendSnapshot {
                    backend_id: backend.id().to_string(),
                    host: backend.host().to_string(),
                    port: backend.port(),
                    capacity: 0,
                    current_load: backend.current_load(),
                    alive: backend.is_alive(),
                    served_total: 0,
                });
            }
            backends.sort_by(|a, b| a.backend_id.cmp(&b.backend_id));
            tcp_services.push(ServiceSnapshot {
                service_id: service.service_id().to_string(),
                service_port: service.service_port(),
                hosts: Vec::new(),
                scheduler: service.scheduler(),
                backends,
            });
        }
        tcp_services.sort_by(|a, b| a.service_id.cmp(&b.service_id));

        let mut udp_services = Vec::new();
        for service in self.udp_services.read().await.values() {
            let mut backends = Vec::new();
            for backend in service.backends().await {
                backends.push(BackendSnapshot {
                    backend_id: backend.id().to_string(),
                    host: backend.host().to_string(),
                    port: backend.port(),
                    capacity: 0,
                    current_load: 0,
                    alive: backend.is_alive(),
                    served_total: 0,
                });
            }
            backends.sort_by(|a, b| a.backend_id.cmp(&b.backend_id));
            udp_services.push(ServiceSnapshot {
                service_id: service.service_id().to_string(),
                service_port: service.service_port(),
                hosts: Vec::new(),
                scheduler: service.scheduler(),
                backends,
            });
        }
        udp_services.sort_by(|a, b| a.service_id.cmp(&b.service_id));

        GatewaySnapshot {
            http_services,
            tcp_services,
            udp_services,
            routers: self.router_addrs().await.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// JSON-serializable dump of the gateway topology
#[derive(Debug, Clone, Serialize)]
pub struct GatewaySnapshot {
    pub http_services: Vec<ServiceSnapshot>,
    pub tcp_services: Vec<ServiceSnapshot>,
    pub udp_services: Vec<ServiceSnapshot>,
    pub routers: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceSnapshot {
    pub service_id: String,
    pub service_port: u16,
    pub hosts: Vec<String>,
    pub scheduler: SchedulerKind,
    pub backends: Vec<BackendSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendSnapshot {
    pub backend_id: String,
    pub host: String,
    pub port: u16,
    pub capacity: usize,
    pub current_load: usize,
    pub alive: bool,
    pub served_total: u64,
}

//! UDP service surface
//!
//! Table entries only: UDP services react to the same add/remove/health
//! envelopes as the other planes, but no datagram forwarding is wired up.

use crate::events::SchedulerKind;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// The live UDP service table
pub type UdpServiceTable = Arc<RwLock<HashMap<String, Arc<UdpService>>>>;

pub struct UdpBackend {
    id: String,
    host: String,
    port: u16,
    alive: AtomicBool,
}

impl UdpBackend {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16, alive: bool) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
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

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }
}

pub struct UdpService {
    service_id: String,
    service_port: u16,
    scheduler: SchedulerKind,
    backends: RwLock<Vec<Arc<UdpBackend>>>,
}

impl UdpService {
    pub fn new(service_id: impl Into<String>, service_port: u16, scheduler: SchedulerKind) -> Self {
        Self {
            service_id: service_id.into(),
            service_port,
            scheduler,
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

    pub async fn add_backend(&self, id: &str, host: &str, port: u16, alive: bool) {
        let mut backends = self.backends.write().await;
        if backends.iter().any(|backend| backend.id() == id) {
            return;
        }
        backends.push(Arc::new(UdpBackend::new(id, host, port, alive)));
    }

    pub async fn remove_backend(&self, id: &str) -> bool {
        let mut backends = self.backends.write().await;
        backends.retain(|backend| backend.id() != id);
        backends.is_empty()
    }

    pub async fn backend_by_id(&self, id: &str) -> Option<Arc<UdpBackend>> {
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

    pub async fn backends(&self) -> Vec<Arc<UdpBackend>> {
        self.backends.read().await.clone()
    }
}

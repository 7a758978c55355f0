//! Gateway configuration
//!
//! Assembled from CLI flags (each with a `PORTICO_*` environment fallback)
//! by the binary; library consumers construct it directly.

use crate::events::SchedulerKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Runtime configuration for the gateway process
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bind IP of the by-vhost HTTP router
    pub http_vhost_ip: IpAddr,
    /// Port of the by-vhost HTTP router
    pub http_vhost_port: u16,
    /// Orchestrator host
    pub marathon_ip: IpAddr,
    /// Orchestrator port
    pub marathon_port: u16,
    /// Bind IP used for per-service-port routers
    pub service_ip: IpAddr,
    /// Debug state-dump port; 0 disables the endpoint
    pub debug_port: u16,
    /// Consume the instance-centric orchestrator event family instead of
    /// the task-centric one
    pub instance_events: bool,
    /// Fixed delay between SSE reconnect attempts
    pub reconnect_delay: Duration,
    /// Scheduler assigned to services whose `lb-scheduler` label is absent
    /// or unrecognized
    pub default_scheduler: SchedulerKind,
}

impl GatewayConfig {
    /// Socket address of the vhost router
    pub fn vhost_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http_vhost_ip, self.http_vhost_port)
    }

    /// Base URL of the orchestrator REST API
    pub fn marathon_base_url(&self) -> String {
        format!("http://{}:{}", self.marathon_ip, self.marathon_port)
    }

    /// URL of the orchestrator SSE endpoint
    pub fn marathon_events_url(&self) -> String {
        format!("{}/v2/events", self.marathon_base_url())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            http_vhost_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            http_vhost_port: 8080,
            marathon_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            marathon_port: 8080,
            service_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            debug_port: 0,
            instance_events: false,
            reconnect_delay: Duration::from_secs(1),
            default_scheduler: SchedulerKind::RoundRobin,
        }
    }
}

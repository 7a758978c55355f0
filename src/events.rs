//! Internal event bus between service discovery and the gateway core
//!
//! Discovery adapters translate orchestrator state into this small, stable
//! vocabulary of topology deltas. The events travel over a single bounded
//! mpsc channel whose only receiver is the gateway event loop; a full
//! channel is backpressure onto the discovery side.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::mpsc;

/// Default capacity of the internal event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Sending half of the internal event bus
pub type EventSender = mpsc::Sender<GatewayEvent>;

/// Receiving half of the internal event bus (owned by the gateway loop)
pub type EventReceiver = mpsc::Receiver<GatewayEvent>;

/// Backend scheduling policy for a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerKind {
    /// Rotate through all backends regardless of availability
    #[default]
    RoundRobin,
    /// Pick the available backend with the fewest in-flight requests
    LeastLoad,
    /// Pick the first available backend
    Chance,
}

impl FromStr for SchedulerKind {
    type Err = UnknownScheduler;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(SchedulerKind::RoundRobin),
            "least-load" => Ok(SchedulerKind::LeastLoad),
            "chance" => Ok(SchedulerKind::Chance),
            other => Err(UnknownScheduler(other.to_string())),
        }
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerKind::RoundRobin => "round-robin",
            SchedulerKind::LeastLoad => "least-load",
            SchedulerKind::Chance => "chance",
        };
        f.write_str(name)
    }
}

/// Error for scheduler names outside the recognized vocabulary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownScheduler(pub String);

impl fmt::Display for UnknownScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown scheduler {:?}", self.0)
    }
}

impl std::error::Error for UnknownScheduler {}

/// Topology delta consumed by the gateway event loop
///
/// The loop is the single writer of the service tables; every variant here
/// is handled by one arm of its exhaustive match.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// Marks the start of a full-state burst after an SSE (re)connect.
    /// The table is not cleared; the adds that follow are idempotent.
    RestoreFromSnapshot,

    /// Ensure an HTTP service exists and its port has a router
    AddHttpService {
        service_id: String,
        service_port: u16,
        hosts: Vec<String>,
        default_vhost: bool,
        scheduler: SchedulerKind,
    },

    /// Ensure a TCP service exists and its port has a router
    AddTcpService {
        service_id: String,
        service_port: u16,
        scheduler: SchedulerKind,
        proxy_protocol: u8,
        accept_proxy: bool,
    },

    /// Ensure a UDP service exists (surface-level, no router is spawned)
    AddUdpService {
        service_id: String,
        service_port: u16,
        scheduler: SchedulerKind,
    },

    /// Attach a backend to a service; deduplicated by backend id
    AddBackend {
        service_id: String,
        backend_id: String,
        host: String,
        port: u16,
        capacity: usize,
        alive: bool,
    },

    /// Detach a backend; a service left empty is removed from the table
    RemoveBackend {
        service_id: String,
        backend_id: String,
    },

    /// Toggle a backend's liveness flag
    HealthStatusChanged {
        service_id: String,
        backend_id: String,
        alive: bool,
    },

    /// Free-form message from a discovery source, emitted at the gateway's
    /// log sink so all output is serialized through the one loop
    Log { message: String },
}

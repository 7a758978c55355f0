//! Portico - Service-Application Gateway
//!
//! A long-running reverse proxy that mirrors the live state of a
//! Marathon-compatible orchestrator (applications, tasks, health) into an
//! internal routing table and forwards client traffic to healthy task
//! instances.
//!
//! # Architecture
//!
//! The state-synchronization and dispatch pipeline:
//! - **sse**: reconnecting SSE client consuming the orchestrator stream
//! - **marathon**: typed wire model and REST client
//! - **discovery**: translates orchestrator events and app snapshots into
//!   the internal event vocabulary
//! - **events**: the bounded single-consumer bus of topology deltas
//! - **gateway**: the single-writer loop that owns the service tables and
//!   spawns per-port routers
//! - **http** / **tcp** / **udp**: the per-protocol data planes
//!
//! # Example
//!
//! ```ignore
//! use portico::{Gateway, GatewayConfig, MarathonDiscovery};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = GatewayConfig::default();
//!     let (tx, rx) = mpsc::channel(portico::events::EVENT_CHANNEL_CAPACITY);
//!
//!     let discovery = MarathonDiscovery::new(&config, tx);
//!     tokio::spawn(discovery.run());
//!
//!     let (gateway, _handle) = Gateway::new(config, rx);
//!     gateway.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod debug; // JSON state dump endpoint
pub mod discovery;
pub mod error;
pub mod events;
pub mod gateway;
pub mod http;
pub mod marathon;
pub mod sse;
pub mod tcp;
pub mod udp;

// Re-export commonly used types
pub use config::GatewayConfig;
pub use discovery::{DiscoveryHandle, MarathonDiscovery};
pub use error::{PorticoError, Result};
pub use events::{EventSender, GatewayEvent, SchedulerKind, EVENT_CHANNEL_CAPACITY};
pub use gateway::{Gateway, GatewayHandle, GatewaySnapshot};
pub use http::{HttpBackend, HttpRouter, HttpService, Selector};
pub use marathon::MarathonClient;
pub use sse::{EventSource, EventSourceHandler};

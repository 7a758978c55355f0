//! Marathon-compatible orchestrator client
//!
//! Typed wire model for the subset of the orchestrator's REST and SSE
//! surfaces the gateway consumes, plus the REST client used to fetch
//! application snapshots.

pub mod app;
pub mod client;
pub mod events;

pub use app::{App, HealthCheck, HealthCheckResult, PortDefinition, Task};
pub use client::MarathonClient;
pub use events::{
    instance_id_to_task_id, AppTerminatedEvent, HealthStatusChangedEvent, InstanceChangedEvent,
    InstanceCondition, InstanceHealthChangedEvent, StatusUpdateEvent, TaskStatus,
};

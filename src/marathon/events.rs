//! Orchestrator SSE event payloads
//!
//! Newer orchestrator versions moved from task-centric to instance-centric
//! events, so both families are decodable here; the discovery adapter
//! decides which family it consumes.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Task status vocabulary of `status_update_event`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "TASK_STAGING")]
    Staging,
    #[serde(rename = "TASK_STARTING")]
    Starting,
    #[serde(rename = "TASK_RUNNING")]
    Running,
    #[serde(rename = "TASK_FINISHED")]
    Finished,
    #[serde(rename = "TASK_FAILED")]
    Failed,
    #[serde(rename = "TASK_KILLING")]
    Killing,
    #[serde(rename = "TASK_KILLED")]
    Killed,
    #[serde(rename = "TASK_LOST")]
    Lost,
}

impl TaskStatus {
    /// Statuses after which the task will not serve traffic again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Finished
                | TaskStatus::Failed
                | TaskStatus::Killing
                | TaskStatus::Killed
                | TaskStatus::Lost
        )
    }
}

/// Instance condition vocabulary of `instance_changed_event`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceCondition {
    Created,
    Running,
    Failed,
    Killing,
    Killed,
    Finished,
}

impl InstanceCondition {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceCondition::Failed
                | InstanceCondition::Killing
                | InstanceCondition::Killed
                | InstanceCondition::Finished
        )
    }
}

/// `status_update_event` payload (task-centric family)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateEvent {
    pub app_id: String,
    pub task_id: String,
    pub task_status: TaskStatus,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub slave_id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// `health_status_changed_event` payload (task-centric family)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatusChangedEvent {
    pub app_id: String,
    pub task_id: String,
    pub alive: bool,
}

/// `instance_changed_event` payload (instance-centric family)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceChangedEvent {
    pub instance_id: String,
    pub condition: InstanceCondition,
    /// The application id
    pub run_spec_id: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// `instance_health_changed_event` payload (instance-centric family)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceHealthChangedEvent {
    pub instance_id: String,
    pub run_spec_id: String,
    pub health: bool,
}

/// `app_terminated_event` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppTerminatedEvent {
    pub app_id: String,
}

static INSTANCE_ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+)\.(instance-|marathon-)([^.]+)$").expect("instance id pattern is valid")
});

/// Translate an instance identifier to its task identifier.
///
/// `app.instance-69ff9b` and `app.marathon-69ff9b` both become
/// `app.69ff9b`; anything that does not match the pattern is returned
/// unchanged.
pub fn instance_id_to_task_id(instance_id: &str) -> String {
    INSTANCE_ID_PATTERN
        .replace(instance_id, "${1}.${3}")
        .into_owned()
}

//! Application and task wire model
//!
//! Decoding is deliberately lenient: every field defaults when absent and
//! unknown fields are ignored, so the gateway keeps working against
//! orchestrator versions that add or drop attributes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One logical service definition in the orchestrator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct App {
    pub id: String,
    pub port_definitions: Vec<PortDefinition>,
    pub health_checks: Vec<HealthCheck>,
    pub container: Container,
    pub tasks: Vec<Task>,
    pub labels: HashMap<String, String>,
}

/// One exposed port of an application, with its routing labels
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PortDefinition {
    pub port: u16,
    pub protocol: String,
    pub name: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthCheck {
    pub protocol: String,
    pub path: String,
    pub port_index: usize,
    pub grace_period_seconds: u64,
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
    pub max_consecutive_failures: u64,
}

/// Latest health verdicts for one task, one entry per configured check
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthCheckResult {
    pub alive: bool,
    pub consecutive_failures: u64,
    pub first_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub instance_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Container {
    pub docker: Option<DockerContainer>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DockerContainer {
    pub image: String,
    pub network: String,
    pub port_mappings: Vec<PortMapping>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
    pub service_port: u16,
    pub protocol: String,
}

/// One running process owned by an application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Task {
    pub id: String,
    pub host: String,
    /// Host ports, indexed the same as the app's port definitions
    pub ports: Vec<u16>,
    pub slave_id: String,
    pub health_check_results: Vec<HealthCheckResult>,
}

impl App {
    /// Find a task by task id, falling back to instance-id lookup.
    ///
    /// Instance-centric events name instances; their health results carry
    /// the instance id, which is the only way back to the task.
    pub fn task_by_id(&self, id: &str) -> Option<&Task> {
        self.tasks
            .iter()
            .find(|task| task.id == id)
            .or_else(|| self.task_by_instance_id(id))
    }

    /// Find the task whose health results mention `instance_id`
    pub fn task_by_instance_id(&self, instance_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| {
            task.health_check_results
                .iter()
                .any(|result| result.instance_id == instance_id)
        })
    }
}

impl Task {
    /// A task is alive iff every health-check result reports alive;
    /// vacuously true when no results have arrived yet.
    pub fn is_alive(&self) -> bool {
        self.health_check_results.iter().all(|result| result.alive)
    }
}

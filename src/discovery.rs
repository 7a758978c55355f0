//! Marathon discovery adapter
//!
//! Owns the SSE event source and translates orchestrator state into the
//! internal event vocabulary. On every (re)connect it re-snapshots all
//! applications; in between it follows one of the two live event families
//! (task-centric or instance-centric, chosen by configuration).
//!
//! Failure policy: the snapshot fetch retries forever, a failed per-event
//! app fetch drops that one event, and malformed payloads are logged and
//! dropped. Nothing here propagates errors upward.

use crate::config::GatewayConfig;
use crate::events::{EventSender, GatewayEvent, SchedulerKind};
use crate::marathon::{
    instance_id_to_task_id, App, AppTerminatedEvent, HealthStatusChangedEvent,
    InstanceChangedEvent, InstanceCondition, InstanceHealthChangedEvent, MarathonClient,
    StatusUpdateEvent, TaskStatus,
};
use crate::sse::{EventSource, EventSourceHandler};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Port-definition labels recognized by the gateway
pub const LB_PROXY_PROTOCOL: &str = "lb-proxy-protocol";
pub const LB_ACCEPT_PROXY: &str = "lb-accept-proxy";
pub const LB_VHOST_HTTP: &str = "lb-vhost";
pub const LB_VHOST_DEFAULT_HTTP: &str = "lb-vhost-default";
pub const LB_VHOST_HTTPS: &str = "lb-vhost-ssl";
pub const LB_VHOST_DEFAULT_HTTPS: &str = "lb-vhost-default-ssl";
pub const LB_CAPACITY: &str = "lb-capacity";
pub const LB_SCHEDULER: &str = "lb-scheduler";

/// Service discovery that mirrors a Marathon-compatible orchestrator
pub struct MarathonDiscovery {
    client: MarathonClient,
    events_url: String,
    events: EventSender,
    /// appId → number of port definitions; lets app-scoped events fan out
    /// to port-indexed service events without re-fetching the app
    ports_cache: HashMap<String, usize>,
    instance_events: bool,
    default_scheduler: SchedulerKind,
    reconnect_delay: Duration,
    shutdown_tx: broadcast::Sender<()>,
}

/// Clonable shutdown signal for a running discovery
#[derive(Clone)]
pub struct DiscoveryHandle {
    shutdown_tx: broadcast::Sender<()>,
}

impl DiscoveryHandle {
    /// Close the event source; `run` returns within one reconnect interval
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl MarathonDiscovery {
    pub fn new(config: &GatewayConfig, events: EventSender) -> Self {
        Self::with_endpoint(config.marathon_base_url(), config, events)
    }

    /// Discovery against an explicit orchestrator base URL (tests point
    /// this at a fake)
    pub fn with_endpoint(
        base_url: impl Into<String>,
        config: &GatewayConfig,
        events: EventSender,
    ) -> Self {
        let base_url = base_url.into();
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            client: MarathonClient::with_base_url(base_url.clone()),
            events_url: format!("{base_url}/v2/events"),
            events,
            ports_cache: HashMap::new(),
            instance_events: config.instance_events,
            default_scheduler: config.default_scheduler,
            reconnect_delay: config.reconnect_delay,
            shutdown_tx,
        }
    }

    pub fn handle(&self) -> DiscoveryHandle {
        DiscoveryHandle {
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    /// Consume the orchestrator event stream until shutdown
    pub async fn run(mut self) {
        self.log("starting".to_string()).await;
        let source = EventSource::new(
            self.events_url.clone(),
            self.reconnect_delay,
            self.shutdown_tx.subscribe(),
        );
        source.run(&mut self).await;
        self.log("stopped".to_string()).await;
    }

    /// Full-state resync: retry the app listing until it succeeds, then
    /// replay every service and backend onto the bus.
    pub async fn refresh_all_apps(&mut self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let apps = loop {
            match self.client.get_apps().await {
                Ok(apps) => break apps,
                Err(err) => {
                    self.log(format!("failed to load all apps: {err}")).await;
                    tokio::select! {
                        _ = shutdown_rx.recv() => return,
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                    }
                }
            }
        };

        self.send(GatewayEvent::RestoreFromSnapshot).await;

        for app in &apps {
            self.ensure_app_is_propagated(app).await;
        }

        for app in &apps {
            for (port_index, def) in app.port_definitions.iter().enumerate() {
                for task in &app.tasks {
                    let Some(&port) = task.ports.get(port_index) else {
                        continue;
                    };
                    self.send(GatewayEvent::AddBackend {
                        service_id: make_service_id(&app.id, port_index),
                        backend_id: task.id.clone(),
                        host: task.host.clone(),
                        port,
                        capacity: capacity_from_labels(&def.labels),
                        alive: task.is_alive(),
                    })
                    .await;
                }
            }
        }
    }

    /// Emit one add-service event per port definition and refresh the
    /// ports cache for this app.
    async fn ensure_app_is_propagated(&mut self, app: &App) {
        self.ports_cache
            .insert(app.id.clone(), app.port_definitions.len());

        for (port_index, def) in app.port_definitions.iter().enumerate() {
            let service_id = make_service_id(&app.id, port_index);
            let scheduler = scheduler_from_labels(&def.labels, self.default_scheduler);

            if def.labels.contains_key(LB_VHOST_HTTPS)
                || def.labels.contains_key(LB_VHOST_DEFAULT_HTTPS)
            {
                debug!(service = %service_id, "ssl vhost labels present, TLS termination not supported");
            }

            match application_protocol(app, port_index).as_str() {
                "http" => {
                    self.send(GatewayEvent::AddHttpService {
                        service_id,
                        service_port: def.port,
                        hosts: split_hosts(def.labels.get(LB_VHOST_HTTP)),
                        default_vhost: bool_label(&def.labels, LB_VHOST_DEFAULT_HTTP),
                        scheduler,
                    })
                    .await;
                }
                "tcp" => {
                    self.send(GatewayEvent::AddTcpService {
                        service_id,
                        service_port: def.port,
                        scheduler,
                        proxy_protocol: proxy_protocol_from_labels(&def.labels),
                        accept_proxy: bool_label(&def.labels, LB_ACCEPT_PROXY),
                    })
                    .await;
                }
                "udp" => {
                    self.send(GatewayEvent::AddUdpService {
                        service_id,
                        service_port: def.port,
                        scheduler,
                    })
                    .await;
                }
                "" => {
                    self.log(format!("no protocol for service {service_id}"))
                        .await;
                }
                other => {
                    self.log(format!(
                        "unhandled protocol {other:?} for service {service_id}"
                    ))
                    .await;
                }
            }
        }
    }

    /// Fetch the app and emit one backend per port for `task_id`
    async fn add_backend(&mut self, app_id: &str, task_id: &str) {
        let app = match self.client.get_app(app_id).await {
            Ok(app) => app,
            Err(err) => {
                self.log(format!(
                    "failed to fetch app {app_id}: {err}; dropping backend add for {task_id}"
                ))
                .await;
                return;
            }
        };
        self.add_backend_from_app(&app, task_id).await;
    }

    async fn add_backend_from_app(&mut self, app: &App, task_id: &str) {
        self.ensure_app_is_propagated(app).await;

        let Some(task) = app.task_by_id(task_id) else {
            self.log(format!("task {task_id} not found in app {}", app.id))
                .await;
            return;
        };

        // No health checks configured means the task serves immediately;
        // with checks configured it must have reported at least once.
        let alive = app.health_checks.is_empty()
            || (!task.health_check_results.is_empty() && task.is_alive());

        let backend_id = task.id.clone();
        let host = task.host.clone();
        let ports = task.ports.clone();

        for (port_index, def) in app.port_definitions.iter().enumerate() {
            let Some(&port) = ports.get(port_index) else {
                continue;
            };
            self.send(GatewayEvent::AddBackend {
                service_id: make_service_id(&app.id, port_index),
                backend_id: backend_id.clone(),
                host: host.clone(),
                port,
                capacity: capacity_from_labels(&def.labels),
                alive,
            })
            .await;
        }
    }

    /// Fan a task removal out across every cached port of the app
    async fn remove_backend(&mut self, app_id: &str, task_id: &str) {
        let port_count = self.ports_cache.get(app_id).copied().unwrap_or(0);
        if port_count == 0 {
            debug!(app = app_id, task = task_id, "remove for unknown app, nothing cached");
        }
        for port_index in 0..port_count {
            self.send(GatewayEvent::RemoveBackend {
                service_id: make_service_id(app_id, port_index),
                backend_id: task_id.to_string(),
            })
            .await;
        }
    }

    async fn status_update_event(&mut self, data: &str) {
        let event: StatusUpdateEvent = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(err) => {
                self.log(format!("failed to decode status_update_event: {err}"))
                    .await;
                self.log(format!("status_update_event payload: {data}")).await;
                return;
            }
        };

        match event.task_status {
            TaskStatus::Running => self.add_backend(&event.app_id, &event.task_id).await,
            status if status.is_terminal() => {
                self.remove_backend(&event.app_id, &event.task_id).await
            }
            _ => {}
        }
    }

    async fn health_status_changed_event(&mut self, data: &str) {
        let event: HealthStatusChangedEvent = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(err) => {
                self.log(format!("failed to decode health_status_changed_event: {err}"))
                    .await;
                return;
            }
        };

        let port_count = self.ports_cache.get(&event.app_id).copied().unwrap_or(0);
        for port_index in 0..port_count {
            self.send(GatewayEvent::HealthStatusChanged {
                service_id: make_service_id(&event.app_id, port_index),
                backend_id: event.task_id.clone(),
                alive: event.alive,
            })
            .await;
        }
    }

    async fn instance_changed_event(&mut self, data: &str) {
        let event: InstanceChangedEvent = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(err) => {
                self.log(format!("failed to decode instance_changed_event: {err}"))
                    .await;
                return;
            }
        };

        let task_id = instance_id_to_task_id(&event.instance_id);
        if event.condition.is_terminal() {
            self.remove_backend(&event.run_spec_id, &task_id).await;
        } else if event.condition == InstanceCondition::Running {
            self.add_backend(&event.run_spec_id, &task_id).await;
        }
    }

    async fn instance_health_changed_event(&mut self, data: &str) {
        let event: InstanceHealthChangedEvent = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(err) => {
                self.log(format!(
                    "failed to decode instance_health_changed_event: {err}"
                ))
                .await;
                return;
            }
        };

        let task_id = instance_id_to_task_id(&event.instance_id);
        let port_count = self.ports_cache.get(&event.run_spec_id).copied().unwrap_or(0);
        for port_index in 0..port_count {
            self.send(GatewayEvent::HealthStatusChanged {
                service_id: make_service_id(&event.run_spec_id, port_index),
                backend_id: task_id.clone(),
                alive: event.health,
            })
            .await;
        }

        if !event.health {
            return;
        }

        // The first successful check is the moment the instance becomes
        // addressable as a task; the deferred backend add happens here,
        // not on instance_changed_event.
        match self.client.get_app(&event.run_spec_id).await {
            Ok(app) => {
                if let Some(task) = app.task_by_instance_id(&event.instance_id) {
                    let first_success = task
                        .health_check_results
                        .iter()
                        .filter(|result| result.instance_id == event.instance_id)
                        .all(|result| result.last_failure.is_none());
                    if first_success {
                        let task_id = task.id.clone();
                        self.add_backend_from_app(&app, &task_id).await;
                    }
                }
            }
            Err(err) => {
                self.log(format!(
                    "failed to fetch app {} after health change: {err}",
                    event.run_spec_id
                ))
                .await;
            }
        }
    }

    async fn app_terminated_event(&mut self, data: &str) {
        let event: AppTerminatedEvent = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(err) => {
                self.log(format!("failed to decode app_terminated_event: {err}"))
                    .await;
                return;
            }
        };

        // Backends drain via the terminal task events; here only the
        // cache entry goes away.
        self.ports_cache.remove(&event.app_id);
        self.log(format!("application {} terminated", event.app_id))
            .await;
    }

    async fn send(&mut self, event: GatewayEvent) {
        if self.events.send(event).await.is_err() {
            warn!("internal event bus closed, dropping event");
        }
    }

    async fn log(&mut self, message: String) {
        let message = format!("marathon({}): {message}", self.events_url);
        self.send(GatewayEvent::Log { message }).await;
    }
}

#[async_trait]
impl EventSourceHandler for MarathonDiscovery {
    async fn on_open(&mut self) {
        self.log("connected".to_string()).await;
        self.refresh_all_apps().await;
    }

    async fn on_error(&mut self, message: &str) {
        self.log(format!("event stream failure: {message}")).await;
    }

    async fn on_event(&mut self, name: &str, data: &str) {
        match name {
            "status_update_event" => {
                if !self.instance_events {
                    self.status_update_event(data).await;
                }
            }
            "health_status_changed_event" => {
                if !self.instance_events {
                    self.health_status_changed_event(data).await;
                }
            }
            "instance_changed_event" => {
                if self.instance_events {
                    self.instance_changed_event(data).await;
                }
            }
            "instance_health_changed_event" => {
                if self.instance_events {
                    self.instance_health_changed_event(data).await;
                }
            }
            "app_terminated_event" => {
                self.app_terminated_event(data).await;
            }
            other => {
                trace!(event = other, data, "unhandled orchestrator event");
            }
        }
    }
}

/// `<appId>-<portIndex>`; app ids containing `/` pass through unchanged
pub fn make_service_id(app_id: &str, port_index: usize) -> String {
    format!("{app_id}-{port_index}")
}

/// Protocol for (app, portIndex): the matching health check decides,
/// otherwise the transport protocol.
pub fn application_protocol(app: &App, port_index: usize) -> String {
    let protocol = health_check_protocol(app, port_index);
    if !protocol.is_empty() {
        return protocol;
    }
    transport_protocol(app, port_index)
}

fn health_check_protocol(app: &App, port_index: usize) -> String {
    for check in &app.health_checks {
        if check.port_index == port_index {
            let protocol = check
                .protocol
                .strip_prefix("MESOS_")
                .unwrap_or(&check.protocol);
            return protocol.to_ascii_lowercase();
        }
    }
    String::new()
}

fn transport_protocol(app: &App, port_index: usize) -> String {
    if let Some(def) = app.port_definitions.get(port_index) {
        return def.protocol.clone(); // already lower-case on the wire
    }

    if let Some(docker) = &app.container.docker {
        if let Some(mapping) = docker.port_mappings.get(port_index) {
            return mapping.protocol.to_ascii_lowercase();
        }
    }

    if !app.port_definitions.is_empty() {
        return "tcp".to_string(); // host networking with exposed ports
    }

    String::new()
}

fn split_hosts(label: Option<&String>) -> Vec<String> {
    label
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|host| !host.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn bool_label(labels: &HashMap<String, String>, key: &str) -> bool {
    labels
        .get(key)
        .map(|value| {
            let value = value.trim().to_ascii_lowercase();
            value == "true" || value == "1" || value == "yes"
        })
        .unwrap_or(false)
}

fn capacity_from_labels(labels: &HashMap<String, String>) -> usize {
    labels
        .get(LB_CAPACITY)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}

fn proxy_protocol_from_labels(labels: &HashMap<String, String>) -> u8 {
    labels
        .get(LB_PROXY_PROTOCOL)
        .and_then(|value| value.trim().parse().ok())
        .filter(|version| *version <= 2)
        .unwrap_or(0)
}

fn scheduler_from_labels(
    labels: &HashMap<String, String>,
    default: SchedulerKind,
) -> SchedulerKind {
    labels
        .get(LB_SCHEDULER)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marathon::{HealthCheck, PortDefinition, Task};
    use tokio::sync::mpsc;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn http_app() -> App {
        App {
            id: "/web".to_string(),
            port_definitions: vec![
                PortDefinition {
                    port: 9000,
                    protocol: "tcp".to_string(),
                    labels: labels(&[
                        (LB_VHOST_HTTP, "web.example, www.example"),
                        (LB_SCHEDULER, "least-load"),
                        (LB_CAPACITY, "8"),
                    ]),
                    ..Default::default()
                },
                PortDefinition {
                    port: 9001,
                    protocol: "tcp".to_string(),
                    ..Default::default()
                },
            ],
            health_checks: vec![HealthCheck {
                protocol: "MESOS_HTTP".to_string(),
                port_index: 0,
                ..Default::default()
            }],
            tasks: vec![Task {
                id: "web.t1".to_string(),
                host: "10.0.0.5".to_string(),
                ports: vec![31000, 31001],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn discovery(events: EventSender) -> MarathonDiscovery {
        let config = GatewayConfig::default();
        MarathonDiscovery::with_endpoint("http://127.0.0.1:1", &config, events)
    }

    fn drain(rx: &mut mpsc::Receiver<GatewayEvent>) -> Vec<GatewayEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_make_service_id_passes_slashes_through() {
        assert_eq!(make_service_id("/prod/web", 0), "/prod/web-0");
        assert_eq!(make_service_id("web", 2), "web-2");
    }

    #[test]
    fn test_application_protocol_prefers_health_check() {
        let app = http_app();
        assert_eq!(application_protocol(&app, 0), "http");
        // Port 1 has no matching health check; its transport protocol wins
        assert_eq!(application_protocol(&app, 1), "tcp");
    }

    #[test]
    fn test_application_protocol_docker_fallback() {
        let mut app = App {
            id: "/bridge".to_string(),
            ..Default::default()
        };
        app.container.docker = Some(crate::marathon::app::DockerContainer {
            port_mappings: vec![crate::marathon::app::PortMapping {
                container_port: 80,
                protocol: "UDP".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        });

        assert_eq!(application_protocol(&app, 0), "udp");
        // Index past every source of protocol information
        assert_eq!(application_protocol(&app, 5), "");
    }

    #[test]
    fn test_label_parsing() {
        let l = labels(&[
            (LB_CAPACITY, "12"),
            (LB_ACCEPT_PROXY, "Yes"),
            (LB_PROXY_PROTOCOL, "2"),
            (LB_SCHEDULER, "chance"),
        ]);

        assert_eq!(capacity_from_labels(&l), 12);
        assert!(bool_label(&l, LB_ACCEPT_PROXY));
        assert_eq!(proxy_protocol_from_labels(&l), 2);
        assert_eq!(
            scheduler_from_labels(&l, SchedulerKind::RoundRobin),
            SchedulerKind::Chance
        );

        let bad = labels(&[
            (LB_CAPACITY, "minus-one"),
            (LB_PROXY_PROTOCOL, "7"),
            (LB_SCHEDULER, "weighted"),
        ]);
        assert_eq!(capacity_from_labels(&bad), 0);
        assert_eq!(proxy_protocol_from_labels(&bad), 0);
        assert_eq!(
            scheduler_from_labels(&bad, SchedulerKind::LeastLoad),
            SchedulerKind::LeastLoad
        );
        assert!(!bool_label(&bad, LB_ACCEPT_PROXY));
    }

    #[test]
    fn test_split_hosts() {
        let binding = "a.example, b.example,,c.example ".to_string();
        assert_eq!(
            split_hosts(Some(&binding)),
            vec!["a.example", "b.example", "c.example"]
        );
        assert!(split_hosts(None).is_empty());
        let empty = String::new();
        assert!(split_hosts(Some(&empty)).is_empty());
    }

    #[tokio::test]
    async fn test_ensure_app_propagation_fans_out_per_port() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut discovery = discovery(tx);

        discovery.ensure_app_is_propagated(&http_app()).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        match &events[0] {
            GatewayEvent::AddHttpService {
                service_id,
                service_port,
                hosts,
                scheduler,
                ..
            } => {
                assert_eq!(service_id, "/web-0");
                assert_eq!(*service_port, 9000);
                assert_eq!(hosts, &["web.example", "www.example"]);
                assert_eq!(*scheduler, SchedulerKind::LeastLoad);
            }
            other => panic!("expected AddHttpService, got {other:?}"),
        }
        // Port 1 has no health check: transport protocol tcp
        assert!(matches!(
            &events[1],
            GatewayEvent::AddTcpService { service_id, service_port, .. }
                if service_id == "/web-1" && *service_port == 9001
        ));
    }

    #[tokio::test]
    async fn test_remove_backend_fans_out_over_cached_ports() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut discovery = discovery(tx);

        discovery.ensure_app_is_propagated(&http_app()).await;
        drain(&mut rx);

        discovery.remove_backend("/web", "web.t1").await;
        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                GatewayEvent::RemoveBackend {
                    service_id: "/web-0".to_string(),
                    backend_id: "web.t1".to_string(),
                },
                GatewayEvent::RemoveBackend {
                    service_id: "/web-1".to_string(),
                    backend_id: "web.t1".to_string(),
                },
            ]
        );

        // Unknown app: nothing cached, nothing emitted
        discovery.remove_backend("/ghost", "t9").await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_health_status_change_fans_out() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut discovery = discovery(tx);

        discovery.ensure_app_is_propagated(&http_app()).await;
        drain(&mut rx);

        discovery
            .on_event(
                "health_status_changed_event",
                r#"{"appId": "/web", "taskId": "web.t1", "alive": false}"#,
            )
            .await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            GatewayEvent::HealthStatusChanged { service_id, alive: false, .. }
                if service_id == "/web-0"
        ));
    }

    #[tokio::test]
    async fn test_decode_errors_log_and_drop() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut discovery = discovery(tx);

        discovery
            .on_event("status_update_event", "{not json at all")
            .await;

        let events = drain(&mut rx);
        assert!(!events.is_empty());
        assert!(events
            .iter()
            .all(|event| matches!(event, GatewayEvent::Log { .. })));
    }

    #[tokio::test]
    async fn test_event_family_selection() {
        let (tx, mut rx) = mpsc::channel(64);
        let config = GatewayConfig {
            instance_events: true,
            ..GatewayConfig::default()
        };
        let mut discovery =
            MarathonDiscovery::with_endpoint("http://127.0.0.1:1", &config, tx);

        discovery.ensure_app_is_propagated(&http_app()).await;
        drain(&mut rx);

        // Task-centric events are ignored in instance mode, silently
        discovery
            .on_event(
                "health_status_changed_event",
                r#"{"appId": "/web", "taskId": "web.t1", "alive": false}"#,
            )
            .await;
        assert!(drain(&mut rx).is_empty());

        // Instance-centric health events fan out, with id translation
        discovery
            .on_event(
                "instance_health_changed_event",
                r#"{"instanceId": "web.instance-t1", "runSpecId": "/web", "health": false}"#,
            )
            .await;
        let events = drain(&mut rx);
        assert!(matches!(
            &events[0],
            GatewayEvent::HealthStatusChanged { backend_id, alive: false, .. }
                if backend_id == "web.t1"
        ));
    }

    #[tokio::test]
    async fn test_terminal_status_update_removes_backends() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut discovery = discovery(tx);

        discovery.ensure_app_is_propagated(&http_app()).await;
        drain(&mut rx);

        discovery
            .on_event(
                "status_update_event",
                r#"{"appId": "/web", "taskId": "web.t1", "taskStatus": "TASK_FAILED"}"#,
            )
            .await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|event| matches!(event, GatewayEvent::RemoveBackend { .. })));
    }

    #[tokio::test]
    async fn test_app_terminated_clears_cache() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut discovery = discovery(tx);

        discovery.ensure_app_is_propagated(&http_app()).await;
        drain(&mut rx);

        discovery
            .on_event("app_terminated_event", r#"{"appId": "/web"}"#)
            .await;
        drain(&mut rx);

        discovery.remove_backend("/web", "web.t1").await;
        assert!(drain(&mut rx).is_empty());
    }
}

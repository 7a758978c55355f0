//! Common test utilities: ephemeral gateways, stub upstreams, and a fake
//! orchestrator speaking the REST + SSE surface the gateway consumes.

#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::header::HeaderMap;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use portico::events::EVENT_CHANNEL_CAPACITY;
use portico::marathon::App;
use portico::{EventSender, Gateway, GatewayConfig, GatewayHandle};
use serde_json::json;
use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Reserve a free localhost port by binding and immediately releasing it
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("ephemeral bind");
    listener.local_addr().expect("local addr").port()
}

/// Localhost gateway with an ephemeral vhost port
pub fn test_config(vhost_port: u16) -> GatewayConfig {
    GatewayConfig {
        http_vhost_ip: Ipv4Addr::LOCALHOST.into(),
        http_vhost_port: vhost_port,
        service_ip: Ipv4Addr::LOCALHOST.into(),
        reconnect_delay: Duration::from_millis(100),
        ..GatewayConfig::default()
    }
}

/// Spawn a gateway loop; returns the bus sender, the handle, and the vhost
/// router address
pub async fn spawn_gateway(config: GatewayConfig) -> (EventSender, GatewayHandle, SocketAddr) {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (gateway, handle) = Gateway::new(config, rx);
    tokio::spawn(gateway.run());

    let vhost_addr = wait_for(Duration::from_secs(2), || {
        let handle = handle.clone();
        async move { handle.router_addrs().await.first().copied() }
    })
    .await
    .expect("vhost router never came up");

    (tx, handle, vhost_addr)
}

/// Poll an async probe until it yields Some, or give up
pub async fn wait_for<T, F, Fut>(timeout: Duration, mut probe: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = probe().await {
            return Some(value);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Minimal upstream that identifies itself in the response body and echoes
/// the Host header it saw
pub async fn spawn_upstream(tag: &'static str) -> SocketAddr {
    let app = Router::new().fallback(move |headers: HeaderMap| async move {
        let host = headers
            .get("host")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        ([("x-seen-host", host)], format!("upstream:{tag}"))
    });

    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("upstream bind");
    let addr = listener.local_addr().expect("upstream addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// In-memory orchestrator stub: serves `/v2/apps`, `/v2/apps/<id>`, and a
/// live `/v2/events` SSE stream fed through [`FakeOrchestrator::emit`].
#[derive(Clone)]
pub struct FakeOrchestrator {
    pub base_url: String,
    apps: Arc<RwLock<Vec<App>>>,
    events_tx: broadcast::Sender<(String, String)>,
}

#[derive(Clone)]
struct OrchestratorState {
    apps: Arc<RwLock<Vec<App>>>,
    events_tx: broadcast::Sender<(String, String)>,
}

impl FakeOrchestrator {
    pub async fn spawn(apps: Vec<App>) -> Self {
        let apps = Arc::new(RwLock::new(apps));
        let (events_tx, _) = broadcast::channel(64);

        let state = OrchestratorState {
            apps: apps.clone(),
            events_tx: events_tx.clone(),
        };

        let app = Router::new()
            .route("/v2/apps", get(list_apps))
            .route("/v2/apps/*app_id", get(get_app))
            .route("/v2/events", get(event_stream))
            .with_state(state);

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("orchestrator bind");
        let addr = listener.local_addr().expect("orchestrator addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{addr}"),
            apps,
            events_tx,
        }
    }

    /// Replace the app listing served to snapshot fetches
    pub async fn set_apps(&self, apps: Vec<App>) {
        *self.apps.write().await = apps;
    }

    /// Push one named event to every connected SSE subscriber
    pub fn emit(&self, event: &str, data: serde_json::Value) {
        let _ = self
            .events_tx
            .send((event.to_string(), data.to_string()));
    }

    pub fn subscriber_count(&self) -> usize {
        self.events_tx.receiver_count()
    }
}

async fn list_apps(State(state): State<OrchestratorState>) -> impl IntoResponse {
    let apps = state.apps.read().await.clone();
    Json(json!({ "apps": apps }))
}

async fn get_app(
    State(state): State<OrchestratorState>,
    Path(app_id): Path<String>,
) -> impl IntoResponse {
    let wanted = format!("/{app_id}");
    let apps = state.apps.read().await;
    match apps.iter().find(|app| app.id == wanted) {
        Some(app) => Json(json!({ "app": app })).into_response(),
        None => (
            axum::http::StatusCode::NOT_FOUND,
            format!("App '/{app_id}' does not exist"),
        )
            .into_response(),
    }
}

async fn event_stream(
    State(state): State<OrchestratorState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.events_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| match item {
        Ok((event, data)) => Some(Ok(SseEvent::default().event(event).data(data))),
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

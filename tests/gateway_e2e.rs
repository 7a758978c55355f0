//! End-to-end tests for the gateway core and HTTP data plane
//!
//! Each test drives the event loop over the real bus and talks to the
//! routers over real sockets.

mod common;

use common::{free_port, spawn_gateway, spawn_upstream, test_config, wait_for};
use portico::{GatewayEvent, SchedulerKind};
use reqwest::header::HOST;
use std::time::Duration;

fn add_http_service(id: &str, port: u16, hosts: &[&str], scheduler: SchedulerKind) -> GatewayEvent {
    GatewayEvent::AddHttpService {
        service_id: id.to_string(),
        service_port: port,
        hosts: hosts.iter().map(|h| h.to_string()).collect(),
        default_vhost: false,
        scheduler,
    }
}

fn add_backend(service: &str, backend: &str, port: u16, alive: bool) -> GatewayEvent {
    GatewayEvent::AddBackend {
        service_id: service.to_string(),
        backend_id: backend.to_string(),
        host: "127.0.0.1".to_string(),
        port,
        capacity: 0,
        alive,
    }
}

/// Service birth: add-service spawns a listening router, add-backend makes
/// it proxy, and the response carries a Via header.
#[tokio::test]
async fn test_service_birth() {
    let upstream = spawn_upstream("birth").await;
    let (tx, _handle, _vhost) = spawn_gateway(test_config(0)).await;

    let service_port = free_port().await;
    tx.send(add_http_service(
        "/app-0",
        service_port,
        &["a.example"],
        SchedulerKind::RoundRobin,
    ))
    .await
    .unwrap();
    tx.send(add_backend("/app-0", "t1", upstream.port(), true))
        .await
        .unwrap();

    let client = reqwest::Client::new();
    let response = wait_for(Duration::from_secs(3), || {
        let client = client.clone();
        async move {
            client
                .get(format!("http://127.0.0.1:{service_port}/"))
                .send()
                .await
                .ok()
        }
    })
    .await
    .expect("per-service router never answered");

    assert_eq!(response.status(), 200);
    let via = response
        .headers()
        .get("via")
        .expect("response must carry a Via header")
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(via, "1.1 portico");
    assert_eq!(response.text().await.unwrap(), "upstream:birth");
}

/// Vhost routing: the Host header picks the service; an unknown host gets
/// a 503 naming itself.
#[tokio::test]
async fn test_vhost_routing() {
    let upstream_a = spawn_upstream("a").await;
    let upstream_b = spawn_upstream("b").await;
    let (tx, _handle, vhost_addr) = spawn_gateway(test_config(0)).await;

    tx.send(add_http_service("/a-0", 0, &["a.example"], SchedulerKind::RoundRobin))
        .await
        .unwrap();
    tx.send(add_http_service("/b-0", 0, &["b.example"], SchedulerKind::RoundRobin))
        .await
        .unwrap();
    tx.send(add_backend("/a-0", "ta", upstream_a.port(), true))
        .await
        .unwrap();
    tx.send(add_backend("/b-0", "tb", upstream_b.port(), true))
        .await
        .unwrap();

    let client = reqwest::Client::new();
    let url = format!("http://{vhost_addr}/");

    let b_body = wait_for(Duration::from_secs(3), || {
        let client = client.clone();
        let url = url.clone();
        async move {
            let response = client.get(&url).header(HOST, "b.example").send().await.ok()?;
            if response.status() == 200 {
                response.text().await.ok()
            } else {
                None
            }
        }
    })
    .await
    .expect("vhost router never matched b.example");
    assert_eq!(b_body, "upstream:b");

    let a_response = client
        .get(&url)
        .header(HOST, "a.example")
        .send()
        .await
        .unwrap();
    assert_eq!(a_response.text().await.unwrap(), "upstream:a");

    let miss = client
        .get(&url)
        .header(HOST, "c.example")
        .send()
        .await
        .unwrap();
    assert_eq!(miss.status(), 503);
    let body = miss.text().await.unwrap();
    assert!(body.contains("c.example"), "503 body should name the host: {body}");
}

/// Round-robin cycles backends in insertion order
#[tokio::test]
async fn test_round_robin_fairness() {
    let upstreams = [
        spawn_upstream("x").await,
        spawn_upstream("y").await,
        spawn_upstream("z").await,
    ];
    let (tx, handle, vhost_addr) = spawn_gateway(test_config(0)).await;

    tx.send(add_http_service("/rr-0", 0, &["rr.example"], SchedulerKind::RoundRobin))
        .await
        .unwrap();
    for (index, upstream) in upstreams.iter().enumerate() {
        tx.send(add_backend("/rr-0", &format!("t{index}"), upstream.port(), true))
            .await
            .unwrap();
    }

    // No requests before all three backends are in place: every request
    // advances the round-robin cursor.
    wait_for(Duration::from_secs(3), || {
        let handle = handle.clone();
        async move {
            let snapshot = handle.snapshot().await;
            let service = snapshot
                .http_services
                .iter()
                .find(|service| service.service_id == "/rr-0")?;
            (service.backends.len() == 3).then_some(())
        }
    })
    .await
    .expect("backends never settled");

    let client = reqwest::Client::new();
    let url = format!("http://{vhost_addr}/");

    let mut bodies = Vec::new();
    for _ in 0..3 {
        let response = client
            .get(&url)
            .header(HOST, "rr.example")
            .send()
            .await
            .unwrap();
        bodies.push(response.text().await.unwrap());
    }
    assert_eq!(bodies, ["upstream:x", "upstream:y", "upstream:z"]);
}

/// Health toggling: round-robin keeps dispatching to a dead backend (the
/// caller sees the 5xx), least-load refuses with 503.
#[tokio::test]
async fn test_health_toggle_under_both_schedulers() {
    let (tx, handle, vhost_addr) = spawn_gateway(test_config(0)).await;

    // Backend ports nothing listens on: a request that reaches the
    // backend fails upstream with 502.
    let dead_port = free_port().await;

    tx.send(add_http_service("/rr-0", 0, &["rr.example"], SchedulerKind::RoundRobin))
        .await
        .unwrap();
    tx.send(add_backend("/rr-0", "t1", dead_port, true)).await.unwrap();
    tx.send(add_http_service("/ll-0", 0, &["ll.example"], SchedulerKind::LeastLoad))
        .await
        .unwrap();
    tx.send(add_backend("/ll-0", "t1", dead_port, true)).await.unwrap();

    tx.send(GatewayEvent::HealthStatusChanged {
        service_id: "/rr-0".to_string(),
        backend_id: "t1".to_string(),
        alive: false,
    })
    .await
    .unwrap();
    tx.send(GatewayEvent::HealthStatusChanged {
        service_id: "/ll-0".to_string(),
        backend_id: "t1".to_string(),
        alive: false,
    })
    .await
    .unwrap();

    // Wait until the health change landed
    wait_for(Duration::from_secs(3), || {
        let handle = handle.clone();
        async move {
            let table = handle.http_services().read().await;
            let service = table.get("/rr-0")?.clone();
            drop(table);
            let backend = service.backend_by_id("t1").await?;
            (!backend.is_alive()).then_some(())
        }
    })
    .await
    .expect("health change never applied");

    let client = reqwest::Client::new();
    let url = format!("http://{vhost_addr}/");

    // Round-robin still selects the dead backend: 502 from the failed
    // upstream hop, not the router's no-service 503
    let rr = client
        .get(&url)
        .header(HOST, "rr.example")
        .send()
        .await
        .unwrap();
    assert_eq!(rr.status(), 502);

    // Least-load skips it: no backend available
    let ll = client
        .get(&url)
        .header(HOST, "ll.example")
        .send()
        .await
        .unwrap();
    assert_eq!(ll.status(), 503);
    assert!(ll.text().await.unwrap().contains("/ll-0"));

    // Dispatch to the dead backend still counted
    let snapshot = handle.snapshot().await;
    let rr_service = snapshot
        .http_services
        .iter()
        .find(|service| service.service_id == "/rr-0")
        .unwrap();
    assert_eq!(rr_service.backends[0].served_total, 1);
}

/// Least-load picks the emptier live backend once loads diverge
#[tokio::test]
async fn test_least_load_prefers_idle_backend() {
    let busy = spawn_upstream("busy").await;
    let idle = spawn_upstream("idle").await;
    let (tx, handle, vhost_addr) = spawn_gateway(test_config(0)).await;

    tx.send(add_http_service("/ll-0", 0, &["ll.example"], SchedulerKind::LeastLoad))
        .await
        .unwrap();
    tx.send(add_backend("/ll-0", "busy", busy.port(), true))
        .await
        .unwrap();
    tx.send(add_backend("/ll-0", "idle", idle.port(), true))
        .await
        .unwrap();

    wait_for(Duration::from_secs(3), || {
        let handle = handle.clone();
        async move {
            let snapshot = handle.snapshot().await;
            let service = snapshot
                .http_services
                .iter()
                .find(|service| service.service_id == "/ll-0")?;
            (service.backends.len() == 2).then_some(())
        }
    })
    .await
    .expect("backends never settled");

    let client = reqwest::Client::new();
    let url = format!("http://{vhost_addr}/");

    // Equal load: first backend wins the tie
    let first = client
        .get(&url)
        .header(HOST, "ll.example")
        .send()
        .await
        .unwrap();
    assert_eq!(first.text().await.unwrap(), "upstream:busy");
}

/// The per-service router keeps its listener when the service dies, and
/// serves again after the service is restored.
#[tokio::test]
async fn test_router_survives_service_lifecycle() {
    let upstream = spawn_upstream("alpha").await;
    let (tx, _handle, _vhost) = spawn_gateway(test_config(0)).await;

    let service_port = free_port().await;
    tx.send(add_http_service("/app-0", service_port, &[], SchedulerKind::RoundRobin))
        .await
        .unwrap();
    tx.send(add_backend("/app-0", "t1", upstream.port(), true))
        .await
        .unwrap();

    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{service_port}/");

    wait_for(Duration::from_secs(3), || {
        let client = client.clone();
        let url = url.clone();
        async move {
            let response = client.get(&url).send().await.ok()?;
            (response.status() == 200).then_some(())
        }
    })
    .await
    .expect("service never answered");

    // Remove the only backend: service is destroyed, listener is not
    tx.send(GatewayEvent::RemoveBackend {
        service_id: "/app-0".to_string(),
        backend_id: "t1".to_string(),
    })
    .await
    .unwrap();

    wait_for(Duration::from_secs(3), || {
        let client = client.clone();
        let url = url.clone();
        async move {
            let response = client.get(&url).send().await.ok()?;
            (response.status() == 503).then_some(())
        }
    })
    .await
    .expect("router should answer 503 once the service is gone");

    // Restoration: same id, same port, no new router needed
    tx.send(add_http_service("/app-0", service_port, &[], SchedulerKind::RoundRobin))
        .await
        .unwrap();
    tx.send(add_backend("/app-0", "t2", upstream.port(), true))
        .await
        .unwrap();

    let body = wait_for(Duration::from_secs(3), || {
        let client = client.clone();
        let url = url.clone();
        async move {
            let response = client.get(&url).send().await.ok()?;
            if response.status() == 200 {
                response.text().await.ok()
            } else {
                None
            }
        }
    })
    .await
    .expect("restored service never answered");
    assert_eq!(body, "upstream:alpha");
}

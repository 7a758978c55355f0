//! Debug state-dump endpoint
//!
//! Enabled by `--debug-port`; serves the full topology snapshot as JSON on
//! `GET /`. Loopback only.

use crate::error::Result;
use crate::gateway::{GatewayHandle, GatewaySnapshot};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Serve the debug endpoint until the task is dropped
pub async fn serve(port: u16, gateway: GatewayHandle) -> Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "debug endpoint listening");

    let app = Router::new()
        .route("/", get(dump))
        .with_state(gateway)
        .layer(TraceLayer::new_for_http());

    axum::serve(listener, app).await?;
    Ok(())
}

async fn dump(State(gateway): State<GatewayHandle>) -> Json<GatewaySnapshot> {
    Json(gateway.snapshot().await)
}

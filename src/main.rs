//! Portico - Service-Application Gateway
//!
//! Entry point: parses flags, wires the discovery adapter to the gateway
//! core over the internal event bus, and runs until interrupted.

use clap::Parser;
use portico::{
    debug, events::EVENT_CHANNEL_CAPACITY, Gateway, GatewayConfig, MarathonDiscovery,
};
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Portico CLI arguments
#[derive(Parser)]
#[command(name = "portico")]
#[command(about = "Service-application gateway: an orchestrator-driven reverse proxy", long_about = None)]
#[command(version)]
struct Cli {
    /// Bind IP of the by-vhost HTTP router
    #[arg(long, default_value = "0.0.0.0", env = "PORTICO_HTTP_VHOST_IP")]
    http_vhost_ip: IpAddr,

    /// Port of the by-vhost HTTP router
    #[arg(long, default_value = "8080", env = "PORTICO_HTTP_VHOST_PORT")]
    http_vhost_port: u16,

    /// Orchestrator host
    #[arg(long, default_value = "127.0.0.1", env = "PORTICO_MARATHON_IP")]
    marathon_ip: IpAddr,

    /// Orchestrator port
    #[arg(long, default_value = "8080", env = "PORTICO_MARATHON_PORT")]
    marathon_port: u16,

    /// Bind IP used for per-service-port routers
    #[arg(long, default_value = "0.0.0.0", env = "PORTICO_SERVICE_IP")]
    service_ip: IpAddr,

    /// Expose a JSON dump of gateway state on this port (0 disables)
    #[arg(long, default_value = "0", env = "PORTICO_DEBUG_PORT")]
    debug_port: u16,

    /// Consume the instance-centric orchestrator event family
    #[arg(long, env = "PORTICO_INSTANCE_EVENTS")]
    instance_events: bool,

    /// Delay between SSE reconnect attempts, in seconds
    #[arg(long, default_value = "1", env = "PORTICO_RECONNECT_DELAY")]
    reconnect_delay: u64,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", env = "PORTICO_LOG_LEVEL")]
    log_level: String,
}

impl Cli {
    fn into_config(self) -> GatewayConfig {
        GatewayConfig {
            http_vhost_ip: self.http_vhost_ip,
            http_vhost_port: self.http_vhost_port,
            marathon_ip: self.marathon_ip,
            marathon_port: self.marathon_port,
            service_ip: self.service_ip,
            debug_port: self.debug_port,
            instance_events: self.instance_events,
            reconnect_delay: Duration::from_secs(self.reconnect_delay.max(1)),
            ..GatewayConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = cli.into_config();
    info!(
        orchestrator = %config.marathon_base_url(),
        vhost = %config.vhost_addr(),
        "starting portico"
    );

    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let discovery = MarathonDiscovery::new(&config, events_tx);
    let discovery_handle = discovery.handle();
    tokio::spawn(discovery.run());

    let (gateway, gateway_handle) = Gateway::new(config.clone(), events_rx);

    if config.debug_port != 0 {
        let debug_handle = gateway_handle.clone();
        let debug_port = config.debug_port;
        tokio::spawn(async move {
            if let Err(err) = debug::serve(debug_port, debug_handle).await {
                warn!(error = %err, "debug endpoint failed");
            }
        });
    }

    tokio::select! {
        result = gateway.run() => {
            if let Err(err) = &result {
                error!(error = %err, "gateway terminated");
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            discovery_handle.shutdown();
            gateway_handle.shutdown();
        }
    }

    Ok(())
}

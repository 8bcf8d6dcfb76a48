//! hubward gateway
//!
//! The gateway is the tunneling entry point for device traffic. It
//! accepts HTTP CONNECT tunnels with optional Basic credentials, sniffs
//! plaintext MQTT handshakes to route each device to its hub, forwards
//! MQTT-over-TLS bytes to a fixed hub without terminating TLS, and
//! serves health, stats, and a live event stream on a status port.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hubward_gateway::broadcast::EventBroadcaster;
use hubward_gateway::config::Config;
use hubward_gateway::proxy::{
    GatewayShared, GatewayStats, ListenerKind, ListenerSettings, RouteSettings, RouteTable,
    SessionRegistry, TunnelListener,
};
use hubward_gateway::status::{self, StatusState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to HUBWARD_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting hubward gateway");
    info!(
        connect_listen = %config.connect_listen,
        plain_listen = %config.plain_listen,
        tls_listen = %config.tls_listen,
        status_listen = %config.status_listen,
        hub_domain_suffix = %config.hub_domain_suffix,
        tls_upstream = %format!("{}:{}", config.tls_upstream_host, config.tls_upstream_port),
        auth_enabled = config.proxy_credentials.is_some(),
        "Configuration loaded"
    );

    let stats = Arc::new(GatewayStats::new());
    let registry = Arc::new(SessionRegistry::new(Arc::clone(&stats)));
    let router = Arc::new(RouteTable::new(RouteSettings {
        tls_upstream_host: config.tls_upstream_host.clone(),
        tls_upstream_port: config.tls_upstream_port,
        plain_upstream_port: config.plain_upstream_port,
    }));
    let events = EventBroadcaster::new(config.event_buffer);

    let shared = GatewayShared {
        registry: Arc::clone(&registry),
        router,
        events: events.clone(),
    };

    // Bind every tunnel listener before serving anything; a port that
    // cannot be bound is a startup failure.
    let mut listeners = Vec::new();
    for kind in [
        ListenerKind::HttpConnect,
        ListenerKind::Plain,
        ListenerKind::TlsPassthrough,
    ] {
        let settings = ListenerSettings::from_config(kind, &config);
        let bind_addr = settings.bind_addr;
        match TunnelListener::bind(settings, shared.clone()).await {
            Ok(listener) => listeners.push(Arc::new(listener)),
            Err(e) => {
                error!(bind_addr = %bind_addr, error = %e, "Failed to bind tunnel listener");
                return Err(e.into());
            }
        }
    }

    let status_listener = match tokio::net::TcpListener::bind(config.status_listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(bind_addr = %config.status_listen, error = %e, "Failed to bind status server");
            return Err(e.into());
        }
    };

    for listener in listeners {
        tokio::spawn(listener.run());
    }

    let status_app = status::routes().with_state(StatusState { registry, events });
    info!(bind_addr = %config.status_listen, "Status server listening");
    let status_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(status_listener, status_app).await {
            error!(error = %e, "Status server error");
        }
    });

    // Run until interrupted.
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, stopping");
    status_handle.abort();

    Ok(())
}

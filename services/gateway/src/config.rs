//! Gateway configuration from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Default listen address for the HTTP CONNECT tunnel port.
pub const DEFAULT_CONNECT_LISTEN: &str = "0.0.0.0:8888";

/// Default listen address for the plaintext MQTT port.
pub const DEFAULT_PLAIN_LISTEN: &str = "0.0.0.0:1883";

/// Default listen address for the TLS passthrough port.
pub const DEFAULT_TLS_LISTEN: &str = "0.0.0.0:8883";

/// Default listen address for the status HTTP surface.
pub const DEFAULT_STATUS_LISTEN: &str = "127.0.0.1:8081";

/// Default upstream port for TLS passthrough.
pub const DEFAULT_TLS_UPSTREAM_PORT: u16 = 8883;

/// Default upstream port for sniffed plaintext sessions.
pub const DEFAULT_PLAIN_UPSTREAM_PORT: u16 = 1883;

/// Default upstream dial timeout in milliseconds.
pub const DEFAULT_DIAL_TIMEOUT_MS: u64 = 10_000;

/// Default handshake sniff timeout in milliseconds.
pub const DEFAULT_SNIFF_TIMEOUT_MS: u64 = 5_000;

/// Default cap on bytes buffered while sniffing a handshake.
pub const DEFAULT_SNIFF_MAX_BYTES: usize = 8192;

/// Default maximum concurrent connections per listener.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10_000;

/// Default event broadcast buffer capacity (frames).
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Credentials required on the CONNECT tunnel port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address for the HTTP CONNECT tunnel port.
    pub connect_listen: SocketAddr,
    /// Listen address for the plaintext MQTT port.
    pub plain_listen: SocketAddr,
    /// Listen address for the TLS passthrough port.
    pub tls_listen: SocketAddr,
    /// Listen address for the status HTTP surface.
    pub status_listen: SocketAddr,
    /// Hub domain suffix used to derive hostnames from sniffed handshakes.
    pub hub_domain_suffix: String,
    /// Fixed upstream host for TLS passthrough sessions.
    pub tls_upstream_host: String,
    /// Fixed upstream port for TLS passthrough sessions.
    pub tls_upstream_port: u16,
    /// Upstream port dialed for sniffed plaintext sessions.
    pub plain_upstream_port: u16,
    /// Upstream dial timeout.
    pub dial_timeout: Duration,
    /// Handshake sniff timeout.
    pub sniff_timeout: Duration,
    /// Cap on bytes buffered while sniffing a handshake.
    pub sniff_max_bytes: usize,
    /// CONNECT port credentials. `None` disables the auth check.
    pub proxy_credentials: Option<ProxyCredentials>,
    /// Maximum concurrent connections per listener.
    pub max_connections: usize,
    /// Event broadcast buffer capacity (frames).
    pub event_buffer: usize,
    /// Log level (e.g. "info", "debug").
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let connect_listen: SocketAddr = std::env::var("HUBWARD_CONNECT_LISTEN")
            .unwrap_or_else(|_| DEFAULT_CONNECT_LISTEN.to_string())
            .parse()
            .context("HUBWARD_CONNECT_LISTEN must be a socket address (host:port).")?;

        let plain_listen: SocketAddr = std::env::var("HUBWARD_PLAIN_LISTEN")
            .unwrap_or_else(|_| DEFAULT_PLAIN_LISTEN.to_string())
            .parse()
            .context("HUBWARD_PLAIN_LISTEN must be a socket address (host:port).")?;

        let tls_listen: SocketAddr = std::env::var("HUBWARD_TLS_LISTEN")
            .unwrap_or_else(|_| DEFAULT_TLS_LISTEN.to_string())
            .parse()
            .context("HUBWARD_TLS_LISTEN must be a socket address (host:port).")?;

        let status_listen: SocketAddr = std::env::var("HUBWARD_STATUS_LISTEN")
            .unwrap_or_else(|_| DEFAULT_STATUS_LISTEN.to_string())
            .parse()
            .context("HUBWARD_STATUS_LISTEN must be a socket address (host:port).")?;

        let hub_domain_suffix = std::env::var("HUBWARD_HUB_DOMAIN_SUFFIX").context(
            "Missing hub domain suffix. Set HUBWARD_HUB_DOMAIN_SUFFIX (e.g. example-iot.net).",
        )?;

        let tls_upstream_host = std::env::var("HUBWARD_TLS_UPSTREAM_HOST").context(
            "Missing passthrough upstream. Set HUBWARD_TLS_UPSTREAM_HOST (e.g. hub.example-iot.net).",
        )?;

        let tls_upstream_port: u16 = std::env::var("HUBWARD_TLS_UPSTREAM_PORT")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("HUBWARD_TLS_UPSTREAM_PORT must be a port number.")?
            .unwrap_or(DEFAULT_TLS_UPSTREAM_PORT);

        let plain_upstream_port: u16 = std::env::var("HUBWARD_PLAIN_UPSTREAM_PORT")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("HUBWARD_PLAIN_UPSTREAM_PORT must be a port number.")?
            .unwrap_or(DEFAULT_PLAIN_UPSTREAM_PORT);

        let dial_timeout_ms: u64 = std::env::var("HUBWARD_DIAL_TIMEOUT_MS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("HUBWARD_DIAL_TIMEOUT_MS must be an integer.")?
            .unwrap_or(DEFAULT_DIAL_TIMEOUT_MS)
            .clamp(100, 300_000);

        let sniff_timeout_ms: u64 = std::env::var("HUBWARD_SNIFF_TIMEOUT_MS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("HUBWARD_SNIFF_TIMEOUT_MS must be an integer.")?
            .unwrap_or(DEFAULT_SNIFF_TIMEOUT_MS)
            .clamp(100, 300_000);

        let sniff_max_bytes: usize = std::env::var("HUBWARD_SNIFF_MAX_BYTES")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("HUBWARD_SNIFF_MAX_BYTES must be an integer.")?
            .unwrap_or(DEFAULT_SNIFF_MAX_BYTES)
            .clamp(64, 1_048_576);

        let proxy_credentials = match (
            std::env::var("HUBWARD_PROXY_USERNAME").ok(),
            std::env::var("HUBWARD_PROXY_PASSWORD").ok(),
        ) {
            (Some(username), Some(password)) => Some(ProxyCredentials { username, password }),
            (None, None) => None,
            _ => anyhow::bail!(
                "HUBWARD_PROXY_USERNAME and HUBWARD_PROXY_PASSWORD must be set together."
            ),
        };

        let max_connections: usize = std::env::var("HUBWARD_MAX_CONNECTIONS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("HUBWARD_MAX_CONNECTIONS must be an integer.")?
            .unwrap_or(DEFAULT_MAX_CONNECTIONS)
            .clamp(1, 1_000_000);

        let event_buffer: usize = std::env::var("HUBWARD_EVENT_BUFFER")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("HUBWARD_EVENT_BUFFER must be an integer.")?
            .unwrap_or(DEFAULT_EVENT_BUFFER)
            .clamp(1, 65_536);

        let log_level =
            std::env::var("HUBWARD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            connect_listen,
            plain_listen,
            tls_listen,
            status_listen,
            hub_domain_suffix,
            tls_upstream_host,
            tls_upstream_port,
            plain_upstream_port,
            dial_timeout: Duration::from_millis(dial_timeout_ms),
            sniff_timeout: Duration::from_millis(sniff_timeout_ms),
            sniff_max_bytes,
            proxy_credentials,
            max_connections,
            event_buffer,
            log_level,
        })
    }
}

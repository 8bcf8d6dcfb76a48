//! Nameserver configuration from environment variables.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};

/// Default UDP listen address.
pub const DEFAULT_LISTEN: &str = "0.0.0.0:53";

/// Default upstream resolver.
pub const DEFAULT_UPSTREAM: &str = "8.8.8.8:53";

/// Default upstream wait in milliseconds before a query is dropped.
pub const DEFAULT_FORWARD_TIMEOUT_MS: u64 = 5_000;

/// Nameserver configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// UDP listen address.
    pub listen: SocketAddr,
    /// The one FQDN answered locally.
    pub override_fqdn: String,
    /// Address returned for the overridden FQDN.
    pub override_addr: Ipv4Addr,
    /// Upstream resolver for everything else.
    pub upstream: SocketAddr,
    /// How long to wait for the upstream before dropping a query.
    pub forward_timeout: Duration,
    /// Log level (e.g. "info", "debug").
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let listen: SocketAddr = std::env::var("HUBWARD_DNS_LISTEN")
            .unwrap_or_else(|_| DEFAULT_LISTEN.to_string())
            .parse()
            .context("HUBWARD_DNS_LISTEN must be a socket address (host:port).")?;

        let override_fqdn = std::env::var("HUBWARD_DNS_OVERRIDE_FQDN").context(
            "Missing override name. Set HUBWARD_DNS_OVERRIDE_FQDN (e.g. hub.example-iot.net).",
        )?;

        let override_addr: Ipv4Addr = std::env::var("HUBWARD_DNS_OVERRIDE_ADDR")
            .context("Missing override address. Set HUBWARD_DNS_OVERRIDE_ADDR (the gateway's IPv4 address).")?
            .parse()
            .context("HUBWARD_DNS_OVERRIDE_ADDR must be an IPv4 address.")?;

        let upstream: SocketAddr = std::env::var("HUBWARD_DNS_UPSTREAM")
            .unwrap_or_else(|_| DEFAULT_UPSTREAM.to_string())
            .parse()
            .context("HUBWARD_DNS_UPSTREAM must be a socket address (host:port).")?;

        let forward_timeout_ms: u64 = std::env::var("HUBWARD_DNS_FORWARD_TIMEOUT_MS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("HUBWARD_DNS_FORWARD_TIMEOUT_MS must be an integer.")?
            .unwrap_or(DEFAULT_FORWARD_TIMEOUT_MS)
            .clamp(100, 60_000);

        let log_level =
            std::env::var("HUBWARD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            listen,
            override_fqdn,
            override_addr,
            upstream,
            forward_timeout: Duration::from_millis(forward_timeout_ms),
            log_level,
        })
    }
}

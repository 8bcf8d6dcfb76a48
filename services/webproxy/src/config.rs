//! Reverse proxy configuration from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Default HTTP listen address.
pub const DEFAULT_LISTEN: &str = "0.0.0.0:8080";

/// Default end-to-end timeout for a forwarded request in milliseconds.
pub const DEFAULT_FORWARD_TIMEOUT_MS: u64 = 30_000;

/// Default cap on a buffered request body.
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Reverse proxy configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address.
    pub listen: SocketAddr,
    /// End-to-end timeout for one forwarded request.
    pub forward_timeout: Duration,
    /// Largest request body the proxy will buffer and forward.
    pub max_body_bytes: usize,
    /// Log level (e.g. "info", "debug").
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let listen: SocketAddr = std::env::var("HUBWARD_WEBPROXY_LISTEN")
            .unwrap_or_else(|_| DEFAULT_LISTEN.to_string())
            .parse()
            .context("HUBWARD_WEBPROXY_LISTEN must be a socket address (host:port).")?;

        let forward_timeout_ms: u64 = std::env::var("HUBWARD_WEBPROXY_FORWARD_TIMEOUT_MS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("HUBWARD_WEBPROXY_FORWARD_TIMEOUT_MS must be an integer.")?
            .unwrap_or(DEFAULT_FORWARD_TIMEOUT_MS)
            .clamp(100, 300_000);

        let max_body_bytes: usize = std::env::var("HUBWARD_WEBPROXY_MAX_BODY_BYTES")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("HUBWARD_WEBPROXY_MAX_BODY_BYTES must be an integer.")?
            .unwrap_or(DEFAULT_MAX_BODY_BYTES)
            .clamp(1024, 64 * 1024 * 1024);

        let log_level =
            std::env::var("HUBWARD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            listen,
            forward_timeout: Duration::from_millis(forward_timeout_ms),
            max_body_bytes,
            log_level,
        })
    }
}

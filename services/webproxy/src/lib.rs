//! HTTP reverse proxy for device web consoles.
//!
//! Fronts the embedded web servers of managed devices. The forwarding
//! target is derived per request (absolute URL in the path, an
//! `x-proxy-target` header, or the `Host` header) and the request is
//! replayed through a shared HTTP client with hop-by-hop headers
//! stripped in both directions.

pub mod config;
pub mod proxy;

pub use config::Config;
pub use proxy::{routes, ProxyState};

//! hubward gateway library.
//!
//! Protocol-aware tunneling for device-to-hub traffic: HTTP CONNECT
//! tunnels, plaintext MQTT with handshake sniffing, and opaque TLS
//! passthrough, plus session accounting, lifecycle events, and a status
//! HTTP surface.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod proxy;
pub mod status;

pub use broadcast::EventBroadcaster;
pub use config::{Config, ProxyCredentials};
pub use error::GatewayError;

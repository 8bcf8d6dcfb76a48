//! Protocol-aware tunnel proxying.
//!
//! This module provides:
//! - Listeners for the three tunnel ports (CONNECT, plaintext MQTT, TLS)
//! - HTTP CONNECT handshake handling with optional Basic credentials
//! - MQTT handshake sniffing for hostname-based routing
//! - Target resolution over swappable route settings
//! - Bidirectional relaying with per-session accounting
//!
//! ## Architecture
//!
//! ```text
//! Client -> Listener -> Handshake (CONNECT | sniff | none) -> Resolver
//!                                                                |
//!              Registry/Stats <- Relay Session <- Upstream Dial <-
//! ```

mod connect;
mod listener;
mod registry;
mod router;
mod session;
mod sniff;

pub use connect::{ConnectHandshake, ConnectOutcome, ConnectRequest};
pub use listener::{
    GatewayShared, ListenerKind, ListenerSettings, TunnelListener, DEFAULT_MAX_CONNECTIONS,
};
pub use registry::{
    GatewayStats, ProtocolCountersView, SessionRegistry, SessionView, StatsView,
};
pub use router::{RouteSettings, RouteTable, RouteTarget};
pub use session::{dial_upstream, RelaySession, SessionHandle, SessionState};
pub use sniff::{
    HandshakeSniffer, SniffConfig, SniffOutcome, DEFAULT_MAX_SNIFF_BYTES, DEFAULT_SNIFF_TIMEOUT,
};

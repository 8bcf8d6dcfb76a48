//! Event type definitions for all session lifecycle events.
//!
//! Each event kind has a corresponding payload struct with the
//! event-specific data; [`TunnelEvent`] unions them under an `event` tag.

use serde::{Deserialize, Serialize};

// =============================================================================
// Event Kind Constants
// =============================================================================

/// All event kind names as constants.
pub mod kinds {
    pub const SESSION_OPENED: &str = "session.opened";
    pub const SESSION_ROUTED: &str = "session.routed";
    pub const SESSION_ESTABLISHED: &str = "session.established";
    pub const SESSION_TRAFFIC: &str = "session.traffic";
    pub const SESSION_CLOSED: &str = "session.closed";
    pub const SESSION_FAILED: &str = "session.failed";
}

// =============================================================================
// Shared Enums
// =============================================================================

/// Which listener a session arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelProtocol {
    /// HTTP CONNECT tunnel port.
    HttpConnect,
    /// Plaintext MQTT port (handshake is sniffed).
    Plain,
    /// TLS passthrough port (bytes stay encrypted).
    TlsPassthrough,
}

impl std::fmt::Display for TunnelProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TunnelProtocol::HttpConnect => write!(f, "http_connect"),
            TunnelProtocol::Plain => write!(f, "plain"),
            TunnelProtocol::TlsPassthrough => write!(f, "tls_passthrough"),
        }
    }
}

/// How a session's upstream target was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    /// Fixed target from configuration.
    Static,
    /// Hostname derived from a sniffed CONNECT packet.
    SniffedHandshake,
    /// Authority taken from an HTTP CONNECT request line.
    ConnectHeader,
}

impl std::fmt::Display for RouteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteSource::Static => write!(f, "static"),
            RouteSource::SniffedHandshake => write!(f, "sniffed_handshake"),
            RouteSource::ConnectHeader => write!(f, "connect_header"),
        }
    }
}

/// Relay direction for traffic accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::ClientToUpstream => write!(f, "client_to_upstream"),
            Direction::UpstreamToClient => write!(f, "upstream_to_client"),
        }
    }
}

// =============================================================================
// Event Payloads
// =============================================================================

/// A client connection was accepted and registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOpenedPayload {
    pub session_id: u64,
    pub protocol: TunnelProtocol,
    pub client_addr: String,
}

/// An upstream target was resolved for the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRoutedPayload {
    pub session_id: u64,
    pub host: String,
    pub port: u16,
    pub source: RouteSource,
    /// Client identifier from a sniffed handshake, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Username from a sniffed handshake, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// The upstream dial succeeded; relaying begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEstablishedPayload {
    pub session_id: u64,
}

/// One relayed chunk of traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTrafficPayload {
    pub session_id: u64,
    pub direction: Direction,
    pub bytes: u64,
}

/// The session ended cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClosedPayload {
    pub session_id: u64,
    pub bytes_upstream: u64,
    pub bytes_downstream: u64,
}

/// The session ended with an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionFailedPayload {
    pub session_id: u64,
    /// Stable reason code, e.g. `no_route_found` or `dial_failure`.
    pub reason: String,
}

// =============================================================================
// Event Union
// =============================================================================

/// All session lifecycle events, tagged by kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum TunnelEvent {
    #[serde(rename = "session.opened")]
    SessionOpened(SessionOpenedPayload),
    #[serde(rename = "session.routed")]
    SessionRouted(SessionRoutedPayload),
    #[serde(rename = "session.established")]
    SessionEstablished(SessionEstablishedPayload),
    #[serde(rename = "session.traffic")]
    SessionTraffic(SessionTrafficPayload),
    #[serde(rename = "session.closed")]
    SessionClosed(SessionClosedPayload),
    #[serde(rename = "session.failed")]
    SessionFailed(SessionFailedPayload),
}

impl TunnelEvent {
    /// The event kind name, matching the constants in [`kinds`].
    pub fn kind(&self) -> &'static str {
        match self {
            TunnelEvent::SessionOpened(_) => kinds::SESSION_OPENED,
            TunnelEvent::SessionRouted(_) => kinds::SESSION_ROUTED,
            TunnelEvent::SessionEstablished(_) => kinds::SESSION_ESTABLISHED,
            TunnelEvent::SessionTraffic(_) => kinds::SESSION_TRAFFIC,
            TunnelEvent::SessionClosed(_) => kinds::SESSION_CLOSED,
            TunnelEvent::SessionFailed(_) => kinds::SESSION_FAILED,
        }
    }

    /// The session this event belongs to.
    pub fn session_id(&self) -> u64 {
        match self {
            TunnelEvent::SessionOpened(p) => p.session_id,
            TunnelEvent::SessionRouted(p) => p.session_id,
            TunnelEvent::SessionEstablished(p) => p.session_id,
            TunnelEvent::SessionTraffic(p) => p.session_id,
            TunnelEvent::SessionClosed(p) => p.session_id,
            TunnelEvent::SessionFailed(p) => p.session_id,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

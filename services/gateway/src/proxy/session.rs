//! Tunnel session lifecycle, upstream dialing, and the bidirectional
//! relay.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use hubward_codec::classify_packet_type;
use hubward_events::{Direction, SessionTrafficPayload, TunnelEvent, TunnelProtocol};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

use crate::broadcast::EventBroadcaster;
use crate::error::GatewayError;

use super::registry::GatewayStats;
use super::router::RouteTarget;

/// Relay buffer size per direction.
const RELAY_BUF_SIZE: usize = 8192;

/// Lifecycle state of a tunnel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Accepted; the handshake has not finished yet.
    PendingHandshake = 0,
    /// Handshake done; working out the upstream.
    ResolvingTarget = 1,
    /// Dialing the upstream.
    ConnectingUpstream = 2,
    /// Relaying bytes in both directions.
    Established = 3,
    /// One direction saw EOF; draining the other.
    Closing = 4,
    /// Both directions finished cleanly.
    Closed = 5,
    /// The session failed.
    Errored = 6,
}

impl SessionState {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Errored)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::PendingHandshake => "pending_handshake",
            SessionState::ResolvingTarget => "resolving_target",
            SessionState::ConnectingUpstream => "connecting_upstream",
            SessionState::Established => "established",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Errored => "errored",
        }
    }

    fn from_u8(value: u8) -> SessionState {
        match value {
            0 => SessionState::PendingHandshake,
            1 => SessionState::ResolvingTarget,
            2 => SessionState::ConnectingUpstream,
            3 => SessionState::Established,
            4 => SessionState::Closing,
            5 => SessionState::Closed,
            _ => SessionState::Errored,
        }
    }
}

/// Shared, non-owning view of one tunnel session.
///
/// The relay task exclusively owns the sockets; this handle carries only
/// lifecycle state and counters, so the registry and status queries can
/// observe a session without touching its streams.
#[derive(Debug)]
pub struct SessionHandle {
    pub id: u64,
    pub client_addr: SocketAddr,
    pub protocol: TunnelProtocol,
    pub created_at: DateTime<Utc>,
    state: AtomicU8,
    target: OnceLock<RouteTarget>,
    bytes_upstream: AtomicU64,
    bytes_downstream: AtomicU64,
}

impl SessionHandle {
    pub(crate) fn new(id: u64, client_addr: SocketAddr, protocol: TunnelProtocol) -> Self {
        Self {
            id,
            client_addr,
            protocol,
            created_at: Utc::now(),
            state: AtomicU8::new(SessionState::PendingHandshake as u8),
            target: OnceLock::new(),
            bytes_upstream: AtomicU64::new(0),
            bytes_downstream: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// Advance the lifecycle state, tracing the transition.
    pub fn transition(&self, next: SessionState) {
        let prev = self.state.swap(next as u8, Ordering::Relaxed);
        trace!(
            session_id = self.id,
            from = SessionState::from_u8(prev).as_str(),
            to = next.as_str(),
            "Session state transition"
        );
    }

    /// Attach the resolved target. A session's target is set at most
    /// once; later calls are ignored.
    pub fn set_target(&self, target: RouteTarget) {
        let _ = self.target.set(target);
    }

    pub fn target(&self) -> Option<&RouteTarget> {
        self.target.get()
    }

    pub fn record_bytes(&self, direction: Direction, count: u64) {
        match direction {
            Direction::ClientToUpstream => {
                self.bytes_upstream.fetch_add(count, Ordering::Relaxed)
            }
            Direction::UpstreamToClient => {
                self.bytes_downstream.fetch_add(count, Ordering::Relaxed)
            }
        };
    }

    pub fn bytes_upstream(&self) -> u64 {
        self.bytes_upstream.load(Ordering::Relaxed)
    }

    pub fn bytes_downstream(&self) -> u64 {
        self.bytes_downstream.load(Ordering::Relaxed)
    }
}

/// Dial the resolved target with a bounded timeout.
pub async fn dial_upstream(
    target: &RouteTarget,
    dial_timeout: Duration,
) -> Result<TcpStream, GatewayError> {
    let dial = TcpStream::connect((target.host.as_str(), target.port));
    match tokio::time::timeout(dial_timeout, dial).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(GatewayError::Dial(format!("{target}: {e}"))),
        Err(_) => Err(GatewayError::Dial(format!(
            "{target}: timed out after {dial_timeout:?}"
        ))),
    }
}

/// Bidirectional relay for one established session.
pub struct RelaySession {
    handle: Arc<SessionHandle>,
    stats: Arc<GatewayStats>,
    events: EventBroadcaster,
    /// Log classified packet types per relayed chunk (plaintext only).
    classify_chunks: bool,
}

impl RelaySession {
    pub fn new(
        handle: Arc<SessionHandle>,
        stats: Arc<GatewayStats>,
        events: EventBroadcaster,
        classify_chunks: bool,
    ) -> Self {
        Self {
            handle,
            stats,
            events,
            classify_chunks,
        }
    }

    /// Account one forwarded chunk: session counters, process stats, a
    /// traffic event, and (for plaintext sessions) a packet-type trace.
    pub(crate) fn note_chunk(&self, direction: Direction, chunk: &[u8]) {
        let count = chunk.len() as u64;
        self.handle.record_bytes(direction, count);
        self.stats.record_traffic(self.handle.protocol, count);
        if self.classify_chunks {
            trace!(
                session_id = self.handle.id,
                direction = %direction,
                packet = %classify_packet_type(chunk),
                bytes = count,
                "Relayed chunk"
            );
        }
        self.events
            .publish(TunnelEvent::SessionTraffic(SessionTrafficPayload {
                session_id: self.handle.id,
                direction,
                bytes: count,
            }));
    }

    /// Relay until both directions finish.
    ///
    /// EOF on either side shuts down the peer's write half and drains
    /// the opposite direction. A socket error marks the session errored;
    /// byte counters reflect everything forwarded up to that point
    /// either way.
    pub async fn run(
        &self,
        mut client: TcpStream,
        mut upstream: TcpStream,
    ) -> Result<(u64, u64), GatewayError> {
        let (mut client_read, mut client_write) = client.split();
        let (mut upstream_read, mut upstream_write) = upstream.split();

        let client_to_upstream = async {
            let mut buf = vec![0u8; RELAY_BUF_SIZE];
            loop {
                match client_read.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        upstream_write.write_all(&buf[..n]).await?;
                        self.note_chunk(Direction::ClientToUpstream, &buf[..n]);
                    }
                    Err(e) => return Err(e),
                }
            }
            self.handle.transition(SessionState::Closing);
            upstream_write.shutdown().await?;
            Ok(())
        };

        let upstream_to_client = async {
            let mut buf = vec![0u8; RELAY_BUF_SIZE];
            loop {
                match upstream_read.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        client_write.write_all(&buf[..n]).await?;
                        self.note_chunk(Direction::UpstreamToClient, &buf[..n]);
                    }
                    Err(e) => return Err(e),
                }
            }
            self.handle.transition(SessionState::Closing);
            client_write.shutdown().await?;
            Ok(())
        };

        let (up_result, down_result) = tokio::join!(client_to_upstream, upstream_to_client);

        let totals = (self.handle.bytes_upstream(), self.handle.bytes_downstream());
        match (up_result, down_result) {
            (Ok(()), Ok(())) => {
                self.handle.transition(SessionState::Closed);
                Ok(totals)
            }
            (Err(e), _) | (_, Err(e)) => {
                self.handle.transition(SessionState::Errored);
                Err(GatewayError::Relay(e))
            }
        }
    }
}

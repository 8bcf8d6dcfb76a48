//! Tunnel listeners and per-connection handling.
//!
//! One listener per tunnel port. Every accepted connection runs in its
//! own task: the handshake phase works out where the connection goes,
//! the relay phase moves bytes until either side hangs up, and the
//! registry sees exactly one register and one unregister per session.
//! A failure in one connection never touches its siblings.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hubward_codec::{classify_packet_type, DecodeError, EXPECTED_PROTOCOL_NAME};
use hubward_events::{
    Direction, SessionClosedPayload, SessionEstablishedPayload, SessionFailedPayload,
    SessionOpenedPayload, SessionRoutedPayload, TunnelEvent, TunnelProtocol,
};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn, Instrument};

use crate::broadcast::EventBroadcaster;
use crate::config::{Config, ProxyCredentials};
use crate::error::GatewayError;

use super::connect::{ConnectHandshake, ConnectOutcome};
use super::registry::SessionRegistry;
use super::router::RouteTable;
use super::session::{dial_upstream, RelaySession, SessionHandle, SessionState};
use super::sniff::{HandshakeSniffer, SniffConfig, SniffOutcome};

/// Default maximum concurrent connections per listener.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10_000;

/// Which tunnel port a listener serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    /// HTTP CONNECT tunneling.
    HttpConnect,
    /// Plaintext MQTT with handshake sniffing.
    Plain,
    /// Opaque TLS passthrough to the fixed upstream.
    TlsPassthrough,
}

impl ListenerKind {
    pub fn protocol(self) -> TunnelProtocol {
        match self {
            ListenerKind::HttpConnect => TunnelProtocol::HttpConnect,
            ListenerKind::Plain => TunnelProtocol::Plain,
            ListenerKind::TlsPassthrough => TunnelProtocol::TlsPassthrough,
        }
    }
}

/// Pieces shared by every listener.
#[derive(Clone)]
pub struct GatewayShared {
    pub registry: Arc<SessionRegistry>,
    pub router: Arc<RouteTable>,
    pub events: EventBroadcaster,
}

/// Per-listener settings.
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub kind: ListenerKind,
    pub bind_addr: SocketAddr,
    pub max_connections: usize,
    pub dial_timeout: Duration,
    /// Sniff settings; only the plaintext listener reads these.
    pub sniff: SniffConfig,
    /// CONNECT credentials; only the CONNECT listener reads these.
    pub credentials: Option<ProxyCredentials>,
}

impl ListenerSettings {
    pub fn from_config(kind: ListenerKind, config: &Config) -> Self {
        let bind_addr = match kind {
            ListenerKind::HttpConnect => config.connect_listen,
            ListenerKind::Plain => config.plain_listen,
            ListenerKind::TlsPassthrough => config.tls_listen,
        };
        Self {
            kind,
            bind_addr,
            max_connections: config.max_connections,
            dial_timeout: config.dial_timeout,
            sniff: SniffConfig {
                timeout: config.sniff_timeout,
                max_bytes: config.sniff_max_bytes,
                domain_suffix: config.hub_domain_suffix.clone(),
            },
            credentials: config.proxy_credentials.clone(),
        }
    }
}

/// A bound tunnel listener.
pub struct TunnelListener {
    settings: ListenerSettings,
    listener: TcpListener,
    shared: GatewayShared,
    conn_semaphore: Arc<Semaphore>,
}

impl TunnelListener {
    /// Bind the listener socket. A bind failure is fatal to startup and
    /// is reported to the caller.
    pub async fn bind(settings: ListenerSettings, shared: GatewayShared) -> io::Result<Self> {
        let listener = TcpListener::bind(settings.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(
            kind = %settings.kind.protocol(),
            bind_addr = %local_addr,
            max_connections = settings.max_connections,
            "Listener bound"
        );
        Ok(Self {
            conn_semaphore: Arc::new(Semaphore::new(settings.max_connections)),
            settings,
            listener,
            shared,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop. Runs until the listener socket itself fails.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let permit = match self.conn_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            warn!(
                                peer_addr = %peer_addr,
                                "Connection rejected: max connections reached"
                            );
                            continue;
                        }
                    };

                    let listener = Arc::clone(&self);
                    tokio::spawn(
                        async move {
                            listener.handle_connection(stream, peer_addr).await;
                            drop(permit);
                        }
                        .instrument(tracing::info_span!("session", peer = %peer_addr)),
                    );
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Handle one accepted connection from registration to teardown.
    async fn handle_connection(&self, client: TcpStream, peer_addr: SocketAddr) {
        let protocol = self.settings.kind.protocol();
        let session = self.shared.registry.register(peer_addr, protocol).await;
        self.shared
            .events
            .publish(TunnelEvent::SessionOpened(SessionOpenedPayload {
                session_id: session.id,
                protocol,
                client_addr: peer_addr.to_string(),
            }));

        let result = match self.settings.kind {
            ListenerKind::HttpConnect => self.tunnel_connect(&session, client).await,
            ListenerKind::Plain => self.tunnel_plain(&session, client).await,
            ListenerKind::TlsPassthrough => self.tunnel_passthrough(&session, client).await,
        };

        match result {
            Ok(()) => {
                self.shared
                    .events
                    .publish(TunnelEvent::SessionClosed(SessionClosedPayload {
                        session_id: session.id,
                        bytes_upstream: session.bytes_upstream(),
                        bytes_downstream: session.bytes_downstream(),
                    }));
                debug!(
                    session_id = session.id,
                    bytes_upstream = session.bytes_upstream(),
                    bytes_downstream = session.bytes_downstream(),
                    "Session closed"
                );
            }
            Err(e) => {
                if !session.state().is_terminal() {
                    session.transition(SessionState::Errored);
                }
                self.shared
                    .events
                    .publish(TunnelEvent::SessionFailed(SessionFailedPayload {
                        session_id: session.id,
                        reason: e.reason_code().to_string(),
                    }));
                debug!(
                    session_id = session.id,
                    reason = e.reason_code(),
                    error = %e,
                    "Session failed"
                );
            }
        }

        self.shared.registry.unregister(session.id).await;
    }

    /// CONNECT flow: HTTP handshake, then relay.
    async fn tunnel_connect(
        &self,
        session: &Arc<SessionHandle>,
        mut client: TcpStream,
    ) -> Result<(), GatewayError> {
        let handshake = ConnectHandshake {
            credentials: self.settings.credentials.clone(),
            read_timeout: self.settings.sniff.timeout,
            dial_timeout: self.settings.dial_timeout,
            events: self.shared.events.clone(),
        };

        match handshake
            .run(session, &mut client, &self.shared.router)
            .await?
        {
            ConnectOutcome::ServedInfo => {
                self.shared.registry.stats().record_http_request();
                session.transition(SessionState::Closed);
                Ok(())
            }
            ConnectOutcome::Tunnel {
                mut upstream,
                early_data,
            } => {
                session.transition(SessionState::Established);
                self.shared
                    .events
                    .publish(TunnelEvent::SessionEstablished(SessionEstablishedPayload {
                        session_id: session.id,
                    }));

                let relay = self.relay_for(session, false);
                if !early_data.is_empty() {
                    upstream.write_all(&early_data).await?;
                    relay.note_chunk(Direction::ClientToUpstream, &early_data);
                }
                relay.run(client, upstream).await?;
                Ok(())
            }
        }
    }

    /// Plaintext flow: sniff the handshake, resolve the hub, dial,
    /// replay the sniffed bytes, relay.
    async fn tunnel_plain(
        &self,
        session: &Arc<SessionHandle>,
        mut client: TcpStream,
    ) -> Result<(), GatewayError> {
        let sniffer = HandshakeSniffer::new(self.settings.sniff.clone());
        let mut sniffed = Vec::new();
        let outcome = sniffer.sniff(&mut client, &mut sniffed).await;

        let info = match outcome {
            SniffOutcome::Decoded(info) => info,
            SniffOutcome::NotConnect(nibble) => {
                debug!(
                    session_id = session.id,
                    packet = %classify_packet_type(&sniffed),
                    "First packet is not CONNECT; dropping connection"
                );
                return Err(GatewayError::Decode(DecodeError::NotAConnectPacket(nibble)));
            }
            SniffOutcome::Incomplete | SniffOutcome::Timeout => {
                debug!(
                    session_id = session.id,
                    buffered = sniffed.len(),
                    packet = %classify_packet_type(&sniffed),
                    "Handshake never completed; dropping connection"
                );
                return Err(GatewayError::Decode(DecodeError::Truncated));
            }
            SniffOutcome::IoError(e) => {
                return Err(GatewayError::Relay(io::Error::other(e)));
            }
        };

        if info.protocol_name != EXPECTED_PROTOCOL_NAME {
            warn!(
                session_id = session.id,
                protocol_name = %info.protocol_name,
                "Unexpected protocol name in CONNECT packet; forwarding anyway"
            );
        }

        session.transition(SessionState::ResolvingTarget);
        let target = self.shared.router.resolve_sniffed(&info)?;
        session.set_target(target.clone());
        self.shared
            .events
            .publish(TunnelEvent::SessionRouted(SessionRoutedPayload {
                session_id: session.id,
                host: target.host.clone(),
                port: target.port,
                source: target.source,
                client_id: Some(info.client_id.clone()),
                username: info.username.clone(),
            }));
        debug!(
            session_id = session.id,
            target = %target,
            client_id = %info.client_id,
            "Plain session routed"
        );

        session.transition(SessionState::ConnectingUpstream);
        let mut upstream = dial_upstream(&target, self.settings.dial_timeout).await?;

        session.transition(SessionState::Established);
        self.shared
            .events
            .publish(TunnelEvent::SessionEstablished(SessionEstablishedPayload {
                session_id: session.id,
            }));

        // Replay the sniffed handshake ahead of the live relay.
        let relay = self.relay_for(session, true);
        upstream.write_all(&sniffed).await?;
        relay.note_chunk(Direction::ClientToUpstream, &sniffed);

        relay.run(client, upstream).await?;
        Ok(())
    }

    /// Passthrough flow: fixed target, no payload inspection.
    async fn tunnel_passthrough(
        &self,
        session: &Arc<SessionHandle>,
        client: TcpStream,
    ) -> Result<(), GatewayError> {
        session.transition(SessionState::ResolvingTarget);
        let target = self.shared.router.resolve_passthrough();
        session.set_target(target.clone());
        self.shared
            .events
            .publish(TunnelEvent::SessionRouted(SessionRoutedPayload {
                session_id: session.id,
                host: target.host.clone(),
                port: target.port,
                source: target.source,
                client_id: None,
                username: None,
            }));

        session.transition(SessionState::ConnectingUpstream);
        let upstream = dial_upstream(&target, self.settings.dial_timeout).await?;

        session.transition(SessionState::Established);
        self.shared
            .events
            .publish(TunnelEvent::SessionEstablished(SessionEstablishedPayload {
                session_id: session.id,
            }));

        let relay = self.relay_for(session, false);
        relay.run(client, upstream).await?;
        Ok(())
    }

    fn relay_for(&self, session: &Arc<SessionHandle>, classify_chunks: bool) -> RelaySession {
        RelaySession::new(
            Arc::clone(session),
            Arc::clone(self.shared.registry.stats()),
            self.shared.events.clone(),
            classify_chunks,
        )
    }
}

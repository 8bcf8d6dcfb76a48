//! HTTP CONNECT handshake for the tunnel port.
//!
//! The handshake reads the request head, checks credentials when they
//! are configured, resolves the authority, dials the upstream, and
//! replies `200 Connection Established` before handing the socket pair
//! to the relay. Bytes the client sent past the header block are early
//! data and are replayed to the upstream ahead of the relay.

use std::io;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hubward_events::{SessionRoutedPayload, TunnelEvent};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::broadcast::EventBroadcaster;
use crate::config::ProxyCredentials;
use crate::error::GatewayError;

use super::router::RouteTable;
use super::session::{dial_upstream, SessionHandle, SessionState};

/// Cap on the buffered request head.
const MAX_REQUEST_HEAD: usize = 8192;

/// Agent name advertised on established tunnels.
const PROXY_AGENT: &str = "hubward-gateway";

const RESPONSE_AUTH_REQUIRED: &str =
    "HTTP/1.1 407 Proxy Authentication Required\r\nProxy-Authenticate: Basic realm=\"hubward\"\r\n\r\n";
const RESPONSE_AUTH_UNSUPPORTED: &str = "HTTP/1.1 407 Proxy Authentication Required\r\n\r\n";
const RESPONSE_FORBIDDEN: &str = "HTTP/1.1 403 Forbidden\r\n\r\n";
const RESPONSE_BAD_REQUEST: &str = "HTTP/1.1 400 Bad Request\r\n\r\n";

/// A parsed request head from the tunnel port.
#[derive(Debug)]
pub struct ConnectRequest {
    pub method: String,
    pub target: String,
    /// Raw header lines after the request line.
    headers: Vec<String>,
    /// Bytes that arrived after the header block.
    pub early_data: Vec<u8>,
}

impl ConnectRequest {
    /// Case-insensitive single-header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            if key.trim().eq_ignore_ascii_case(name) {
                Some(value.trim())
            } else {
                None
            }
        })
    }
}

/// How the handshake left the connection.
pub enum ConnectOutcome {
    /// Tunnel established; relay client and upstream.
    Tunnel {
        upstream: TcpStream,
        early_data: Vec<u8>,
    },
    /// A plain HTTP request was answered locally; no tunnel.
    ServedInfo,
}

/// Why a credential check failed.
#[derive(Debug, PartialEq, Eq)]
enum AuthFailure {
    MissingHeader,
    UnsupportedScheme,
    BadCredentials,
}

/// CONNECT handshake driver for one connection.
pub struct ConnectHandshake {
    pub credentials: Option<ProxyCredentials>,
    pub read_timeout: Duration,
    pub dial_timeout: Duration,
    pub events: EventBroadcaster,
}

impl ConnectHandshake {
    /// Run the handshake to completion.
    ///
    /// Rejections write their HTTP response before returning the error;
    /// a dial failure closes the connection with no response at all, so
    /// the client cannot mistake a dead upstream for a live tunnel.
    pub async fn run(
        &self,
        session: &SessionHandle,
        client: &mut TcpStream,
        router: &RouteTable,
    ) -> Result<ConnectOutcome, GatewayError> {
        let request = match read_request(client, self.read_timeout).await {
            Ok(request) => request,
            Err(err @ GatewayError::InvalidTarget(_)) => {
                let _ = client.write_all(RESPONSE_BAD_REQUEST.as_bytes()).await;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        if !request.method.eq_ignore_ascii_case("CONNECT") {
            debug!(
                session_id = session.id,
                method = %request.method,
                target = %request.target,
                "Plain HTTP request on tunnel port"
            );
            serve_info(client).await?;
            return Ok(ConnectOutcome::ServedInfo);
        }

        if let Some(expected) = &self.credentials {
            if let Err(failure) = check_credentials(&request, expected) {
                debug!(session_id = session.id, failure = ?failure, "Tunnel auth rejected");
                let response = match failure {
                    AuthFailure::MissingHeader => RESPONSE_AUTH_REQUIRED,
                    AuthFailure::UnsupportedScheme => RESPONSE_AUTH_UNSUPPORTED,
                    AuthFailure::BadCredentials => RESPONSE_FORBIDDEN,
                };
                client.write_all(response.as_bytes()).await?;
                return Err(GatewayError::Auth);
            }
        }

        session.transition(SessionState::ResolvingTarget);
        let target = match router.resolve_connect(&request.target) {
            Ok(target) => target,
            Err(err) => {
                client.write_all(RESPONSE_BAD_REQUEST.as_bytes()).await?;
                return Err(err);
            }
        };
        session.set_target(target.clone());
        self.events
            .publish(TunnelEvent::SessionRouted(SessionRoutedPayload {
                session_id: session.id,
                host: target.host.clone(),
                port: target.port,
                source: target.source,
                client_id: None,
                username: None,
            }));

        session.transition(SessionState::ConnectingUpstream);
        let upstream = dial_upstream(&target, self.dial_timeout).await?;

        let established =
            format!("HTTP/1.1 200 Connection Established\r\nProxy-Agent: {PROXY_AGENT}\r\n\r\n");
        client.write_all(established.as_bytes()).await?;

        Ok(ConnectOutcome::Tunnel {
            upstream,
            early_data: request.early_data,
        })
    }
}

/// Read the request head (through the blank line) with a byte cap and
/// timeout, splitting off any early data.
async fn read_request(
    stream: &mut TcpStream,
    read_timeout: Duration,
) -> Result<ConnectRequest, GatewayError> {
    let head = tokio::time::timeout(read_timeout, read_head(stream))
        .await
        .map_err(|_| {
            GatewayError::Relay(io::Error::new(
                io::ErrorKind::TimedOut,
                "timed out reading request head",
            ))
        })??;
    let (head, early_data) = head;
    parse_head(&head, early_data)
}

async fn read_head(stream: &mut TcpStream) -> Result<(Vec<u8>, Vec<u8>), GatewayError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(GatewayError::Relay(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before request head",
            )));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = find_head_end(&buf) {
            let early_data = buf.split_off(end);
            return Ok((buf, early_data));
        }
        if buf.len() > MAX_REQUEST_HEAD {
            return Err(GatewayError::InvalidTarget(
                "request head too large".to_string(),
            ));
        }
    }
}

/// Index just past the `\r\n\r\n` terminator, if present.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn parse_head(head: &[u8], early_data: Vec<u8>) -> Result<ConnectRequest, GatewayError> {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().unwrap_or_default();

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();
    if method.is_empty() {
        return Err(GatewayError::InvalidTarget(
            "empty request line".to_string(),
        ));
    }

    let headers = lines
        .take_while(|line| !line.is_empty())
        .map(|line| line.to_string())
        .collect();

    Ok(ConnectRequest {
        method,
        target,
        headers,
        early_data,
    })
}

fn check_credentials(
    request: &ConnectRequest,
    expected: &ProxyCredentials,
) -> Result<(), AuthFailure> {
    let value = request
        .header("proxy-authorization")
        .ok_or(AuthFailure::MissingHeader)?;
    let encoded = value
        .strip_prefix("Basic ")
        .ok_or(AuthFailure::UnsupportedScheme)?;
    let decoded = BASE64
        .decode(encoded.trim())
        .map_err(|_| AuthFailure::BadCredentials)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthFailure::BadCredentials)?;
    let (username, password) = decoded.split_once(':').ok_or(AuthFailure::BadCredentials)?;
    if username == expected.username && password == expected.password {
        Ok(())
    } else {
        Err(AuthFailure::BadCredentials)
    }
}

/// Answer a plain HTTP request on the tunnel port with a short info
/// page.
async fn serve_info(client: &mut TcpStream) -> Result<(), GatewayError> {
    let body = format!(
        "hubward-gateway {}\nHTTP CONNECT tunneling proxy.\nUse CONNECT host:port to open a tunnel.\n",
        env!("CARGO_PKG_VERSION")
    );
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    client.write_all(response.as_bytes()).await?;
    Ok(())
}

//! UDP resolver loop.
//!
//! One socket serves every client. A query for the overridden FQDN is
//! answered inline from [`codec`]; anything else is relayed to the
//! upstream resolver on a per-query ephemeral socket so responses can
//! never be misdelivered between concurrent clients.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::codec::{self, DnsQuery, QTYPE_A};
use crate::config::Config;

/// Largest UDP datagram the resolver accepts or relays. Covers
/// EDNS-sized upstream responses, not just the classic 512 bytes.
const MAX_DATAGRAM: usize = 4096;

/// Authoritative-override DNS resolver.
pub struct Nameserver {
    socket: Arc<UdpSocket>,
    override_fqdn: String,
    override_addr: Ipv4Addr,
    upstream: SocketAddr,
    forward_timeout: Duration,
}

impl Nameserver {
    /// Bind the listen socket. Bind failures are fatal and surface to
    /// the caller.
    pub async fn bind(config: &Config) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(config.listen).await?;
        info!(
            addr = %socket.local_addr()?,
            override_fqdn = %config.override_fqdn,
            override_addr = %config.override_addr,
            upstream = %config.upstream,
            "nameserver listening"
        );
        Ok(Self {
            socket: Arc::new(socket),
            override_fqdn: config.override_fqdn.clone(),
            override_addr: config.override_addr,
            upstream: config.upstream,
            forward_timeout: config.forward_timeout,
        })
    }

    /// The bound listen address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive loop. Never returns under normal operation.
    pub async fn run(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(error) => {
                    warn!(%error, "failed to receive datagram");
                    continue;
                }
            };
            let datagram = buf[..len].to_vec();
            self.clone().handle_query(datagram, peer);
        }
    }

    fn handle_query(self: Arc<Self>, datagram: Vec<u8>, peer: SocketAddr) {
        match codec::parse_query(&datagram) {
            Ok(query) if self.matches_override(&query) => {
                let response = codec::build_a_response(&query, &datagram, self.override_addr);
                debug!(name = %query.name, %peer, "answering override query locally");
                tokio::spawn(async move {
                    if let Err(error) = self.socket.send_to(&response, peer).await {
                        warn!(%error, %peer, "failed to send override answer");
                    }
                });
            }
            parsed => {
                // Anything we do not answer ourselves is relayed
                // verbatim, including queries we could not parse. The
                // upstream is the authority on what is malformed.
                if let Err(error) = parsed {
                    debug!(%error, %peer, "forwarding unparseable query untouched");
                }
                tokio::spawn(async move {
                    self.forward(datagram, peer).await;
                });
            }
        }
    }

    fn matches_override(&self, query: &DnsQuery) -> bool {
        query.qtype == QTYPE_A && query.name.eq_ignore_ascii_case(&self.override_fqdn)
    }

    /// Relay one query to the upstream resolver and copy the first
    /// response back to the client. A fresh ephemeral socket per query
    /// ties the upstream response to exactly one client.
    async fn forward(&self, datagram: Vec<u8>, peer: SocketAddr) {
        let relay = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(socket) => socket,
            Err(error) => {
                warn!(%error, "failed to bind relay socket");
                return;
            }
        };
        if let Err(error) = relay.send_to(&datagram, self.upstream).await {
            warn!(%error, upstream = %self.upstream, "failed to forward query");
            return;
        }

        let mut response = vec![0u8; MAX_DATAGRAM];
        let len = match timeout(self.forward_timeout, relay.recv_from(&mut response)).await {
            Ok(Ok((len, _))) => len,
            Ok(Err(error)) => {
                warn!(%error, upstream = %self.upstream, "failed to read upstream response");
                return;
            }
            Err(_) => {
                debug!(upstream = %self.upstream, %peer, "upstream timed out, dropping query");
                return;
            }
        };

        if let Err(error) = self.socket.send_to(&response[..len], peer).await {
            warn!(%error, %peer, "failed to relay upstream response");
        }
    }
}

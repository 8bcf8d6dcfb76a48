//! MQTT handshake sniffing from the head of a plaintext stream.
//!
//! The sniffer reads the first bytes of a connection and re-assembles
//! them until the decoder reaches a verdict, a byte cap is hit, or a
//! timeout fires. Sniffed bytes stay in the caller's buffer so they can
//! be replayed to the upstream once routing succeeds; from the client's
//! point of view nothing was consumed.

use std::io;
use std::time::Duration;

use hubward_codec::{decode_connect_packet, DecodeError, HandshakeInfo};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tracing::warn;

/// Default timeout for handshake sniffing.
pub const DEFAULT_SNIFF_TIMEOUT: Duration = Duration::from_secs(5);

/// Default cap on bytes buffered while sniffing.
pub const DEFAULT_MAX_SNIFF_BYTES: usize = 8192;

/// Read chunk size while sniffing.
const SNIFF_CHUNK_SIZE: usize = 1024;

/// Result of sniffing the head of a stream.
#[derive(Debug, Clone)]
pub enum SniffOutcome {
    /// A CONNECT packet was decoded.
    Decoded(HandshakeInfo),
    /// The first packet is some other control type (type nibble attached).
    NotConnect(u8),
    /// The stream ended or the byte cap was reached mid-packet.
    Incomplete,
    /// Timed out waiting for a decodable packet.
    Timeout,
    /// The socket failed while sniffing.
    IoError(String),
}

/// Configuration for handshake sniffing.
#[derive(Debug, Clone)]
pub struct SniffConfig {
    /// Maximum time to wait for a decodable CONNECT packet.
    pub timeout: Duration,
    /// Maximum bytes to buffer before giving up.
    pub max_bytes: usize,
    /// Hub domain suffix used for hostname derivation.
    pub domain_suffix: String,
}

impl Default for SniffConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SNIFF_TIMEOUT,
            max_bytes: DEFAULT_MAX_SNIFF_BYTES,
            domain_suffix: String::new(),
        }
    }
}

/// Sniffs MQTT CONNECT packets from the head of plaintext streams.
#[derive(Debug, Clone)]
pub struct HandshakeSniffer {
    config: SniffConfig,
}

impl HandshakeSniffer {
    pub fn new(config: SniffConfig) -> Self {
        Self { config }
    }

    /// Sniff a stream, accumulating everything read into `buffer`.
    ///
    /// The caller owns the buffer and must replay it to the upstream
    /// when the session is routed.
    pub async fn sniff<R>(&self, stream: &mut R, buffer: &mut Vec<u8>) -> SniffOutcome
    where
        R: AsyncRead + Unpin,
    {
        buffer.clear();
        match timeout(self.config.timeout, self.read_until_verdict(stream, buffer)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => SniffOutcome::IoError(e.to_string()),
            Err(_) => {
                warn!(buffered = buffer.len(), "Handshake sniff timed out");
                SniffOutcome::Timeout
            }
        }
    }

    /// Keep reading while the decoder reports truncation.
    async fn read_until_verdict<R>(
        &self,
        stream: &mut R,
        buffer: &mut Vec<u8>,
    ) -> io::Result<SniffOutcome>
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = vec![0u8; SNIFF_CHUNK_SIZE];
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Ok(SniffOutcome::Incomplete);
            }
            buffer.extend_from_slice(&chunk[..n]);

            match decode_connect_packet(buffer, &self.config.domain_suffix) {
                Ok(info) => return Ok(SniffOutcome::Decoded(info)),
                Err(DecodeError::NotAConnectPacket(nibble)) => {
                    return Ok(SniffOutcome::NotConnect(nibble));
                }
                Err(DecodeError::Truncated) => {
                    if buffer.len() >= self.config.max_bytes {
                        return Ok(SniffOutcome::Incomplete);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    /// Minimal CONNECT packet: client id "box7.example-iot.net", no username.
    const CONNECT_PACKET: &[u8] = &[
        0x10, 0x20, // CONNECT, remaining length 32
        0x00, 0x04, b'M', b'Q', b'T', b'T', // protocol name
        0x04, // level 4
        0x02, // flags: clean session
        0x00, 0x3c, // keep-alive 60
        0x00, 0x14, // client id length 20
        b'b', b'o', b'x', b'7', b'.', b'e', b'x', b'a', b'm', b'p', b'l', b'e', b'-', b'i',
        b'o', b't', b'.', b'n', b'e', b't',
    ];

    fn sniffer(timeout: Duration, max_bytes: usize) -> HandshakeSniffer {
        HandshakeSniffer::new(SniffConfig {
            timeout,
            max_bytes,
            domain_suffix: "example-iot.net".to_string(),
        })
    }

    #[tokio::test]
    async fn decodes_a_packet_split_across_reads() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let writer = tokio::spawn(async move {
            client.write_all(&CONNECT_PACKET[..7]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            client.write_all(&CONNECT_PACKET[7..]).await.unwrap();
            client
        });

        let mut buffer = Vec::new();
        let outcome = sniffer(Duration::from_secs(2), 8192)
            .sniff(&mut server, &mut buffer)
            .await;

        match outcome {
            SniffOutcome::Decoded(info) => {
                assert_eq!(info.client_id, "box7.example-iot.net");
                assert_eq!(
                    info.derived_hostname.as_deref(),
                    Some("box7.example-iot.net")
                );
            }
            other => panic!("expected decode, got {other:?}"),
        }
        assert_eq!(buffer, CONNECT_PACKET);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn reports_other_packet_types_without_waiting() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0x30, 0x02, 0x00, 0x00]).await.unwrap();

        let mut buffer = Vec::new();
        let outcome = sniffer(Duration::from_secs(2), 8192)
            .sniff(&mut server, &mut buffer)
            .await;

        match outcome {
            SniffOutcome::NotConnect(nibble) => assert_eq!(nibble, 3),
            other => panic!("expected not-connect, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn eof_mid_packet_is_incomplete() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&CONNECT_PACKET[..9]).await.unwrap();
        drop(client);

        let mut buffer = Vec::new();
        let outcome = sniffer(Duration::from_secs(2), 8192)
            .sniff(&mut server, &mut buffer)
            .await;

        assert!(matches!(outcome, SniffOutcome::Incomplete));
        assert_eq!(buffer, &CONNECT_PACKET[..9]);
    }

    #[tokio::test]
    async fn silent_client_times_out() {
        let (client, mut server) = tokio::io::duplex(64);

        let mut buffer = Vec::new();
        let outcome = sniffer(Duration::from_millis(50), 8192)
            .sniff(&mut server, &mut buffer)
            .await;

        assert!(matches!(outcome, SniffOutcome::Timeout));
        drop(client);
    }

    #[tokio::test]
    async fn byte_cap_stops_an_unbounded_handshake() {
        let (mut client, mut server) = tokio::io::duplex(256);
        // Truncated at the username: the decoder will keep asking for more.
        let head: &[u8] = &[
            0x10, 0x48, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x82, 0x00, 0x3c, 0x00,
            0x06, b'd', b'e', b'v', b'-', b'0', b'1', 0x00, 0x34,
        ];
        client.write_all(head).await.unwrap();

        let mut buffer = Vec::new();
        let outcome = sniffer(Duration::from_secs(2), 16)
            .sniff(&mut server, &mut buffer)
            .await;

        assert!(matches!(outcome, SniffOutcome::Incomplete));
    }
}

//! End-to-end tests for the plaintext MQTT port.


use std::time::Duration;

use harness::{connect_packet, GatewayHandle, GatewayOptions, TcpEchoBackend};
use hubward_events::{RouteSource, TunnelEvent};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// With this suffix, a username like `127.0.0.1/dev-01` derives the
/// loopback address itself as the hub hostname, so test sessions dial
/// straight back into a local echo backend.
const LOOPBACK_SUFFIX: &str = "0.0.1";

fn loopback_options(echo_port: u16) -> GatewayOptions {
    GatewayOptions {
        domain_suffix: LOOPBACK_SUFFIX.to_string(),
        plain_upstream_port: echo_port,
        ..Default::default()
    }
}

#[tokio::test]
async fn routed_handshake_reaches_the_hub_and_echoes() {
    timeout(TEST_TIMEOUT, async {
        let echo = TcpEchoBackend::spawn().await;
        let gateway = GatewayHandle::spawn(loopback_options(echo.addr.port())).await;
        let mut rx = gateway.events.subscribe();

        let packet = connect_packet("dev-01", Some("127.0.0.1/dev-01/?api-version=2020-09-30"));
        let mut stream = TcpStream::connect(gateway.plain_addr).await.unwrap();
        stream.write_all(&packet).await.unwrap();

        // The echo hub sends the replayed handshake straight back.
        let mut buf = vec![0u8; packet.len()];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, packet);

        // Post-handshake traffic keeps flowing (PINGREQ round trip).
        stream.write_all(&[0xc0, 0x00]).await.unwrap();
        let mut ping = [0u8; 2];
        stream.read_exact(&mut ping).await.unwrap();
        assert_eq!(ping, [0xc0, 0x00]);

        assert_eq!(echo.connection_count(), 1);

        // Routing used the sniffed handshake and carried its identity.
        loop {
            let frame = rx.recv().await.expect("event stream ended early");
            if let TunnelEvent::SessionRouted(p) = frame.event {
                assert_eq!(p.host, "127.0.0.1");
                assert_eq!(p.port, echo.addr.port());
                assert_eq!(p.source, RouteSource::SniffedHandshake);
                assert_eq!(p.client_id.as_deref(), Some("dev-01"));
                assert_eq!(
                    p.username.as_deref(),
                    Some("127.0.0.1/dev-01/?api-version=2020-09-30")
                );
                break;
            }
        }

        drop(stream);
        gateway.wait_for_active(0, Duration::from_secs(2)).await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn a_handshake_split_across_writes_still_routes() {
    timeout(TEST_TIMEOUT, async {
        let echo = TcpEchoBackend::spawn().await;
        let gateway = GatewayHandle::spawn(loopback_options(echo.addr.port())).await;

        let packet = connect_packet("dev-02", Some("127.0.0.1/dev-02"));
        let mut stream = TcpStream::connect(gateway.plain_addr).await.unwrap();
        stream.write_all(&packet[..10]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        stream.write_all(&packet[10..]).await.unwrap();

        let mut buf = vec![0u8; packet.len()];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, packet);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn client_id_is_the_routing_fallback() {
    timeout(TEST_TIMEOUT, async {
        let echo = TcpEchoBackend::spawn().await;
        let gateway = GatewayHandle::spawn(loopback_options(echo.addr.port())).await;

        // No username at all; the client id carries the hostname.
        let packet = connect_packet("127.0.0.1", None);
        let mut stream = TcpStream::connect(gateway.plain_addr).await.unwrap();
        stream.write_all(&packet).await.unwrap();

        let mut buf = vec![0u8; packet.len()];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, packet);
        assert_eq!(echo.connection_count(), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unroutable_handshakes_never_touch_an_upstream() {
    timeout(TEST_TIMEOUT, async {
        let echo = TcpEchoBackend::spawn().await;
        let gateway = GatewayHandle::spawn(loopback_options(echo.addr.port())).await;
        let mut rx = gateway.events.subscribe();

        // Neither field matches the configured suffix.
        let packet = connect_packet("plain-device", Some("nobody-here"));
        let mut stream = TcpStream::connect(gateway.plain_addr).await.unwrap();
        stream.write_all(&packet).await.unwrap();

        let mut buf = [0u8; 1];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0, "expected close");
        assert_eq!(echo.connection_count(), 0);

        loop {
            let frame = rx.recv().await.expect("event stream ended early");
            if let TunnelEvent::SessionFailed(p) = frame.event {
                assert_eq!(p.reason, "no_route_found");
                break;
            }
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn a_non_connect_first_packet_is_dropped() {
    timeout(TEST_TIMEOUT, async {
        let echo = TcpEchoBackend::spawn().await;
        let gateway = GatewayHandle::spawn(loopback_options(echo.addr.port())).await;
        let mut rx = gateway.events.subscribe();

        // A PUBLISH packet before any CONNECT.
        let mut stream = TcpStream::connect(gateway.plain_addr).await.unwrap();
        stream
            .write_all(&[0x30, 0x05, 0x00, 0x01, b't', b'h', b'i'])
            .await
            .unwrap();

        let mut buf = [0u8; 1];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0, "expected close");
        assert_eq!(echo.connection_count(), 0);

        loop {
            let frame = rx.recv().await.expect("event stream ended early");
            if let TunnelEvent::SessionFailed(p) = frame.event {
                assert_eq!(p.reason, "decode_not_connect");
                break;
            }
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn a_stalled_handshake_times_out() {
    timeout(TEST_TIMEOUT, async {
        let echo = TcpEchoBackend::spawn().await;
        let mut options = loopback_options(echo.addr.port());
        options.sniff_timeout = Duration::from_millis(200);
        let gateway = GatewayHandle::spawn(options).await;
        let mut rx = gateway.events.subscribe();

        let packet = connect_packet("dev-03", Some("127.0.0.1/dev-03"));
        let mut stream = TcpStream::connect(gateway.plain_addr).await.unwrap();
        // Send only a fragment and then stall.
        stream.write_all(&packet[..6]).await.unwrap();

        let mut buf = [0u8; 1];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0, "expected close");
        assert_eq!(echo.connection_count(), 0);

        loop {
            let frame = rx.recv().await.expect("event stream ended early");
            if let TunnelEvent::SessionFailed(p) = frame.event {
                assert_eq!(p.reason, "decode_truncated");
                break;
            }
        }
    })
    .await
    .expect("test timed out");
}

//! Target resolution for tunnel sessions.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use hubward_codec::HandshakeInfo;
use hubward_events::RouteSource;

use crate::error::GatewayError;

/// The upstream resolved for one session.
///
/// A target is a value snapshot: once resolved it never changes, even
/// if the settings behind the resolver are swapped mid-session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub host: String,
    pub port: u16,
    pub source: RouteSource,
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Static routing settings consulted by the resolver.
#[derive(Debug, Clone)]
pub struct RouteSettings {
    /// Fixed upstream host for TLS passthrough sessions.
    pub tls_upstream_host: String,
    /// Fixed upstream port for TLS passthrough sessions.
    pub tls_upstream_port: u16,
    /// Port dialed for hostnames derived from sniffed handshakes.
    pub plain_upstream_port: u16,
}

/// Resolves session targets against an atomically swappable settings
/// snapshot.
///
/// Each resolution loads the snapshot exactly once, so a session's
/// target can never observe half of a concurrent settings swap.
#[derive(Debug)]
pub struct RouteTable {
    settings: ArcSwap<RouteSettings>,
}

impl RouteTable {
    pub fn new(settings: RouteSettings) -> Self {
        Self {
            settings: ArcSwap::from_pointee(settings),
        }
    }

    /// Replace the settings snapshot.
    pub fn store(&self, settings: RouteSettings) {
        self.settings.store(Arc::new(settings));
    }

    /// Current settings snapshot.
    pub fn snapshot(&self) -> Arc<RouteSettings> {
        self.settings.load_full()
    }

    /// Target for a TLS passthrough session: always the fixed upstream.
    pub fn resolve_passthrough(&self) -> RouteTarget {
        let settings = self.snapshot();
        RouteTarget {
            host: settings.tls_upstream_host.clone(),
            port: settings.tls_upstream_port,
            source: RouteSource::Static,
        }
    }

    /// Target for a sniffed plaintext handshake.
    ///
    /// The handshake must have yielded a hub hostname; a handshake
    /// without one is unroutable.
    pub fn resolve_sniffed(&self, info: &HandshakeInfo) -> Result<RouteTarget, GatewayError> {
        let host = info
            .derived_hostname
            .clone()
            .ok_or(GatewayError::NoRouteFound)?;
        let settings = self.snapshot();
        Ok(RouteTarget {
            host,
            port: settings.plain_upstream_port,
            source: RouteSource::SniffedHandshake,
        })
    }

    /// Target from a CONNECT request authority (`host:port`).
    pub fn resolve_connect(&self, authority: &str) -> Result<RouteTarget, GatewayError> {
        let (host, port) = authority.rsplit_once(':').ok_or_else(|| {
            GatewayError::InvalidTarget(format!("missing port in {authority:?}"))
        })?;
        // Tolerate a bracketed IPv6 authority.
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(GatewayError::InvalidTarget(format!(
                "empty host in {authority:?}"
            )));
        }
        let port: u16 = port.parse().map_err(|_| {
            GatewayError::InvalidTarget(format!("invalid port in {authority:?}"))
        })?;
        Ok(RouteTarget {
            host: host.to_string(),
            port,
            source: RouteSource::ConnectHeader,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RouteSettings {
        RouteSettings {
            tls_upstream_host: "hub-a.example-iot.net".to_string(),
            tls_upstream_port: 8883,
            plain_upstream_port: 1883,
        }
    }

    fn handshake_with_hostname(hostname: Option<&str>) -> HandshakeInfo {
        HandshakeInfo {
            protocol_name: "MQTT".to_string(),
            protocol_level: 4,
            flags: 0x02,
            keep_alive_secs: 60,
            client_id: "dev-01".to_string(),
            username: None,
            has_password: false,
            derived_hostname: hostname.map(str::to_string),
        }
    }

    #[test]
    fn passthrough_targets_the_fixed_upstream() {
        let table = RouteTable::new(settings());
        let target = table.resolve_passthrough();
        assert_eq!(target.host, "hub-a.example-iot.net");
        assert_eq!(target.port, 8883);
        assert_eq!(target.source, RouteSource::Static);
    }

    #[test]
    fn sniffed_handshakes_route_to_the_derived_hostname() {
        let table = RouteTable::new(settings());
        let info = handshake_with_hostname(Some("box7.example-iot.net"));
        let target = table.resolve_sniffed(&info).unwrap();
        assert_eq!(target.host, "box7.example-iot.net");
        assert_eq!(target.port, 1883);
        assert_eq!(target.source, RouteSource::SniffedHandshake);
    }

    #[test]
    fn handshakes_without_a_hostname_are_unroutable() {
        let table = RouteTable::new(settings());
        let info = handshake_with_hostname(None);
        assert!(matches!(
            table.resolve_sniffed(&info),
            Err(GatewayError::NoRouteFound)
        ));
    }

    #[test]
    fn connect_authorities_parse_host_and_port() {
        let table = RouteTable::new(settings());
        let target = table.resolve_connect("hub.example.com:8883").unwrap();
        assert_eq!(target.host, "hub.example.com");
        assert_eq!(target.port, 8883);
        assert_eq!(target.source, RouteSource::ConnectHeader);
    }

    #[test]
    fn bracketed_ipv6_authorities_are_accepted() {
        let table = RouteTable::new(settings());
        let target = table.resolve_connect("[::1]:9000").unwrap();
        assert_eq!(target.host, "::1");
        assert_eq!(target.port, 9000);
    }

    #[test]
    fn malformed_connect_authorities_are_rejected() {
        let table = RouteTable::new(settings());
        for authority in ["no-port", ":8883", "host:", "host:abc", "host:70000"] {
            assert!(
                matches!(
                    table.resolve_connect(authority),
                    Err(GatewayError::InvalidTarget(_))
                ),
                "{authority:?} should be invalid"
            );
        }
    }

    #[test]
    fn settings_swaps_do_not_mutate_resolved_targets() {
        let table = RouteTable::new(settings());
        let before = table.resolve_passthrough();
        let old_snapshot = table.snapshot();

        table.store(RouteSettings {
            tls_upstream_host: "hub-b.example-iot.net".to_string(),
            tls_upstream_port: 443,
            plain_upstream_port: 2883,
        });

        assert_eq!(before.host, "hub-a.example-iot.net");
        assert_eq!(old_snapshot.tls_upstream_host, "hub-a.example-iot.net");
        assert_eq!(table.resolve_passthrough().host, "hub-b.example-iot.net");
    }
}

//! Session registry and process-wide counters.
//!
//! Relay-path accounting goes straight to atomics; the session map is
//! locked only when a session starts or ends and by enumeration
//! queries, so a stats snapshot never blocks an in-flight relay.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hubward_events::TunnelProtocol;
use serde::Serialize;
use tokio::sync::Mutex;

use super::session::SessionHandle;

/// Per-protocol counters.
#[derive(Debug, Default)]
pub struct ProtocolCounters {
    active: AtomicU64,
    total: AtomicU64,
    bytes: AtomicU64,
    packets: AtomicU64,
}

impl ProtocolCounters {
    fn view(&self) -> ProtocolCountersView {
        ProtocolCountersView {
            active: self.active.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            packets: self.packets.load(Ordering::Relaxed),
        }
    }
}

/// Serializable snapshot of one protocol's counters.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ProtocolCountersView {
    pub active: u64,
    pub total: u64,
    pub bytes: u64,
    pub packets: u64,
}

/// Process-wide counters, created once at startup.
#[derive(Debug)]
pub struct GatewayStats {
    started_at: DateTime<Utc>,
    http_connect: ProtocolCounters,
    plain: ProtocolCounters,
    tls_passthrough: ProtocolCounters,
    http_requests: AtomicU64,
    http_errors: AtomicU64,
}

impl GatewayStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            http_connect: ProtocolCounters::default(),
            plain: ProtocolCounters::default(),
            tls_passthrough: ProtocolCounters::default(),
            http_requests: AtomicU64::new(0),
            http_errors: AtomicU64::new(0),
        }
    }

    fn counters(&self, protocol: TunnelProtocol) -> &ProtocolCounters {
        match protocol {
            TunnelProtocol::HttpConnect => &self.http_connect,
            TunnelProtocol::Plain => &self.plain,
            TunnelProtocol::TlsPassthrough => &self.tls_passthrough,
        }
    }

    pub fn record_session_opened(&self, protocol: TunnelProtocol) {
        let counters = self.counters(protocol);
        counters.active.fetch_add(1, Ordering::Relaxed);
        counters.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_closed(&self, protocol: TunnelProtocol) {
        self.counters(protocol).active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Account one relayed chunk.
    pub fn record_traffic(&self, protocol: TunnelProtocol, bytes: u64) {
        let counters = self.counters(protocol);
        counters.bytes.fetch_add(bytes, Ordering::Relaxed);
        counters.packets.fetch_add(1, Ordering::Relaxed);
    }

    /// Account a plain HTTP request served on the tunnel port.
    pub fn record_http_request(&self) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_http_error(&self) {
        self.http_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    pub fn view(&self) -> StatsView {
        StatsView {
            uptime_seconds: self.uptime_seconds(),
            http_connect: self.http_connect.view(),
            plain: self.plain.view(),
            tls_passthrough: self.tls_passthrough.view(),
            http_requests: self.http_requests.load(Ordering::Relaxed),
            http_errors: self.http_errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for GatewayStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable snapshot of the process-wide counters.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct StatsView {
    pub uptime_seconds: i64,
    pub http_connect: ProtocolCountersView,
    pub plain: ProtocolCountersView,
    pub tls_passthrough: ProtocolCountersView,
    pub http_requests: u64,
    pub http_errors: u64,
}

/// Serializable snapshot of one live session.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct SessionView {
    pub id: u64,
    pub protocol: TunnelProtocol,
    pub client_addr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub state: String,
    pub bytes_upstream: u64,
    pub bytes_downstream: u64,
    pub age_seconds: i64,
}

impl SessionView {
    fn from_handle(handle: &SessionHandle) -> Self {
        Self {
            id: handle.id,
            protocol: handle.protocol,
            client_addr: handle.client_addr.to_string(),
            target: handle.target().map(|t| t.to_string()),
            state: handle.state().as_str().to_string(),
            bytes_upstream: handle.bytes_upstream(),
            bytes_downstream: handle.bytes_downstream(),
            age_seconds: (Utc::now() - handle.created_at).num_seconds(),
        }
    }
}

/// Registry of live tunnel sessions.
pub struct SessionRegistry {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<u64, Arc<SessionHandle>>>,
    stats: Arc<GatewayStats>,
}

impl SessionRegistry {
    pub fn new(stats: Arc<GatewayStats>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<GatewayStats> {
        &self.stats
    }

    /// Register a newly accepted connection and hand back its handle.
    pub async fn register(
        &self,
        client_addr: SocketAddr,
        protocol: TunnelProtocol,
    ) -> Arc<SessionHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(SessionHandle::new(id, client_addr, protocol));
        self.sessions.lock().await.insert(id, Arc::clone(&handle));
        self.stats.record_session_opened(protocol);
        handle
    }

    /// Remove a finished session.
    ///
    /// The active count is decremented only when the id was still in
    /// the map, which makes the decrement exactly-once even if a
    /// teardown path runs twice.
    pub async fn unregister(&self, session_id: u64) {
        let removed = self.sessions.lock().await.remove(&session_id);
        if let Some(handle) = removed {
            self.stats.record_session_closed(handle.protocol);
        }
    }

    /// Number of live sessions.
    pub async fn active_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Snapshot of live sessions, ordered by id.
    pub async fn sessions(&self) -> Vec<SessionView> {
        let sessions = self.sessions.lock().await;
        let mut views: Vec<SessionView> =
            sessions.values().map(|h| SessionView::from_handle(h)).collect();
        views.sort_by_key(|v| v.id);
        views
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[tokio::test]
    async fn register_and_unregister_track_active_sessions() {
        let stats = Arc::new(GatewayStats::new());
        let registry = SessionRegistry::new(Arc::clone(&stats));

        let a = registry.register(addr(), TunnelProtocol::Plain).await;
        let b = registry.register(addr(), TunnelProtocol::Plain).await;
        assert_ne!(a.id, b.id);
        assert_eq!(registry.active_count().await, 2);
        assert_eq!(stats.view().plain.active, 2);
        assert_eq!(stats.view().plain.total, 2);

        registry.unregister(a.id).await;
        assert_eq!(registry.active_count().await, 1);
        assert_eq!(stats.view().plain.active, 1);
        assert_eq!(stats.view().plain.total, 2);
    }

    #[tokio::test]
    async fn double_unregister_decrements_exactly_once() {
        let stats = Arc::new(GatewayStats::new());
        let registry = SessionRegistry::new(Arc::clone(&stats));

        let handle = registry.register(addr(), TunnelProtocol::HttpConnect).await;
        registry.unregister(handle.id).await;
        registry.unregister(handle.id).await;

        assert_eq!(registry.active_count().await, 0);
        assert_eq!(stats.view().http_connect.active, 0);
        assert_eq!(stats.view().http_connect.total, 1);
    }

    #[tokio::test]
    async fn traffic_is_tallied_per_protocol() {
        let stats = GatewayStats::new();
        stats.record_traffic(TunnelProtocol::Plain, 100);
        stats.record_traffic(TunnelProtocol::Plain, 50);
        stats.record_traffic(TunnelProtocol::TlsPassthrough, 9);

        let view = stats.view();
        assert_eq!(view.plain.bytes, 150);
        assert_eq!(view.plain.packets, 2);
        assert_eq!(view.tls_passthrough.bytes, 9);
        assert_eq!(view.tls_passthrough.packets, 1);
        assert_eq!(view.http_connect.bytes, 0);
    }

    #[tokio::test]
    async fn session_views_carry_target_and_state() {
        let stats = Arc::new(GatewayStats::new());
        let registry = SessionRegistry::new(stats);

        let handle = registry.register(addr(), TunnelProtocol::Plain).await;
        handle.set_target(crate::proxy::RouteTarget {
            host: "box7.example-iot.net".to_string(),
            port: 1883,
            source: hubward_events::RouteSource::SniffedHandshake,
        });

        let views = registry.sessions().await;
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].id, handle.id);
        assert_eq!(views[0].target.as_deref(), Some("box7.example-iot.net:1883"));
        assert_eq!(views[0].state, "pending_handshake");
    }
}

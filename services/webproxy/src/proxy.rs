//! Request forwarding with layered target derivation.
//!
//! A request can name its destination three ways, tried in order:
//! an absolute URL embedded in the path (`GET /http://host/page`), an
//! `x-proxy-target` header giving the base URL, or the `Host` header
//! for transparent fronting. Requests that fit none of them are
//! refused. `/healthz` and `/v1/stats` are served locally and are
//! never forwarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::config::Config;

/// Header carrying an explicit forwarding base URL.
pub const TARGET_HEADER: &str = "x-proxy-target";

/// Connection-scoped headers that must not travel past one hop, in
/// either direction.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "proxy-connection",
];

/// Request counters exposed on `/v1/stats`.
#[derive(Debug)]
pub struct ProxyStats {
    started_at: DateTime<Utc>,
    requests: AtomicU64,
    errors: AtomicU64,
}

impl ProxyStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time snapshot of the counters.
    pub fn view(&self) -> StatsView {
        StatsView {
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            uptime_seconds: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }
}

impl Default for ProxyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsView {
    pub requests: u64,
    pub errors: u64,
    pub uptime_seconds: u64,
}

/// Shared state behind every handler.
#[derive(Clone)]
pub struct ProxyState {
    client: reqwest::Client,
    stats: Arc<ProxyStats>,
    max_body_bytes: usize,
}

impl ProxyState {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.forward_timeout)
            .build()
            .context("Failed to build the forwarding HTTP client.")?;
        Ok(Self {
            client,
            stats: Arc::new(ProxyStats::new()),
            max_body_bytes: config.max_body_bytes,
        })
    }

    pub fn stats(&self) -> &ProxyStats {
        &self.stats
    }
}

/// Build the proxy router: two local endpoints, everything else falls
/// through to the forwarder.
pub fn routes(state: ProxyState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/v1/stats", get(stats))
        .fallback(forward)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
struct HealthResponse {
    status: String,
    service: String,
    version: String,
    timestamp: DateTime<Utc>,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "webproxy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}

async fn stats(State(state): State<ProxyState>) -> Json<StatsView> {
    Json(state.stats.view())
}

async fn forward(State(state): State<ProxyState>, request: Request) -> Response {
    state.stats.record_request();

    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let Some(target) = derive_target(path_and_query, &parts.headers) else {
        state.stats.record_error();
        debug!(path = %path_and_query, "no forwarding target derivable");
        return (
            StatusCode::BAD_REQUEST,
            "no proxy target in path, x-proxy-target, or Host\n",
        )
            .into_response();
    };

    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(error) => {
            state.stats.record_error();
            warn!(%error, target = %target, "request body too large to forward");
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large\n").into_response();
        }
    };

    debug!(method = %parts.method, target = %target, "forwarding request");

    let upstream = match state
        .client
        .request(parts.method.clone(), target.as_str())
        .headers(forwardable_request_headers(&parts.headers))
        .body(body)
        .send()
        .await
    {
        Ok(upstream) => upstream,
        Err(error) => {
            state.stats.record_error();
            warn!(%error, target = %target, "forwarding failed");
            return (StatusCode::BAD_GATEWAY, "upstream request failed\n").into_response();
        }
    };

    let status = upstream.status();
    let headers = forwardable_response_headers(upstream.headers());
    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Work out where a request should go. Precedence: absolute URL in
/// the path, then the `x-proxy-target` base, then the `Host` header.
fn derive_target(path_and_query: &str, headers: &HeaderMap) -> Option<String> {
    if let Some(absolute) = path_and_query.strip_prefix('/') {
        if absolute.starts_with("http://") || absolute.starts_with("https://") {
            return Some(absolute.to_string());
        }
    }
    if let Some(base) = headers.get(TARGET_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(format!("{}{}", base.trim_end_matches('/'), path_and_query));
    }
    if let Some(host) = headers.get(header::HOST).and_then(|v| v.to_str().ok()) {
        return Some(format!("http://{host}{path_and_query}"));
    }
    None
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

fn forwardable_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::new();
    for (name, value) in headers {
        if is_hop_by_hop(name) {
            continue;
        }
        // The forwarding client regenerates these from the target URL
        // and the buffered body.
        if name == header::HOST || name == header::CONTENT_LENGTH {
            continue;
        }
        if name.as_str() == TARGET_HEADER {
            continue;
        }
        filtered.append(name, value.clone());
    }
    filtered
}

fn forwardable_response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::new();
    for (name, value) in headers {
        if is_hop_by_hop(name) {
            continue;
        }
        filtered.append(name, value.clone());
    }
    filtered
}

//! Status and observability HTTP surface.
//!
//! Serves health, stats snapshots, live-session listings, and an NDJSON
//! event stream. Snapshot queries read atomics and briefly lock the
//! session map; they never touch a relay's sockets.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use chrono::Utc;
use futures_util::stream::unfold;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::broadcast::EventBroadcaster;
use crate::proxy::SessionRegistry;

/// Shared state for the status router.
#[derive(Clone)]
pub struct StatusState {
    pub registry: Arc<SessionRegistry>,
    pub events: EventBroadcaster,
}

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status: "ok".
    pub status: String,
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
    /// Current timestamp (ISO 8601).
    pub timestamp: String,
}

/// Create the status routes.
pub fn routes() -> Router<StatusState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/stats", get(stats))
        .route("/v1/sessions", get(sessions))
        .route("/v1/events/stream", get(stream_events))
}

/// Health check endpoint.
async fn healthz() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "gateway".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Process-wide counters.
async fn stats(State(state): State<StatusState>) -> impl IntoResponse {
    Json(state.registry.stats().view())
}

/// Live sessions, ordered by id.
async fn sessions(State(state): State<StatusState>) -> impl IntoResponse {
    Json(state.registry.sessions().await)
}

/// Tail session lifecycle events as NDJSON.
///
/// A consumer that falls behind the broadcast buffer misses the oldest
/// frames and sees a gap in `seq`; the stream itself keeps going.
async fn stream_events(State(state): State<StatusState>) -> Response {
    let rx = state.events.subscribe();
    let stream = unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(frame) => match frame.to_json_line() {
                    Ok(line) => return Some((Ok::<Bytes, Infallible>(Bytes::from(line)), rx)),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize event frame");
                        continue;
                    }
                },
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Event stream consumer lagged");
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    let mut response = Response::new(Body::from_stream(stream));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/x-ndjson"));
    response
}

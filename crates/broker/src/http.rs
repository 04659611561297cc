// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Three routes — health, RPC, event stream — attaching the per-listener
//! identity provider, invoking the session manager, and writing SSE
//! framing with monotonic ids. Grounded on the teacher's
//! `transport/mod.rs` (`build_router_inner`, `ErrorResponse`/`ErrorBody`,
//! `CorsLayer::permissive()`) and on `paulirotta-ahma_mcp`'s
//! `ahma_http_bridge/src/bridge.rs` for the "health + rpc + sse" route
//! shape this spec asks for, generalized from a broadcast-channel SSE feed
//! to this crate's per-client replay hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use futures_util::Stream;
use serde_json::Value;
use tower_http::cors::CorsLayer;

use crate::error::ErrorCode;
use crate::event::Event;
use crate::identity::{IdentityProvider, RequestContext};
use crate::manager::SessionManager;
use crate::sse::to_sse_event;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
const PING_INTERVAL: Duration = Duration::from_secs(15);
const SNAPSHOT_EVENT_KIND: &str = "session/snapshot";
const GAP_EVENT_KIND: &str = "events/gap";

/// Everything the three routes need, shared across every request on one
/// listener. Identity is injected per-listener (spec.md §4.4/§9): the
/// loopback and overlay listeners each build their own `AppState` with a
/// different `identity` provider, sharing the same `manager`.
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub identity: Arc<dyn IdentityProvider>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/rpc", post(rpc))
        .route("/events", get(events))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn request_context(headers: &HeaderMap, remote_addr: SocketAddr) -> RequestContext {
    RequestContext { headers: headers.clone(), remote_addr: Some(remote_addr) }
}

async fn resolve_client_key(
    state: &AppState,
    headers: &HeaderMap,
    remote_addr: SocketAddr,
) -> Result<String, Response> {
    let ctx = request_context(headers, remote_addr);
    state
        .identity
        .client_key(&ctx)
        .await
        .map_err(|code| code.to_http_response("unauthorized"))
}

async fn rpc(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let client_key = match resolve_client_key(&state, &headers, remote_addr).await {
        Ok(key) => key,
        Err(resp) => return resp,
    };

    if body.is_empty() {
        return ErrorCode::BadRequest.to_http_response("empty request body");
    }
    let envelope: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(err) => return ErrorCode::BadRequest.to_http_response(format!("invalid json: {err}")),
    };

    let session = match state.manager.ensure(&client_key).await {
        Ok(session) => session,
        Err(ErrorCode::MaxSessions) => {
            return ErrorCode::MaxSessions.to_http_response("too many concurrent sessions")
        }
        Err(_) => return ErrorCode::SpawnFailed.to_http_response("failed to start child session"),
    };

    match session.send_rpc(envelope, None).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            bytes,
        )
            .into_response(),
        Err(err) => err.to_http_response("rpc call failed"),
    }
}

async fn events(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let client_key = match resolve_client_key(&state, &headers, remote_addr).await {
        Ok(key) => key,
        Err(resp) => return resp,
    };

    let last_seen_id = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    // `events` never ensures a session: stream subscribers may attach
    // before any request has ever been made (spec.md §4.3).
    let hub = state.manager.events(&client_key).await;
    let snapshot = state.manager.snapshot(&client_key).await;

    let snapshot_payload = serde_json::to_vec(&snapshot).unwrap_or_default();
    let snapshot_event =
        Event { id: 0, kind: SNAPSHOT_EVENT_KIND.to_owned(), payload: Bytes::from(snapshot_payload) };

    Sse::new(event_stream(hub, last_seen_id, snapshot_event)).into_response()
}

fn event_stream(
    hub: Arc<crate::event_hub::EventHub>,
    last_seen_id: u64,
    snapshot_event: Event,
) -> impl Stream<Item = Result<SseEvent, std::convert::Infallible>> {
    async_stream::stream! {
        yield Ok(to_sse_event(&snapshot_event));

        let mut sub = hub.subscribe_from(last_seen_id);
        if let Some(floor) = sub.gap() {
            let payload = serde_json::json!({ "requested_from": last_seen_id, "replayed_from": floor });
            let gap_event = Event {
                id: 0,
                kind: GAP_EVENT_KIND.to_owned(),
                payload: Bytes::from(serde_json::to_vec(&payload).unwrap_or_default()),
            };
            yield Ok(to_sse_event(&gap_event));
        }
        loop {
            tokio::select! {
                event = sub.recv() => {
                    match event {
                        Some(event) => yield Ok(to_sse_event(&event)),
                        None => break,
                    }
                }
                _ = tokio::time::sleep(PING_INTERVAL) => {
                    yield Ok(SseEvent::default().comment("ping"));
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
